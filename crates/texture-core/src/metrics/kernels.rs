//! Per-window surface-texture kernels.
//!
//! Every kernel receives one complete square window (no NaN) in row-major
//! order. Moment ratios of a perfectly flat window are defined as 0 so that
//! a valid window always yields a finite value.

const FLAT: f64 = 1e-12;

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// k-th central moment.
fn central_moment(values: &[f64], m: f64, k: i32) -> f64 {
    values.iter().map(|&v| (v - m).powi(k)).sum::<f64>() / values.len() as f64
}

/// Sa = mean |z − z̄|.
pub fn sa(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|&v| (v - m).abs()).sum::<f64>() / values.len() as f64
}

/// Sq = √(mean (z − z̄)²).
pub fn sq(values: &[f64]) -> f64 {
    let m = mean(values);
    central_moment(values, m, 2).sqrt()
}

/// Ssk = mean (z − z̄)³ / Sq³.
pub fn ssk(values: &[f64]) -> f64 {
    let m = mean(values);
    let s = central_moment(values, m, 2).sqrt();
    if s < FLAT {
        return 0.0;
    }
    central_moment(values, m, 3) / (s * s * s)
}

/// Sku = mean (z − z̄)⁴ / Sq⁴ (3 for a Gaussian surface).
pub fn sku(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = central_moment(values, m, 2);
    if var.sqrt() < FLAT {
        return 0.0;
    }
    central_moment(values, m, 4) / (var * var)
}

/// Sdq = √(mean over cells of (∂z/∂x)² + (∂z/∂y)²), forward differences.
pub fn sdq(values: &[f64], side: usize, cell_size: f64) -> f64 {
    if side < 2 {
        return 0.0;
    }
    let z = |r: usize, c: usize| values[r * side + c];
    let mut sum = 0.0;
    for r in 0..side - 1 {
        for c in 0..side - 1 {
            let dx = (z(r, c + 1) - z(r, c)) / cell_size;
            let dy = (z(r + 1, c) - z(r, c)) / cell_size;
            sum += dx * dx + dy * dy;
        }
    }
    (sum / ((side - 1) * (side - 1)) as f64).sqrt()
}

/// Sdr = (true surface area − projected area) / projected area × 100.
/// Each 2×2 cell quad is split into two triangles.
pub fn sdr(values: &[f64], side: usize, cell_size: f64) -> f64 {
    if side < 2 {
        return 0.0;
    }
    let z = |r: usize, c: usize| values[r * side + c];
    let h = cell_size;
    let tri = |a: [f64; 3], b: [f64; 3], c: [f64; 3]| {
        let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        let cross = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        0.5 * (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt()
    };
    let mut area = 0.0;
    for r in 0..side - 1 {
        for c in 0..side - 1 {
            let p00 = [0.0, 0.0, z(r, c)];
            let p01 = [h, 0.0, z(r, c + 1)];
            let p10 = [0.0, h, z(r + 1, c)];
            let p11 = [h, h, z(r + 1, c + 1)];
            area += tri(p00, p01, p11) + tri(p00, p11, p10);
        }
    }
    let projected = ((side - 1) * (side - 1)) as f64 * h * h;
    (area - projected) / projected * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(side: usize, rise: f64) -> Vec<f64> {
        (0..side * side).map(|i| (i % side) as f64 * rise).collect()
    }

    #[test]
    fn flat_window_is_zero_everywhere() {
        let flat = vec![42.0; 9];
        assert_eq!(sa(&flat), 0.0);
        assert_eq!(sq(&flat), 0.0);
        assert_eq!(ssk(&flat), 0.0);
        assert_eq!(sku(&flat), 0.0);
        assert_eq!(sdq(&flat, 3, 30.0), 0.0);
        assert_abs_diff_eq!(sdr(&flat, 3, 30.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn symmetric_values_have_zero_skew() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert_abs_diff_eq!(ssk(&v), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn single_peak_skews_positive() {
        let mut v = vec![0.0; 9];
        v[4] = 90.0;
        assert!(ssk(&v) > 2.0);
        v[4] = -90.0;
        assert!(ssk(&v) < -2.0);
    }

    #[test]
    fn two_level_surface_moments() {
        // Half at 0, half at 2 (even count): Sa = Sq = 1, Sku = 1.
        let v = [0.0, 2.0, 0.0, 2.0];
        assert_abs_diff_eq!(sa(&v), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sq(&v), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sku(&v), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ramp_rms_slope_equals_gradient() {
        // z rises 3 per 30 m cell along x → slope 0.1 everywhere.
        let v = ramp(5, 3.0);
        assert_abs_diff_eq!(sdq(&v, 5, 30.0), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn ramp_area_ratio_matches_secant() {
        // Inclined plane: area grows by sec(θ) with tan θ = 0.1.
        let v = ramp(5, 3.0);
        let expected = ((1.0f64 + 0.01).sqrt() - 1.0) * 100.0;
        assert_abs_diff_eq!(sdr(&v, 5, 30.0), expected, epsilon = 1e-9);
    }
}
