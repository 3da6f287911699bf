//! Planar detrending applied before every surface metric.

use crate::raster::Raster;

/// Subtract the least-squares plane `z = a + b·col + c·row` fitted over the
/// valid cells of `raster`. NaN cells stay NaN. Falls back to removing the
/// mean when the fit is degenerate (fewer than three non-collinear cells).
pub fn remove_plane(raster: &Raster) -> Raster {
    // Normal equations in centred coordinates for conditioning.
    let cx = (raster.width as f64 - 1.0) / 2.0;
    let cy = (raster.height as f64 - 1.0) / 2.0;

    let (mut n, mut sx, mut sy, mut sz) = (0f64, 0f64, 0f64, 0f64);
    let (mut sxx, mut syy, mut sxy, mut sxz, mut syz) = (0f64, 0f64, 0f64, 0f64, 0f64);
    for r in 0..raster.height {
        for c in 0..raster.width {
            let z = raster.get(r, c);
            if z.is_nan() {
                continue;
            }
            let (x, y, z) = (c as f64 - cx, r as f64 - cy, z as f64);
            n += 1.0;
            sx += x;
            sy += y;
            sz += z;
            sxx += x * x;
            syy += y * y;
            sxy += x * y;
            sxz += x * z;
            syz += y * z;
        }
    }

    let mut out = raster.like(f32::NAN);
    if n == 0.0 {
        return out;
    }

    // | n   sx  sy  | |a|   |sz |
    // | sx  sxx sxy | |b| = |sxz|
    // | sy  sxy syy | |c|   |syz|
    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let a_mat = [[n, sx, sy], [sx, sxx, sxy], [sy, sxy, syy]];
    let det = det3(a_mat);

    let (a, b, c) = if det.abs() < 1e-9 * n.powi(3).max(1.0) {
        (sz / n, 0.0, 0.0)
    } else {
        let da = det3([[sz, sx, sy], [sxz, sxx, sxy], [syz, sxy, syy]]);
        let db = det3([[n, sz, sy], [sx, sxz, sxy], [sy, syz, syy]]);
        let dc = det3([[n, sx, sz], [sx, sxx, sxz], [sy, sxy, syz]]);
        (da / det, db / det, dc / det)
    };

    for r in 0..raster.height {
        for col in 0..raster.width {
            let z = raster.get(r, col);
            if z.is_nan() {
                continue;
            }
            let plane = a + b * (col as f64 - cx) + c * (r as f64 - cy);
            out.set(r, col, (z as f64 - plane) as f32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Crs;
    use crate::raster::GeoTransform;

    fn grid(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Raster {
        let mut r = Raster::new(width, height, GeoTransform::square(0.0, 0.0, 30.0), Crs::albers_conus(), 0.0);
        for row in 0..height {
            for col in 0..width {
                r.set(row, col, f(row, col));
            }
        }
        r
    }

    #[test]
    fn pure_plane_detrends_to_zero() {
        let r = grid(8, 6, |row, col| 10.0 + 2.0 * col as f32 - 0.5 * row as f32);
        let d = remove_plane(&r);
        assert!(d.data.iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn nan_cells_are_preserved_and_ignored() {
        let mut r = grid(5, 5, |row, col| 3.0 * col as f32 + row as f32);
        r.set(2, 2, f32::NAN);
        r.set(0, 4, f32::NAN);
        let d = remove_plane(&r);
        assert!(d.get(2, 2).is_nan());
        assert!(d.get(0, 4).is_nan());
        assert!(d.data.iter().filter(|v| !v.is_nan()).all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn residual_bump_survives_detrend() {
        let mut r = grid(7, 7, |_, col| col as f32);
        r.set(3, 3, r.get(3, 3) + 49.0);
        let d = remove_plane(&r);
        // The bump dominates; its residual stays strongly positive.
        assert!(d.get(3, 3) > 40.0);
        let mean: f32 = d.data.iter().sum::<f32>() / d.data.len() as f32;
        assert!(mean.abs() < 1e-3);
    }

    #[test]
    fn single_row_falls_back_to_mean() {
        let r = grid(4, 1, |_, col| col as f32);
        let d = remove_plane(&r);
        // One row cannot constrain the y-slope, so only the mean is removed.
        assert!((d.get(0, 0) + 1.5).abs() < 1e-6);
        let sum: f32 = d.data.iter().sum();
        assert!(sum.abs() < 1e-4);
    }
}
