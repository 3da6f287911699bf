//! Stage 2: moving-window metric surfaces.

use log::info;
use serde::{Deserialize, Serialize};

use super::detrend::remove_plane;
use super::window::{ProcessingMode, WindowSize};
use super::SurfaceMetric;
use crate::error::Result;
use crate::raster::Raster;

/// Metric values and the source's local mean, both co-registered with the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSurface {
    pub metric: SurfaceMetric,
    pub window: WindowSize,
    /// NaN wherever `local_mean` is NaN.
    pub values: Raster,
    /// Windowed mean of the (non-detrended) source.
    pub local_mean: Raster,
}

/// Windowed mean of `raster`. A cell is NaN when its window leaves the grid
/// or covers any NaN cell.
///
/// Uses 2-D prefix sums of values and of NaN counts, so cost is O(N)
/// whatever the window size.
pub fn focal_mean(raster: &Raster, window: WindowSize) -> Raster {
    let w = raster.width;
    let h = raster.height;
    let half = window.half();
    let side = window.get();

    // 1-indexed: psum[row*(w+1)+col] = Σ data[0..row][0..col].
    let mut psum = vec![0f64; (h + 1) * (w + 1)];
    let mut pnan = vec![0u32; (h + 1) * (w + 1)];
    for row in 1..=h {
        for col in 1..=w {
            let v = raster.get(row - 1, col - 1);
            let (val, nan) = if v.is_nan() { (0.0, 1) } else { (v as f64, 0) };
            let i = row * (w + 1) + col;
            psum[i] = val + psum[i - (w + 1)] + psum[i - 1] - psum[i - (w + 1) - 1];
            pnan[i] = nan + pnan[i - (w + 1)] + pnan[i - 1] - pnan[i - (w + 1) - 1];
        }
    }

    let mut out = raster.like(f32::NAN);
    if side > w || side > h {
        return out;
    }
    let area = (side * side) as f64;
    for row in half..h - half {
        for col in half..w - half {
            let (r1, r2) = (row - half, row + half + 1);
            let (c1, c2) = (col - half, col + half + 1);
            let nan = pnan[r2 * (w + 1) + c2] + pnan[r1 * (w + 1) + c1]
                - pnan[r1 * (w + 1) + c2]
                - pnan[r2 * (w + 1) + c1];
            if nan > 0 {
                continue;
            }
            let sum = psum[r2 * (w + 1) + c2] - psum[r1 * (w + 1) + c2] - psum[r2 * (w + 1) + c1]
                + psum[r1 * (w + 1) + c1];
            out.set(row, col, (sum / area) as f32);
        }
    }
    out
}

/// Compute `metric` over `window`×`window` neighbourhoods of `raster`.
///
/// The input is detrended with [`remove_plane`] first. Cells whose local
/// mean is undefined are masked, so the metric and mean rasters share one
/// validity mask.
pub fn compute_metric(
    raster: &Raster,
    metric: SurfaceMetric,
    window: WindowSize,
    mode: ProcessingMode,
) -> Result<MetricSurface> {
    window.check_fits(raster.width, raster.height)?;
    info!(
        "computing {metric} over {0}x{0} windows on a {1}x{2} raster ({mode:?})",
        window.get(),
        raster.width,
        raster.height
    );

    let detrended = remove_plane(raster);
    let local_mean = focal_mean(raster, window);
    let side = window.get();
    let half = window.half();
    let cell_size = raster.cell_size();
    let width = raster.width;

    let rows = mode.map_rows(raster.height, |row| {
        let mut out = vec![f32::NAN; width];
        let mut buf = Vec::with_capacity(side * side);
        for (col, slot) in out.iter_mut().enumerate() {
            if local_mean.get(row, col).is_nan() {
                continue;
            }
            buf.clear();
            for r in row - half..=row + half {
                for c in col - half..=col + half {
                    buf.push(detrended.get(r, c) as f64);
                }
            }
            *slot = metric.evaluate(&buf, side, cell_size) as f32;
        }
        out
    })?;

    let mut values = raster.like(f32::NAN);
    values.data = rows.concat();
    // The source marker may be a legitimate metric value.
    values.nodata = None;
    info!("{metric}: {} valid cells", values.valid_count());

    Ok(MetricSurface { metric, window, values, local_mean })
}
