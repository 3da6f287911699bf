//! Stage 1: bring the source raster onto an equal-area grid clipped to the extent.

use log::info;

use crate::error::{Error, Result};
use crate::extent::Extent;
use crate::projection::Crs;
use crate::raster::{Bounds, GeoTransform, Raster};

/// Reproject (if needed), crop to the extent bbox and mask cells outside the polygon.
///
/// * raster already in `target`: crop + mask, `cell_size` is ignored.
/// * raster geographic, `target` Albers: bilinear warp onto a `cell_size` grid.
/// * anything else fails with `ProjectionMismatch`.
pub fn prepare_source(raster: &Raster, extent: &Extent, target: &Crs, cell_size: f64) -> Result<Raster> {
    let mismatch = |reason: &str| Error::ProjectionMismatch {
        raster: raster.crs.to_string(),
        extent: extent.crs.to_string(),
        reason: reason.to_string(),
    };

    if raster.crs == Crs::Unknown {
        return Err(mismatch("raster carries no CRS"));
    }
    let extent = extent.to_crs(target).map_err(|_| mismatch("extent cannot be expressed in the target CRS"))?;

    let out = if &raster.crs == target {
        crop_to(raster, &extent.bounds()).ok_or_else(|| mismatch("extent does not overlap the raster"))?
    } else {
        match (&raster.crs, target) {
            (Crs::Geographic, Crs::AlbersEqualArea(p)) => {
                if !(cell_size > 0.0) {
                    return Err(Error::InvalidParameter {
                        name: "cell_size",
                        value: cell_size.to_string(),
                        reason: "must be positive".into(),
                    });
                }
                let source_in_target = Extent::rectangle(raster.bounds(), Crs::Geographic).to_crs(target)?;
                if !source_in_target.bounds().intersects(&extent.bounds()) {
                    return Err(mismatch("extent does not overlap the raster"));
                }
                warp(raster, &extent.bounds(), target, cell_size, |x, y| p.inverse(x, y))
            }
            _ => return Err(mismatch("no transformation from the raster CRS to the target CRS")),
        }
    };

    let masked = mask_outside(out, &extent);
    info!(
        "source prepared: {}x{} cells of {} m, {} valid",
        masked.width,
        masked.height,
        masked.cell_size(),
        masked.valid_count()
    );
    Ok(masked)
}

/// Smallest whole-cell window of `raster` covering `bounds`.
fn crop_to(raster: &Raster, bounds: &Bounds) -> Option<Raster> {
    if !raster.bounds().intersects(bounds) {
        return None;
    }
    let gt = raster.transform;
    let (r_a, c_a) = gt.geo_to_pixel(bounds.min_x, bounds.max_y);
    let (r_b, c_b) = gt.geo_to_pixel(bounds.max_x, bounds.min_y);
    let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64) as usize;
    let row0 = clamp(r_a.min(r_b).floor(), raster.height);
    let row1 = clamp(r_a.max(r_b).ceil(), raster.height);
    let col0 = clamp(c_a.min(c_b).floor(), raster.width);
    let col1 = clamp(c_a.max(c_b).ceil(), raster.width);
    if row1 <= row0 || col1 <= col0 {
        return None;
    }
    Some(raster.crop(row0, col0, row1 - row0, col1 - col0))
}

/// Resample `raster` onto a north-up grid over `bounds` in `target`;
/// `to_source` maps target map coordinates back to the raster's CRS.
fn warp<F>(raster: &Raster, bounds: &Bounds, target: &Crs, cell_size: f64, to_source: F) -> Raster
where
    F: Fn(f64, f64) -> (f64, f64),
{
    // Snap the grid to whole multiples of the cell size.
    let min_x = (bounds.min_x / cell_size).floor() * cell_size;
    let max_y = (bounds.max_y / cell_size).ceil() * cell_size;
    let width = (((bounds.max_x - min_x) / cell_size).ceil() as usize).max(1);
    let height = (((max_y - bounds.min_y) / cell_size).ceil() as usize).max(1);

    let mut out = Raster::new(width, height, GeoTransform::square(min_x, max_y, cell_size), target.clone(), f32::NAN);
    out.nodata = raster.nodata;
    for r in 0..height {
        for c in 0..width {
            let (x, y) = out.transform.pixel_to_geo(r, c);
            let (sx, sy) = to_source(x, y);
            if let Some(v) = raster.sample(sx, sy) {
                out.set(r, c, v);
            }
        }
    }
    out
}

fn mask_outside(mut raster: Raster, extent: &Extent) -> Raster {
    for r in 0..raster.height {
        for c in 0..raster.width {
            let (x, y) = raster.transform.pixel_to_geo(r, c);
            if !extent.contains(x, y) {
                raster.set(r, c, f32::NAN);
            }
        }
    }
    raster
}
