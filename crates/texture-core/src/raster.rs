use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::projection::Crs;

/// North-up affine transform: `x = origin_x + col·pixel_width`,
/// `y = origin_y + row·pixel_height` (pixel_height is negative).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X of the upper-left corner.
    pub origin_x: f64,
    /// Y of the upper-left corner.
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Square cells of `cell_size` with the upper-left corner at (`origin_x`, `origin_y`).
    pub fn square(origin_x: f64, origin_y: f64, cell_size: f64) -> Self {
        Self::new(origin_x, origin_y, cell_size, -cell_size)
    }

    /// Cell size in ground units (assumes square cells).
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Centre of cell (`row`, `col`).
    pub fn pixel_to_geo(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate. Cell (r, c) spans [r, r+1) × [c, c+1).
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }

    /// Transform of a sub-grid whose upper-left cell is (`row`, `col`) of this grid.
    pub fn offset(&self, row: usize, col: usize) -> Self {
        Self {
            origin_x: self.origin_x + col as f64 * self.pixel_width,
            origin_y: self.origin_y + row as f64 * self.pixel_height,
            ..*self
        }
    }
}

/// Map-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }
}

/// Single-band georeferenced grid of f32 values, row-major, row 0 = north.
/// No-data cells are stored as NaN; `nodata` keeps the on-disk marker for writing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
}

impl Raster {
    /// Create a new Raster filled with the given value.
    pub fn new(width: usize, height: usize, transform: GeoTransform, crs: Crs, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            transform,
            crs,
            nodata: None,
        }
    }

    pub fn from_vec(
        data: Vec<f32>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: Crs,
    ) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(Error::InvalidDimensions { width, height });
        }
        Ok(Self { data, width, height, transform, crs, nodata: None })
    }

    /// Same grid geometry and CRS, every cell set to `fill`.
    pub fn like(&self, fill: f32) -> Self {
        Self {
            data: vec![fill; self.data.len()],
            width: self.width,
            height: self.height,
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: self.nodata,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        !self.get(row, col).is_nan()
    }

    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// True when both rasters share dimensions, transform and CRS.
    pub fn same_grid(&self, other: &Raster) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.transform == other.transform
            && self.crs == other.crs
    }

    pub fn bounds(&self) -> Bounds {
        let (x0, y0) = (self.transform.origin_x, self.transform.origin_y);
        let x1 = x0 + self.width as f64 * self.transform.pixel_width;
        let y1 = y0 + self.height as f64 * self.transform.pixel_height;
        Bounds {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// (min, max) over valid cells, `None` if every cell is NaN.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Copy out the `rows`×`cols` block whose upper-left cell is (`row0`, `col0`).
    /// Cells past the raster edge are NaN.
    pub fn crop(&self, row0: usize, col0: usize, rows: usize, cols: usize) -> Raster {
        let mut data = Vec::with_capacity(rows * cols);
        for r in row0..row0 + rows {
            for c in col0..col0 + cols {
                let v = if r < self.height && c < self.width { self.get(r, c) } else { f32::NAN };
                data.push(v);
            }
        }
        Raster {
            data,
            width: cols,
            height: rows,
            transform: self.transform.offset(row0, col0),
            crs: self.crs.clone(),
            nodata: self.nodata,
        }
    }

    /// Bilinear sample at map coordinate (x, y) treating values at cell centres.
    /// Returns None outside the grid or when any contributing cell is NaN.
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        let (fr, fc) = self.transform.geo_to_pixel(x, y);
        let fy = fr - 0.5;
        let fx = fc - 0.5;
        if fx < -0.5 || fy < -0.5 || fx > self.width as f64 - 0.5 || fy > self.height as f64 - 0.5 {
            return None;
        }
        let fx = fx.clamp(0.0, (self.width - 1) as f64);
        let fy = fy.clamp(0.0, (self.height - 1) as f64);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let tx = (fx - x0 as f64) as f32;
        let ty = (fy - y0 as f64) as f32;

        let v00 = self.get(y0, x0);
        let v10 = self.get(y0, x1);
        let v01 = self.get(y1, x0);
        let v11 = self.get(y1, x1);

        let v = v00 * (1.0 - tx) * (1.0 - ty)
            + v10 * tx * (1.0 - ty)
            + v01 * (1.0 - tx) * ty
            + v11 * tx * ty;

        if v.is_nan() { None } else { Some(v) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: usize, height: usize) -> Raster {
        Raster::new(width, height, GeoTransform::square(1000.0, 2000.0, 30.0), Crs::albers_conus(), 0.0)
    }

    #[test]
    fn pixel_to_geo_returns_cell_centre() {
        let gt = GeoTransform::square(1000.0, 2000.0, 30.0);
        assert_eq!(gt.pixel_to_geo(0, 0), (1015.0, 1985.0));
        assert_eq!(gt.pixel_to_geo(2, 1), (1045.0, 1925.0));
        let (r, c) = gt.geo_to_pixel(1045.0, 1925.0);
        assert!((r - 2.5).abs() < 1e-12 && (c - 1.5).abs() < 1e-12);
    }

    #[test]
    fn crop_shifts_transform_and_pads_with_nan() {
        let mut r = grid(4, 4);
        r.set(3, 3, 7.0);
        let c = r.crop(2, 2, 3, 3);
        assert_eq!(c.get(1, 1), 7.0);
        assert!(c.get(2, 2).is_nan());
        assert_eq!(c.transform.origin_x, 1060.0);
        assert_eq!(c.transform.origin_y, 1940.0);
    }

    #[test]
    fn sample_corners_return_exact_values() {
        let mut r = grid(4, 4);
        r.set(0, 0, 10.0);
        r.set(3, 3, 40.0);
        let (x, y) = r.transform.pixel_to_geo(0, 0);
        assert!((r.sample(x, y).unwrap() - 10.0).abs() < 1e-5);
        let (x, y) = r.transform.pixel_to_geo(3, 3);
        assert!((r.sample(x, y).unwrap() - 40.0).abs() < 1e-5);
    }

    #[test]
    fn sample_out_of_bounds_returns_none() {
        let r = grid(4, 4);
        assert!(r.sample(0.0, 0.0).is_none());
        assert!(r.sample(1000.0 + 4.0 * 30.0 + 1.0, 1990.0).is_none());
    }

    #[test]
    fn value_range_skips_nan() {
        let mut r = grid(3, 1);
        r.data = vec![f32::NAN, -2.0, 5.0];
        assert_eq!(r.value_range(), Some((-2.0, 5.0)));
        assert_eq!(r.valid_count(), 2);
        r.data = vec![f32::NAN; 3];
        assert_eq!(r.value_range(), None);
    }

    #[test]
    fn from_vec_rejects_bad_length() {
        let gt = GeoTransform::square(0.0, 0.0, 1.0);
        assert!(Raster::from_vec(vec![0.0; 5], 2, 3, gt, Crs::Geographic).is_err());
    }
}
