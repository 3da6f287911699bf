//! Stage 4a: crop one source window per sample into an ordered tile grid.
//!
//! Tiles carry no rendering state; any [`crate::scene::SceneRenderer`] can
//! consume a [`TileGrid`].

use log::info;
use serde::{Deserialize, Serialize};

use crate::metrics::WindowSize;
use crate::raster::{GeoTransform, Raster};
use crate::sampling::{Sample, StratifiedSample};

/// Source crop centred on one sample, exactly one metric window wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tile {
    pub sample: Sample,
    pub raster: Raster,
    /// Ground side length: window × cell size.
    pub side_length: f64,
}

impl Tile {
    /// Mean of the tile's valid cells, or NaN when it has none.
    pub fn mean(&self) -> f64 {
        let (sum, n) = self
            .raster
            .data
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    }
}

/// Crop `source` to the `window`×`window` block centred on `sample`.
/// Cells falling outside `source` are NaN.
pub fn crop_tile(source: &Raster, sample: &Sample, window: WindowSize) -> Tile {
    let side = window.get();
    let half = window.half() as isize;
    let row0 = sample.row as isize - half;
    let col0 = sample.col as isize - half;

    let raster = if row0 >= 0 && col0 >= 0 {
        source.crop(row0 as usize, col0 as usize, side, side)
    } else {
        let t = source.transform;
        let transform = GeoTransform {
            origin_x: t.origin_x + col0 as f64 * t.pixel_width,
            origin_y: t.origin_y + row0 as f64 * t.pixel_height,
            ..t
        };
        let mut out = Raster::new(side, side, transform, source.crs.clone(), f32::NAN);
        out.nodata = source.nodata;
        for r in 0..side {
            for c in 0..side {
                let (sr, sc) = (row0 + r as isize, col0 + c as isize);
                if sr >= 0 && sc >= 0 && (sr as usize) < source.height && (sc as usize) < source.width {
                    out.set(r, c, source.get(sr as usize, sc as usize));
                }
            }
        }
        out
    };

    Tile { sample: sample.clone(), side_length: window.side_length(source.cell_size()), raster }
}

/// Tiles in class-major / sample-minor order, one grid row per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileGrid {
    pub window: WindowSize,
    /// Class id of each grid row, ascending.
    pub strata: Vec<usize>,
    /// Widest row.
    pub columns: usize,
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn rows(&self) -> usize {
        self.strata.len()
    }

    /// Grid (row, column) of `tiles[index]`.
    pub fn position(&self, index: usize) -> Option<(usize, usize)> {
        let tile = self.tiles.get(index)?;
        let row = self.strata.iter().position(|&s| s == tile.sample.stratum)?;
        let col = self.tiles[..index].iter().filter(|t| t.sample.stratum == tile.sample.stratum).count();
        Some((row, col))
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Tile> {
        let stratum = *self.strata.get(row)?;
        self.tiles.iter().filter(|t| t.sample.stratum == stratum).nth(col)
    }

    pub fn row(&self, row: usize) -> impl Iterator<Item = &Tile> {
        let stratum = self.strata.get(row).copied();
        self.tiles.iter().filter(move |t| Some(t.sample.stratum) == stratum)
    }
}

/// Crop a tile for every sample, keeping the sample order.
pub fn build_tiles(source: &Raster, sampled: &StratifiedSample, window: WindowSize) -> TileGrid {
    let tiles: Vec<Tile> = sampled.samples.iter().map(|s| crop_tile(source, s, window)).collect();

    let mut strata: Vec<usize> = Vec::new();
    for t in &tiles {
        if strata.last() != Some(&t.sample.stratum) {
            strata.push(t.sample.stratum);
        }
    }
    let columns = strata
        .iter()
        .map(|&s| tiles.iter().filter(|t| t.sample.stratum == s).count())
        .max()
        .unwrap_or(0);

    info!("{} tiles in a {}x{} grid", tiles.len(), strata.len(), columns);
    TileGrid { window, strata, columns, tiles }
}
