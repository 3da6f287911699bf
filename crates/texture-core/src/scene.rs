//! Stage 4b: renderer-neutral description of the tile grid as height-mapped
//! surfaces sharing one camera.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::color::{ColorRamp, Rgb};
use crate::error::Result;
use crate::metrics::SurfaceMetric;
use crate::tiles::{Tile, TileGrid};

/// View shared by every panel. Changing it moves all panels at once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Rotation about the vertical axis, degrees clockwise from north.
    pub azimuth: f64,
    /// Angle above the horizon, degrees (90 = straight down).
    pub elevation: f64,
    /// Vertical exaggeration applied to normalised heights.
    pub z_scale: f64,
    pub linked: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self { azimuth: 45.0, elevation: 30.0, z_scale: 0.5, linked: true }
    }
}

impl Camera {
    pub fn rotate(&mut self, d_azimuth: f64, d_elevation: f64) {
        self.azimuth = (self.azimuth + d_azimuth).rem_euclid(360.0);
        self.elevation = (self.elevation + d_elevation).clamp(0.0, 90.0);
    }

    /// Project a panel-local point (x, y in [-0.5, 0.5], z in [0, 1]) to
    /// screen (x right, y up) plus a depth where larger is farther.
    pub fn project(&self, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
        let (sa, ca) = self.azimuth.to_radians().sin_cos();
        let (se, ce) = self.elevation.to_radians().sin_cos();
        let z = z * self.z_scale;
        let xr = x * ca - y * sa;
        let yr = x * sa + y * ca;
        (xr, yr * se + z * ce, yr * ce - z * se)
    }
}

/// One tile as a surface: row-major heights with a colour per vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub row: usize,
    pub col: usize,
    pub stratum: usize,
    pub annotation: String,
    pub metric_value: f64,
    pub mean_value: f64,
    /// Map coordinates of the sampled cell.
    pub x: f64,
    pub y: f64,
    pub side_length: f64,
    pub width: usize,
    pub height: usize,
    /// Source values; `None` for no-data.
    pub heights: Vec<Option<f32>>,
    pub colors: Vec<Option<Rgb>>,
}

impl Panel {
    fn from_tile(tile: &Tile, row: usize, col: usize, metric: SurfaceMetric, ramp: &ColorRamp) -> Self {
        let s = &tile.sample;
        let heights: Vec<Option<f32>> =
            tile.raster.data.iter().map(|&v| if v.is_nan() { None } else { Some(v) }).collect();
        let colors = heights.iter().map(|h| h.and_then(|v| ramp.color_for(v as f64))).collect();
        Self {
            row,
            col,
            stratum: s.stratum,
            annotation: annotation(metric, s.metric_value, s.mean_value),
            metric_value: s.metric_value,
            mean_value: s.mean_value,
            x: s.x,
            y: s.y,
            side_length: tile.side_length,
            width: tile.raster.width,
            height: tile.raster.height,
            heights,
            colors,
        }
    }

    pub fn height_at(&self, row: usize, col: usize) -> Option<f32> {
        self.heights[row * self.width + col]
    }
}

/// `"<metric> = v | mean = m"`.
pub fn annotation(metric: SurfaceMetric, value: f64, mean: f64) -> String {
    format!("{metric} = {value:.2} | mean = {mean:.2}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub title: String,
    pub metric: SurfaceMetric,
    pub window: usize,
    pub rows: usize,
    pub columns: usize,
    /// Class id of each grid row.
    pub strata: Vec<usize>,
    /// Height range every panel's z axis spans: the outer ramp breaks.
    pub z_range: (f64, f64),
    pub ramp: ColorRamp,
    pub camera: Camera,
    pub panels: Vec<Panel>,
}

impl Scene {
    pub fn from_grid(grid: &TileGrid, ramp: &ColorRamp, metric: SurfaceMetric) -> Self {
        let panels: Vec<Panel> = grid
            .tiles
            .iter()
            .enumerate()
            .filter_map(|(i, tile)| {
                let (row, col) = grid.position(i)?;
                Some(Panel::from_tile(tile, row, col, metric, ramp))
            })
            .collect();
        let z_range = match (ramp.breaks.first(), ramp.breaks.last()) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => (0.0, 1.0),
        };
        Self {
            title: format!("{metric} classes, {0}x{0} windows", grid.window.get()),
            metric,
            window: grid.window.get(),
            rows: grid.rows(),
            columns: grid.columns,
            strata: grid.strata.clone(),
            z_range,
            ramp: ramp.clone(),
            camera: Camera::default(),
            panels,
        }
    }

    /// Height normalised into [0, 1] over `z_range`.
    pub fn normalize(&self, h: f32) -> f64 {
        let (lo, hi) = self.z_range;
        ((h as f64 - lo) / (hi - lo)).clamp(0.0, 1.0)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Turns a [`Scene`] into an output artifact.
pub trait SceneRenderer {
    /// File extension of the rendered artifact, without the dot.
    fn extension(&self) -> &'static str;

    fn render(&self, scene: &Scene) -> Result<Vec<u8>>;

    fn render_to_file(&self, scene: &Scene, path: &Path) -> Result<()> {
        let bytes = self.render(scene)?;
        fs::write(path, &bytes)?;
        info!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

/// Writes the scene as pretty JSON for an interactive viewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneJson;

impl SceneRenderer for SceneJson {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, scene: &Scene) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(scene)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::WindowSize;
    use crate::projection::Crs;
    use crate::raster::{GeoTransform, Raster};
    use crate::sampling::{Sample, StratifiedSample};
    use crate::tiles::build_tiles;
    use approx::assert_abs_diff_eq;

    fn grid() -> TileGrid {
        let mut src = Raster::new(12, 12, GeoTransform::square(0.0, 360.0, 30.0), Crs::albers_conus(), 0.0);
        for (i, v) in src.data.iter_mut().enumerate() {
            *v = (i % 100) as f32;
        }
        src.set(4, 4, f32::NAN);
        let sample = |row: usize, col: usize, stratum: usize, value: f64| {
            let (x, y) = src.transform.pixel_to_geo(row, col);
            Sample { row, col, x, y, stratum, metric_value: value, mean_value: 42.13, raw_metric_value: value }
        };
        let sampled = StratifiedSample {
            metric: SurfaceMetric::Ssk,
            edges: vec![-1.0, 0.0, 1.0],
            samples: vec![sample(4, 4, 1, -0.5), sample(6, 6, 1, -0.25), sample(8, 8, 2, 0.05)],
            shortfalls: vec![],
        };
        build_tiles(&src, &sampled, WindowSize::new(3).unwrap())
    }

    #[test]
    fn panels_follow_grid_layout_with_annotations() {
        let scene = Scene::from_grid(&grid(), &ColorRamp::default(), SurfaceMetric::Ssk);
        assert_eq!((scene.rows, scene.columns), (2, 2));
        assert_eq!(scene.panels.len(), 3);
        let p = &scene.panels[2];
        assert_eq!((p.row, p.col, p.stratum), (1, 0, 2));
        assert_eq!(p.annotation, "ssk = 0.05 | mean = 42.13");
        assert_eq!(p.side_length, 90.0);
        assert_eq!(scene.z_range, (0.0, 100.0));
    }

    #[test]
    fn nodata_has_no_height_or_colour() {
        let scene = Scene::from_grid(&grid(), &ColorRamp::default(), SurfaceMetric::Ssk);
        let p = &scene.panels[0];
        assert_eq!(p.height_at(1, 1), None);
        assert_eq!(p.colors[4], None);
        assert!(p.height_at(0, 0).is_some());
        assert!(p.colors[0].is_some());
    }

    #[test]
    fn camera_is_shared_and_rotates_once() {
        let mut scene = Scene::from_grid(&grid(), &ColorRamp::default(), SurfaceMetric::Ssk);
        assert!(scene.camera.linked);
        scene.camera.rotate(350.0, 80.0);
        assert_abs_diff_eq!(scene.camera.azimuth, 35.0);
        assert_abs_diff_eq!(scene.camera.elevation, 90.0);
    }

    #[test]
    fn top_down_projection_keeps_plan_view() {
        let cam = Camera { azimuth: 0.0, elevation: 90.0, z_scale: 1.0, linked: true };
        let (sx, sy, depth) = cam.project(0.25, -0.5, 1.0);
        assert_abs_diff_eq!(sx, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(sy, -0.5, epsilon = 1e-12);
        // Higher points are nearer when looking straight down.
        assert!(depth < cam.project(0.25, -0.5, 0.0).2);
    }

    #[test]
    fn json_renderer_round_trips() {
        let scene = Scene::from_grid(&grid(), &ColorRamp::default(), SurfaceMetric::Ssk);
        let bytes = SceneJson.render(&scene).unwrap();
        assert_eq!(Scene::from_json(&bytes).unwrap(), scene);
        assert_eq!(SceneJson.extension(), "json");
    }
}
