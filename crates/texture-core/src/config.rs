//! Run configuration, loadable from JSON. Missing fields take the defaults
//! of the canopy-cover workflow.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::color::{ColorRamp, Rgb, COVER_STOPS};
use crate::error::{Error, Result};
use crate::metrics::{ProcessingMode, SurfaceMetric, WindowSize};
use crate::projection::Crs;
use crate::sampling::Binning;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Source GeoTIFF.
    pub source: PathBuf,
    /// Study-area GeoJSON.
    pub extent: PathBuf,
    /// Name of the source variable, used in titles and output names.
    pub variable: String,
    pub metric: SurfaceMetric,
    pub window: WindowSize,
    pub classes: usize,
    /// Explicit class edges; overrides both `classes` and the per-metric table.
    pub edges: Option<Vec<f64>>,
    pub samples_per_class: usize,
    pub seed: u64,
    /// Equal-area target CRS as a PROJ string or `EPSG:<code>`.
    pub projection: String,
    /// Target cell size in projected units when the source must be warped.
    pub cell_size: f64,
    /// Metric workers; `None`/0 = all cores, 1 = sequential.
    pub workers: Option<usize>,
    pub ramp: Vec<Rgb>,
    pub breaks: Vec<f64>,
    pub output_dir: PathBuf,
    pub write_metric_raster: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data/canopy_cover.tif"),
            extent: PathBuf::from("data/extent.geojson"),
            variable: "canopy_cover".into(),
            metric: SurfaceMetric::Ssk,
            window: WindowSize::default(),
            classes: 5,
            edges: None,
            samples_per_class: 3,
            seed: 42,
            projection: "+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +x_0=0 +y_0=0 +ellps=GRS80 +units=m"
                .into(),
            cell_size: 30.0,
            workers: None,
            ramp: COVER_STOPS.to_vec(),
            breaks: ColorRamp::default().breaks,
            output_dir: PathBuf::from("output"),
            write_metric_raster: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// An unknown metric name surfaces as [`Error::UnsupportedMetric`]
    /// rather than a generic JSON error.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if let Some(name) = value.get("metric").and_then(|m| m.as_str()) {
            name.parse::<SurfaceMetric>()?;
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Check every derived setting so that a bad value fails before any stage runs.
    pub fn validate(&self) -> Result<()> {
        self.binning()?;
        self.target_crs()?;
        self.color_ramp()?;
        if self.samples_per_class == 0 {
            return Err(Error::InvalidParameter {
                name: "samples_per_class",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(self.cell_size > 0.0 && self.cell_size.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "cell_size",
                value: self.cell_size.to_string(),
                reason: "must be a positive number".into(),
            });
        }
        Ok(())
    }

    pub fn binning(&self) -> Result<Binning> {
        match &self.edges {
            Some(edges) => Binning::edges(edges.clone()),
            None => Binning::for_metric(self.metric, self.classes),
        }
    }

    pub fn target_crs(&self) -> Result<Crs> {
        let crs = Crs::parse(&self.projection)?;
        match crs {
            Crs::AlbersEqualArea(_) => Ok(crs),
            other => Err(Error::InvalidParameter {
                name: "projection",
                value: self.projection.clone(),
                reason: format!("{other} is not an equal-area projection"),
            }),
        }
    }

    pub fn color_ramp(&self) -> Result<ColorRamp> {
        ColorRamp::new(self.ramp.clone(), self.breaks.clone())
    }

    pub fn processing_mode(&self) -> ProcessingMode {
        ProcessingMode::from_workers(self.workers)
    }
}
