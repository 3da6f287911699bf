//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Window is even, smaller than 3, or larger than the raster.
    #[error("invalid window {size}: {reason}")]
    InvalidWindow { size: usize, reason: String },

    #[error("unsupported surface metric: {0:?}")]
    UnsupportedMetric(String),

    /// Extent polygon and raster CRS cannot be reconciled.
    #[error("projection mismatch: raster is {raster}, extent is {extent} ({reason})")]
    ProjectionMismatch {
        raster: String,
        extent: String,
        reason: String,
    },

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("metric raster has no valid cells to sample")]
    EmptyMetricSurface,

    #[error("invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("missing georeferencing: {0}")]
    MissingGeoreference(String),

    #[error("unsupported pixel format: {0}")]
    UnsupportedDataType(String),

    #[error("GeoJSON error: {0}")]
    GeoJson(String),

    /// A pipeline stage failed on the named input.
    #[error("{stage} failed on {input}: {source}")]
    Stage {
        stage: &'static str,
        input: String,
        #[source]
        source: Box<Error>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<geojson::Error> for Error {
    fn from(e: geojson::Error) -> Self {
        Error::GeoJson(e.to_string())
    }
}

impl Error {
    pub(crate) fn in_stage(self, stage: &'static str, input: impl Into<String>) -> Self {
        Error::Stage { stage, input: input.into(), source: Box::new(self) }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
