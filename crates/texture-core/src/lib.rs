//! Windowed surface-texture stratification of continuous cover rasters.
//!
//! Pipeline: [`loader`] → [`metrics`] → [`sampling`] → [`tiles`] → [`scene`].

pub mod color;
pub mod config;
pub mod error;
pub mod extent;
pub mod io;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod projection;
pub mod raster;
pub mod sampling;
pub mod scene;
pub mod tiles;

pub use error::{Error, Result};
