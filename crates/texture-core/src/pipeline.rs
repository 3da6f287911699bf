//! Loader → metric → sampler → tiles → scene, strictly forward.
//!
//! Every stage runs in memory; outputs are written only once all of them
//! succeeded, so a failed run leaves the output directory untouched.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::extent::{read_extent, Extent};
use crate::io::{read_geotiff, write_geotiff};
use crate::loader::prepare_source;
use crate::metrics::{compute_metric, MetricSurface};
use crate::raster::Raster;
use crate::sampling::{stratified_sample, StratifiedSample};
use crate::scene::{Scene, SceneJson, SceneRenderer};
use crate::tiles::{build_tiles, TileGrid};

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub source: Raster,
    pub surface: MetricSurface,
    pub samples: StratifiedSample,
    pub tiles: TileGrid,
    pub scene: Scene,
}

/// Read the configured source and extent from disk and run every stage.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate().map_err(|e| e.in_stage("config", "pipeline configuration"))?;
    let raster = read_geotiff(&config.source).map_err(|e| e.in_stage("load", config.source.display().to_string()))?;
    let extent = read_extent(&config.extent).map_err(|e| e.in_stage("load", config.extent.display().to_string()))?;
    run_with(&raster, &extent, config)
}

/// Run every stage on an already-loaded raster and extent.
pub fn run_with(raster: &Raster, extent: &Extent, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate().map_err(|e| e.in_stage("config", "pipeline configuration"))?;
    let target = config.target_crs()?;
    let input = config.source.display().to_string();

    info!("[1/4] preparing {} ({}x{})", config.variable, raster.width, raster.height);
    let source = prepare_source(raster, extent, &target, config.cell_size).map_err(|e| e.in_stage("load", &input))?;

    info!("[2/4] {} over {} cell windows", config.metric, config.window.get());
    let surface = compute_metric(&source, config.metric, config.window, config.processing_mode())
        .map_err(|e| e.in_stage("metric", format!("{} {}", input, config.metric)))?;

    info!("[3/4] sampling {} per class (seed {})", config.samples_per_class, config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let binning = config.binning()?;
    let samples = stratified_sample(&surface, &binning, config.samples_per_class, &mut rng)
        .map_err(|e| e.in_stage("sample", format!("{} surface", config.metric)))?;

    info!("[4/4] building {} tiles", samples.samples.len());
    let tiles = build_tiles(&source, &samples, config.window);
    let mut scene = Scene::from_grid(&tiles, &config.color_ramp()?, config.metric);
    scene.title = format!("{}: {}", config.variable, scene.title);

    Ok(PipelineOutput { source, surface, samples, tiles, scene })
}

impl PipelineOutput {
    /// Write the artifacts into `config.output_dir`, returning the written paths.
    pub fn write(&self, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
        let dir = &config.output_dir;
        fs::create_dir_all(dir).map_err(|e| Error::from(e).in_stage("write", dir.display().to_string()))?;
        let stem = format!("{}_{}_{}", config.variable, config.metric, config.window.get());
        let mut written = Vec::new();

        if config.write_metric_raster {
            let path = dir.join(format!("{stem}.tif"));
            write_geotiff(&self.surface.values, &path).map_err(|e| e.in_stage("write", path.display().to_string()))?;
            written.push(path);
        }

        let path = dir.join(format!("{stem}_samples.json"));
        write_json(&path, &self.samples)?;
        written.push(path);

        let path = dir.join(format!("{stem}_scene.{}", SceneJson.extension()));
        SceneJson.render_to_file(&self.scene, &path).map_err(|e| e.in_stage("write", path.display().to_string()))?;
        written.push(path);

        info!("wrote {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let wrap = |e: Error| e.in_stage("write", path.display().to_string());
    let text = serde_json::to_string_pretty(value).map_err(|e| wrap(e.into()))?;
    fs::write(path, text).map_err(|e| wrap(e.into()))
}
