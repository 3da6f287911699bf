/// Stratified texture sampling: reads a cover GeoTIFF and a study-area
/// GeoJSON, computes a moving-window surface metric, draws a fixed number of
/// cells per metric class and writes the metric raster, the samples and a
/// tile scene for the visualizer.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use texture_core::config::PipelineConfig;
use texture_core::metrics::{SurfaceMetric, WindowSize};
use texture_core::pipeline::run_pipeline;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "stratify",
    about = "Stratify a cover raster by windowed surface texture and sample each class"
)]
struct Args {
    /// JSON run configuration; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source GeoTIFF (single band, e.g. percent canopy cover)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Study-area extent (GeoJSON Polygon or MultiPolygon)
    #[arg(long)]
    extent: Option<PathBuf>,

    /// Name of the source variable, used in output names
    #[arg(long)]
    variable: Option<String>,

    /// Surface metric: sa, sq, ssk, sku, sdq or sdr
    #[arg(short, long)]
    metric: Option<SurfaceMetric>,

    /// Moving-window side in cells (odd, at least 3)
    #[arg(short, long)]
    window: Option<usize>,

    /// Number of equal-width classes
    #[arg(long)]
    classes: Option<usize>,

    /// Explicit class edges, comma separated (overrides --classes)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    edges: Option<Vec<f64>>,

    /// Samples drawn per class
    #[arg(short = 'n', long)]
    samples: Option<usize>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Target equal-area CRS (PROJ string or EPSG:<code>)
    #[arg(long)]
    projection: Option<String>,

    /// Target cell size in metres when the source must be reprojected
    #[arg(long)]
    cell_size: Option<f64>,

    /// Metric worker threads (0 = all cores, 1 = sequential)
    #[arg(long)]
    workers: Option<usize>,

    /// Output directory (created if absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip writing the metric GeoTIFF
    #[arg(long)]
    no_metric_raster: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Cannot load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.source {
            cfg.source = v;
        }
        if let Some(v) = self.extent {
            cfg.extent = v;
        }
        if let Some(v) = self.variable {
            cfg.variable = v;
        }
        if let Some(v) = self.metric {
            cfg.metric = v;
        }
        if let Some(v) = self.window {
            cfg.window = WindowSize::new(v).context("Invalid --window")?;
        }
        if let Some(v) = self.classes {
            cfg.classes = v;
        }
        if self.edges.is_some() {
            cfg.edges = self.edges;
        }
        if let Some(v) = self.samples {
            cfg.samples_per_class = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.projection {
            cfg.projection = v;
        }
        if let Some(v) = self.cell_size {
            cfg.cell_size = v;
        }
        if self.workers.is_some() {
            cfg.workers = self.workers;
        }
        if let Some(v) = self.output {
            cfg.output_dir = v;
        }
        if self.no_metric_raster {
            cfg.write_metric_raster = false;
        }
        Ok(cfg)
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let print_only = args.print_config;
    let cfg = args.into_config()?;

    if print_only {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    info!(
        "stratify: {} by {} ({} cells), {} per class, seed {}",
        cfg.source.display(),
        cfg.metric,
        cfg.window.get(),
        cfg.samples_per_class,
        cfg.seed
    );

    let output = run_pipeline(&cfg).context("Pipeline failed")?;
    for s in &output.samples.shortfalls {
        warn!("class {}: {} of {} samples", s.stratum, s.available, s.requested);
    }

    let written = output
        .write(&cfg)
        .with_context(|| format!("Cannot write outputs to {}", cfg.output_dir.display()))?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}
