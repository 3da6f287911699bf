//! Stage 3: stratify the metric surface into value classes and draw a fixed
//! quota of cells from each class.
//!
//! Class ids are 1-based: class 1 holds the lowest metric values. Intervals
//! are right-closed with the lowest edge included, i.e. `[e0, e1]`,
//! `(e1, e2]`, …, `(e(n-1), en]`. Values outside `[e0, en]` belong to no class.

use log::{debug, info, warn};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{MetricSurface, SurfaceMetric};

/// Metrics whose classes use fixed, published edges instead of equal-width bins.
const FIXED_EDGES: &[(SurfaceMetric, &[f64])] = &[(SurfaceMetric::Sdr, &[0.7, 2.25, 3.8, 5.5, 10.0])];

/// How metric values are split into classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binning {
    /// `classes` bins of equal width between the observed min and max.
    EqualWidth { classes: usize },
    /// Explicit ascending edges; `edges.len() - 1` classes.
    Edges { edges: Vec<f64> },
}

impl Binning {
    pub fn equal_width(classes: usize) -> Result<Self> {
        if classes == 0 {
            return Err(Error::InvalidParameter {
                name: "classes",
                value: classes.to_string(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Binning::EqualWidth { classes })
    }

    pub fn edges(edges: Vec<f64>) -> Result<Self> {
        let ascending = edges.windows(2).all(|w| w[0] < w[1]);
        if edges.len() < 2 || !ascending || edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "edges",
                value: format!("{edges:?}"),
                reason: "need at least two finite, strictly ascending edges".into(),
            });
        }
        Ok(Binning::Edges { edges })
    }

    /// Fixed edges from the per-metric table when present, otherwise equal width.
    /// The table wins regardless of `classes`.
    pub fn for_metric(metric: SurfaceMetric, classes: usize) -> Result<Self> {
        match FIXED_EDGES.iter().find(|(m, _)| *m == metric) {
            Some((_, edges)) => Self::edges(edges.to_vec()),
            None => Self::equal_width(classes),
        }
    }

    pub fn class_count(&self) -> usize {
        match self {
            Binning::EqualWidth { classes } => *classes,
            Binning::Edges { edges } => edges.len() - 1,
        }
    }

    /// Concrete edges for a surface whose valid values span `[min, max]`.
    pub fn resolve(&self, min: f64, max: f64) -> Vec<f64> {
        match self {
            Binning::EqualWidth { classes } => {
                let n = *classes;
                let step = (max - min) / n as f64;
                (0..=n).map(|i| if i == n { max } else { min + step * i as f64 }).collect()
            }
            Binning::Edges { edges } => edges.clone(),
        }
    }
}

/// 1-based class id for `value` under `edges`, or `None` when out of range.
pub fn classify(value: f64, edges: &[f64]) -> Option<usize> {
    let (first, last) = (*edges.first()?, *edges.last()?);
    if value.is_nan() || value < first || value > last {
        return None;
    }
    // Number of edges strictly below the value = index of the closing edge.
    let k = edges.partition_point(|&e| e < value);
    Some(k.max(1))
}

/// Round half away from zero to `digits` decimals.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// One sampled cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub row: usize,
    pub col: usize,
    /// Cell-centre map coordinates.
    pub x: f64,
    pub y: f64,
    pub stratum: usize,
    /// Metric value rounded to 2 decimals.
    pub metric_value: f64,
    /// Local windowed mean of the source rounded to 2 decimals.
    pub mean_value: f64,
    /// Unrounded metric value the class was assigned from.
    pub raw_metric_value: f64,
}

/// A class that yielded fewer cells than requested. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub stratum: usize,
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratifiedSample {
    pub metric: SurfaceMetric,
    pub edges: Vec<f64>,
    /// Class-major, in draw order within each class.
    pub samples: Vec<Sample>,
    pub shortfalls: Vec<Shortfall>,
}

impl StratifiedSample {
    pub fn in_stratum(&self, stratum: usize) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(move |s| s.stratum == stratum)
    }
}

/// Draw up to `per_class` cells from every class without replacement.
///
/// Candidate cells are enumerated in row-major order, and classes are
/// visited in ascending order with the single `rng`, so a given seed always
/// yields the same sequence.
pub fn stratified_sample<R: Rng + ?Sized>(
    surface: &MetricSurface,
    binning: &Binning,
    per_class: usize,
    rng: &mut R,
) -> Result<StratifiedSample> {
    let values = &surface.values;
    let (min, max) = values.value_range().ok_or(Error::EmptyMetricSurface)?;
    let edges = binning.resolve(min as f64, max as f64);
    let classes = binning.class_count();
    info!("{} classes over edges {:?}", classes, edges);

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); classes];
    for (i, &v) in values.data.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if let Some(k) = classify(v as f64, &edges) {
            members[k - 1].push(i);
        }
    }

    let mut samples = Vec::with_capacity(classes * per_class);
    let mut shortfalls = Vec::new();
    for (k, cells) in members.iter().enumerate() {
        let stratum = k + 1;
        if cells.is_empty() {
            debug!("class {stratum} is empty, skipped");
            continue;
        }
        let take = per_class.min(cells.len());
        if take < per_class {
            warn!("class {stratum}: {} of {per_class} requested samples available", cells.len());
            shortfalls.push(Shortfall { stratum, requested: per_class, available: cells.len() });
        }
        for pick in index::sample(&mut *rng, cells.len(), take).into_iter() {
            let cell = cells[pick];
            let (row, col) = (cell / values.width, cell % values.width);
            let (x, y) = values.transform.pixel_to_geo(row, col);
            let raw = values.get(row, col) as f64;
            samples.push(Sample {
                row,
                col,
                x,
                y,
                stratum,
                metric_value: round_to(raw, 2),
                mean_value: round_to(surface.local_mean.get(row, col) as f64, 2),
                raw_metric_value: raw,
            });
        }
    }
    info!("drew {} samples across {} classes", samples.len(), classes);

    Ok(StratifiedSample { metric: surface.metric, edges, samples, shortfalls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::WindowSize;
    use crate::projection::Crs;
    use crate::raster::{GeoTransform, Raster};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn surface(metric: SurfaceMetric, values: Vec<f32>, width: usize) -> MetricSurface {
        let height = values.len() / width;
        let gt = GeoTransform::square(0.0, 0.0, 30.0);
        let mean: Vec<f32> = values.iter().map(|v| if v.is_nan() { f32::NAN } else { 12.3456 }).collect();
        MetricSurface {
            metric,
            window: WindowSize::new(3).unwrap(),
            values: Raster::from_vec(values, width, height, gt, Crs::albers_conus()).unwrap(),
            local_mean: Raster::from_vec(mean, width, height, gt, Crs::albers_conus()).unwrap(),
        }
    }

    #[test]
    fn five_equal_width_classes_over_minus_two_to_two() {
        let edges = Binning::equal_width(5).unwrap().resolve(-2.0, 2.0);
        let expected = [-2.0, -1.2, -0.4, 0.4, 1.2, 2.0];
        assert_eq!(edges.len(), 6);
        for (e, x) in edges.iter().zip(expected) {
            assert_abs_diff_eq!(*e, x, epsilon = 1e-12);
        }
        assert_eq!(classify(0.05, &edges), Some(3));
    }

    #[test]
    fn classify_is_right_closed_with_lowest_included() {
        let edges = [0.0, 1.0, 2.0];
        assert_eq!(classify(0.0, &edges), Some(1));
        assert_eq!(classify(1.0, &edges), Some(1));
        assert_eq!(classify(1.0001, &edges), Some(2));
        assert_eq!(classify(2.0, &edges), Some(2));
        assert_eq!(classify(2.1, &edges), None);
        assert_eq!(classify(-0.1, &edges), None);
        assert_eq!(classify(f64::NAN, &edges), None);
    }

    #[test]
    fn sdr_uses_fixed_edges_regardless_of_class_count() {
        for classes in [1, 3, 9] {
            let b = Binning::for_metric(SurfaceMetric::Sdr, classes).unwrap();
            assert_eq!(b, Binning::Edges { edges: vec![0.7, 2.25, 3.8, 5.5, 10.0] });
            assert_eq!(b.resolve(-50.0, 50.0), vec![0.7, 2.25, 3.8, 5.5, 10.0]);
        }
        assert_eq!(Binning::for_metric(SurfaceMetric::Ssk, 4).unwrap(), Binning::EqualWidth { classes: 4 });
    }

    #[test]
    fn invalid_binning_rejected() {
        assert!(Binning::equal_width(0).is_err());
        assert!(Binning::edges(vec![1.0]).is_err());
        assert!(Binning::edges(vec![1.0, 1.0, 2.0]).is_err());
        assert!(Binning::edges(vec![0.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn same_seed_same_samples() {
        let values: Vec<f32> = (0..400).map(|i| ((i * 37) % 101) as f32 / 25.0 - 2.0).collect();
        let s = surface(SurfaceMetric::Ssk, values, 20);
        let b = Binning::equal_width(5).unwrap();
        let a = stratified_sample(&s, &b, 4, &mut StdRng::seed_from_u64(42)).unwrap();
        let c = stratified_sample(&s, &b, 4, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&c).unwrap()
        );
        let d = stratified_sample(&s, &b, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_ne!(a.samples, d.samples);
    }

    #[test]
    fn counts_capped_and_strata_consistent() {
        let values: Vec<f32> = (0..400).map(|i| ((i * 37) % 101) as f32 / 25.0 - 2.0).collect();
        let s = surface(SurfaceMetric::Ssk, values, 20);
        let b = Binning::equal_width(5).unwrap();
        let out = stratified_sample(&s, &b, 6, &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(out.shortfalls.is_empty());
        for k in 1..=5 {
            assert_eq!(out.in_stratum(k).count(), 6);
        }
        let mut last = 0;
        let mut seen = std::collections::HashSet::new();
        for smp in &out.samples {
            assert!(smp.stratum >= last, "samples must be class-major");
            last = smp.stratum;
            assert_eq!(classify(smp.raw_metric_value, &out.edges), Some(smp.stratum));
            assert!(seen.insert((smp.row, smp.col)), "drawn without replacement");
            assert_eq!(smp.mean_value, 12.35);
        }
    }

    #[test]
    fn thin_class_returns_what_it_has_and_reports_shortfall() {
        // Class 5 of [0, 10] holds only the single value 10.
        let mut values = vec![1.0f32; 24];
        values[0] = 0.0;
        values[23] = 10.0;
        let s = surface(SurfaceMetric::Sq, values, 6);
        let out = stratified_sample(&s, &Binning::equal_width(5).unwrap(), 3, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(out.in_stratum(1).count(), 3);
        assert_eq!(out.in_stratum(5).count(), 1);
        // Classes 2–4 are empty: silently skipped, not shortfalls.
        assert_eq!(out.in_stratum(3).count(), 0);
        assert_eq!(out.shortfalls, vec![Shortfall { stratum: 5, requested: 3, available: 1 }]);
    }

    #[test]
    fn all_nan_surface_is_an_error() {
        let s = surface(SurfaceMetric::Ssk, vec![f32::NAN; 9], 3);
        let err = stratified_sample(&s, &Binning::equal_width(3).unwrap(), 2, &mut StdRng::seed_from_u64(0));
        assert!(matches!(err, Err(Error::EmptyMetricSurface)));
    }

    #[test]
    fn rounding_to_two_places() {
        assert_eq!(round_to(0.12567, 2), 0.13);
        assert_eq!(round_to(-1.005001, 2), -1.01);
        assert_eq!(round_to(42.0, 2), 42.0);
    }
}
