mod detrend;
mod focal;
pub mod kernels;
mod window;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use detrend::remove_plane;
pub use focal::{compute_metric, focal_mean, MetricSurface};
pub use window::{ProcessingMode, WindowSize};

/// Windowed surface metrics, named after their ISO 25178 areal parameters.
/// Serialized by short name; deserialized through [`FromStr`], so aliases
/// are accepted wherever a metric name is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SurfaceMetric {
    /// Arithmetic mean height deviation.
    Sa,
    /// Root-mean-square height.
    Sq,
    /// Skewness of the height distribution.
    Ssk,
    /// Kurtosis of the height distribution.
    Sku,
    /// Root-mean-square slope.
    Sdq,
    /// Developed interfacial area ratio, percent.
    Sdr,
}

impl SurfaceMetric {
    pub const ALL: &'static [SurfaceMetric] = &[
        Self::Sa,
        Self::Sq,
        Self::Ssk,
        Self::Sku,
        Self::Sdq,
        Self::Sdr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sa => "sa",
            Self::Sq => "sq",
            Self::Ssk => "ssk",
            Self::Sku => "sku",
            Self::Sdq => "sdq",
            Self::Sdr => "sdr",
        }
    }

    /// Per-window kernel: `values` is a full `side`×`side` window, row-major.
    pub fn evaluate(&self, values: &[f64], side: usize, cell_size: f64) -> f64 {
        match self {
            Self::Sa => kernels::sa(values),
            Self::Sq => kernels::sq(values),
            Self::Ssk => kernels::ssk(values),
            Self::Sku => kernels::sku(values),
            Self::Sdq => kernels::sdq(values, side, cell_size),
            Self::Sdr => kernels::sdr(values, side, cell_size),
        }
    }
}

impl FromStr for SurfaceMetric {
    type Err = Error;

    /// Accepts the short parameter names plus descriptive aliases.
    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sa" | "mean_roughness" => Ok(Self::Sa),
            "sq" | "rms_roughness" => Ok(Self::Sq),
            "ssk" | "skewness" => Ok(Self::Ssk),
            "sku" | "kurtosis" => Ok(Self::Sku),
            "sdq" | "rms_slope" => Ok(Self::Sdq),
            "sdr" | "surface_area_ratio" => Ok(Self::Sdr),
            _ => Err(Error::UnsupportedMetric(s.to_string())),
        }
    }
}

impl TryFrom<String> for SurfaceMetric {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<SurfaceMetric> for String {
    fn from(m: SurfaceMetric) -> String {
        m.name().to_string()
    }
}

impl fmt::Display for SurfaceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("skewness".parse::<SurfaceMetric>().unwrap(), SurfaceMetric::Ssk);
        assert_eq!("rms_slope".parse::<SurfaceMetric>().unwrap(), SurfaceMetric::Sdq);
        assert_eq!("SDR".parse::<SurfaceMetric>().unwrap(), SurfaceMetric::Sdr);
        for m in SurfaceMetric::ALL {
            assert_eq!(m.name().parse::<SurfaceMetric>().unwrap(), *m);
        }
    }

    #[test]
    fn unknown_name_is_unsupported() {
        let err = "lacunarity".parse::<SurfaceMetric>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedMetric(ref n) if n == "lacunarity"));
    }

    #[test]
    fn serde_uses_short_names_and_accepts_aliases() {
        assert_eq!(serde_json::to_string(&SurfaceMetric::Sdq).unwrap(), "\"sdq\"");
        let m: SurfaceMetric = serde_json::from_str("\"kurtosis\"").unwrap();
        assert_eq!(m, SurfaceMetric::Sku);
        assert!(serde_json::from_str::<SurfaceMetric>("\"wobble\"").is_err());
    }
}
