//! Fixed colour ramp over fixed value breaks for the source variable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// RGB colour, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Straight blend towards `other` by `t` in [0, 1].
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }
}

impl FromStr for Rgb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidParameter {
            name: "colour",
            value: s.to_string(),
            reason: "expected #rrggbb".into(),
        };
        let hex = s.strip_prefix('#').ok_or_else(bad)?;
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(bad());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad());
        Ok(Rgb::new(byte(0)?, byte(2)?, byte(4)?))
    }
}

impl TryFrom<String> for Rgb {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> String {
        c.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Diverging brown → cream → green, for percent cover.
pub const COVER_STOPS: &[Rgb] = &[
    Rgb::new(140, 81, 10),
    Rgb::new(216, 179, 101),
    Rgb::new(246, 232, 195),
    Rgb::new(166, 217, 106),
    Rgb::new(26, 150, 65),
];

/// Piecewise-constant ramp: every break interval gets one colour, sampled
/// evenly along `stops`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRamp {
    pub stops: Vec<Rgb>,
    /// Ascending; `breaks.len() - 1` colour classes.
    pub breaks: Vec<f64>,
}

impl Default for ColorRamp {
    /// Cover ramp over 0–100 in steps of 10.
    fn default() -> Self {
        Self { stops: COVER_STOPS.to_vec(), breaks: (0..=10).map(|i| i as f64 * 10.0).collect() }
    }
}

impl ColorRamp {
    pub fn new(stops: Vec<Rgb>, breaks: Vec<f64>) -> Result<Self> {
        let ramp = Self { stops, breaks };
        ramp.validate()?;
        Ok(ramp)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stops.is_empty() {
            return Err(Error::InvalidParameter {
                name: "ramp",
                value: "[]".into(),
                reason: "needs at least one colour".into(),
            });
        }
        if self.breaks.len() < 2 || !self.breaks.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidParameter {
                name: "breaks",
                value: format!("{:?}", self.breaks),
                reason: "need at least two strictly ascending breaks".into(),
            });
        }
        Ok(())
    }

    pub fn classes(&self) -> usize {
        self.breaks.len().saturating_sub(1)
    }

    /// Colour of break interval `i` (0-based).
    pub fn interval_color(&self, i: usize) -> Rgb {
        let n = self.classes();
        if self.stops.len() == 1 || n <= 1 {
            return self.stops[0];
        }
        let t = i.min(n - 1) as f64 / (n - 1) as f64;
        let pos = t * (self.stops.len() - 1) as f64;
        let lo = (pos.floor() as usize).min(self.stops.len() - 2);
        self.stops[lo].lerp(self.stops[lo + 1], pos - lo as f64)
    }

    /// All interval colours, lowest first.
    pub fn palette(&self) -> Vec<Rgb> {
        (0..self.classes()).map(|i| self.interval_color(i)).collect()
    }

    /// Colour for `value`; values beyond the outer breaks take the end
    /// colours. NaN has no colour.
    pub fn color_for(&self, value: f64) -> Option<Rgb> {
        if value.is_nan() {
            return None;
        }
        let i = self.breaks.partition_point(|&b| b <= value).saturating_sub(1);
        Some(self.interval_color(i))
    }

    /// RGBA for `value`, fully transparent for NaN.
    pub fn rgba_for(&self, value: f64) -> [u8; 4] {
        self.color_for(value).map(Rgb::to_rgba).unwrap_or([0, 0, 0, 0])
    }
}
