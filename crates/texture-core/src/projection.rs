//! Coordinate reference systems and the Albers equal-area conic projection.
//!
//! Windowed surface metrics assume square, equal-area cells, so sources in
//! geographic coordinates are resampled onto an Albers grid before any
//! metric is computed. Formulas follow Snyder (1987), "Map Projections —
//! A Working Manual", pp. 98–103 (ellipsoidal form).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reference ellipsoid: semi-major axis (m) and inverse flattening.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const GRS80: Self = Self { a: 6_378_137.0, inv_f: 298.257_222_101 };
    pub const WGS84: Self = Self { a: 6_378_137.0, inv_f: 298.257_223_563 };
    pub const CLARKE1866: Self = Self { a: 6_378_206.4, inv_f: 294.978_698_2 };

    fn e2(&self) -> f64 {
        let f = 1.0 / self.inv_f;
        f * (2.0 - f)
    }
}

/// Albers equal-area conic parameters. Angles in degrees, offsets in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlbersParams {
    pub ellipsoid: Ellipsoid,
    pub lat_1: f64,
    pub lat_2: f64,
    pub lat_0: f64,
    pub lon_0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

/// Derived projection constants (n, C, ρ0).
struct Cone {
    a: f64,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl AlbersParams {
    /// NAD83 / Conus Albers (EPSG:5070).
    pub const CONUS: Self = Self {
        ellipsoid: Ellipsoid::GRS80,
        lat_1: 29.5,
        lat_2: 45.5,
        lat_0: 23.0,
        lon_0: -96.0,
        false_easting: 0.0,
        false_northing: 0.0,
    };

    fn cone(&self) -> Cone {
        let a = self.ellipsoid.a;
        let e2 = self.ellipsoid.e2();
        let e = e2.sqrt();
        let m = |phi: f64| phi.cos() / (1.0 - e2 * phi.sin().powi(2)).sqrt();
        let q = |phi: f64| authalic_q(phi, e, e2);

        let (p1, p2, p0) = (self.lat_1.to_radians(), self.lat_2.to_radians(), self.lat_0.to_radians());
        let (m1, m2) = (m(p1), m(p2));
        let (q1, q2, q0) = (q(p1), q(p2), q(p0));

        let n = if (self.lat_1 - self.lat_2).abs() < 1e-10 {
            p1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = a * (c - n * q0).sqrt() / n;
        Cone { a, e, e2, n, c, rho0 }
    }

    /// (lon, lat) degrees → (x, y) metres.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let k = self.cone();
        let q = authalic_q(lat.to_radians(), k.e, k.e2);
        let rho = k.a * (k.c - k.n * q).max(0.0).sqrt() / k.n;
        let theta = k.n * wrap_lon(lon - self.lon_0).to_radians();
        (
            self.false_easting + rho * theta.sin(),
            self.false_northing + k.rho0 - rho * theta.cos(),
        )
    }

    /// (x, y) metres → (lon, lat) degrees. Latitude by fixed-point iteration.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let k = self.cone();
        let mut dx = x - self.false_easting;
        let mut dy = k.rho0 - (y - self.false_northing);
        let mut rho = (dx * dx + dy * dy).sqrt();
        if k.n < 0.0 {
            rho = -rho;
            dx = -dx;
            dy = -dy;
        }
        let theta = dx.atan2(dy);
        let q = (k.c - rho * rho * k.n * k.n / (k.a * k.a)) / k.n;
        let lon = self.lon_0 + (theta / k.n).to_degrees();

        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..25 {
            let s = phi.sin();
            let es2 = 1.0 - k.e2 * s * s;
            let delta = es2 * es2 / (2.0 * phi.cos())
                * (q / (1.0 - k.e2) - s / es2
                    + (1.0 / (2.0 * k.e)) * ((1.0 - k.e * s) / (1.0 + k.e * s)).ln());
            phi += delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }
        (wrap_lon(lon), phi.to_degrees())
    }
}

fn authalic_q(phi: f64, e: f64, e2: f64) -> f64 {
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

fn wrap_lon(lon: f64) -> f64 {
    let mut l = lon;
    while l > 180.0 {
        l -= 360.0;
    }
    while l < -180.0 {
        l += 360.0;
    }
    l
}

/// Coordinate reference system of a raster or extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Crs {
    /// Longitude/latitude in degrees (EPSG:4326, EPSG:4269).
    Geographic,
    AlbersEqualArea(AlbersParams),
    /// Any other EPSG code. Only comparable by code; cannot be reprojected.
    Epsg { code: u32 },
    /// File carried no usable georeferencing keys.
    Unknown,
}

impl Crs {
    pub fn albers_conus() -> Self {
        Crs::AlbersEqualArea(AlbersParams::CONUS)
    }

    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 | 4269 | 4258 => Crs::Geographic,
            5070 => Crs::albers_conus(),
            code => Crs::Epsg { code },
        }
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Geographic => Some(4326),
            Crs::AlbersEqualArea(p) if *p == AlbersParams::CONUS => Some(5070),
            Crs::AlbersEqualArea(_) => None,
            Crs::Epsg { code } => Some(*code),
            Crs::Unknown => None,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic)
    }

    /// Parse `EPSG:<code>` or a PROJ string such as
    /// `+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +datum=NAD83 +units=m`.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if let Some(code) = spec
            .strip_prefix("EPSG:")
            .or_else(|| spec.strip_prefix("epsg:"))
        {
            let code = code.trim().parse::<u32>().map_err(|_| invalid_crs(spec, "bad EPSG code"))?;
            return Ok(Crs::from_epsg(code));
        }

        let mut proj = None;
        let mut ellipsoid = Ellipsoid::GRS80;
        let mut p = AlbersParams::CONUS;
        for token in spec.split_whitespace() {
            let token = token.trim_start_matches('+');
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            let num = || value.parse::<f64>().map_err(|_| invalid_crs(spec, key));
            match key {
                "proj" => proj = Some(value.to_string()),
                "lat_1" => p.lat_1 = num()?,
                "lat_2" => p.lat_2 = num()?,
                "lat_0" => p.lat_0 = num()?,
                "lon_0" => p.lon_0 = num()?,
                "x_0" => p.false_easting = num()?,
                "y_0" => p.false_northing = num()?,
                "datum" | "ellps" => {
                    ellipsoid = match value {
                        "NAD83" | "GRS80" => Ellipsoid::GRS80,
                        "WGS84" => Ellipsoid::WGS84,
                        "NAD27" | "clrk66" => Ellipsoid::CLARKE1866,
                        _ => return Err(invalid_crs(spec, "unknown datum")),
                    }
                }
                "units" if value != "m" => return Err(invalid_crs(spec, "only metre units are supported")),
                _ => {}
            }
        }
        p.ellipsoid = ellipsoid;

        match proj.as_deref() {
            Some("aea") => Ok(Crs::AlbersEqualArea(p)),
            Some("longlat") | Some("latlong") => Ok(Crs::Geographic),
            _ => Err(invalid_crs(spec, "expected +proj=aea or +proj=longlat")),
        }
    }
}

fn invalid_crs(spec: &str, reason: &str) -> Error {
    Error::InvalidParameter {
        name: "projection",
        value: spec.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Geographic => write!(f, "geographic (lon/lat)"),
            Crs::AlbersEqualArea(p) => write!(
                f,
                "+proj=aea +lat_1={} +lat_2={} +lat_0={} +lon_0={} +x_0={} +y_0={} +units=m",
                p.lat_1, p.lat_2, p.lat_0, p.lon_0, p.false_easting, p.false_northing
            ),
            Crs::Epsg { code } => write!(f, "EPSG:{code}"),
            Crs::Unknown => write!(f, "unknown CRS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn snyder_worked_example() {
        // Snyder (1987) p. 292: Clarke 1866, φ1=29.5, φ2=45.5, φ0=23, λ0=-96.
        let p = AlbersParams { ellipsoid: Ellipsoid::CLARKE1866, ..AlbersParams::CONUS };
        let (x, y) = p.forward(-75.0, 35.0);
        assert_abs_diff_eq!(x, 1_885_472.7, epsilon = 1.0);
        assert_abs_diff_eq!(y, 1_535_925.0, epsilon = 1.0);
    }

    #[test]
    fn inverse_round_trips_forward() {
        let p = AlbersParams::CONUS;
        for &(lon, lat) in &[(-96.0, 23.0), (-84.3, 35.6), (-120.5, 47.1), (-70.0, 25.0)] {
            let (x, y) = p.forward(lon, lat);
            let (lon2, lat2) = p.inverse(x, y);
            assert_abs_diff_eq!(lon, lon2, epsilon = 1e-8);
            assert_abs_diff_eq!(lat, lat2, epsilon = 1e-8);
        }
    }

    #[test]
    fn origin_maps_to_false_offsets() {
        let p = AlbersParams { false_easting: 500.0, false_northing: -200.0, ..AlbersParams::CONUS };
        let (x, y) = p.forward(p.lon_0, p.lat_0);
        assert_abs_diff_eq!(x, 500.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, -200.0, epsilon = 1e-6);
    }

    #[test]
    fn parse_proj_string() {
        let crs = Crs::parse(
            "+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs",
        )
        .unwrap();
        assert_eq!(crs, Crs::albers_conus());
        assert_eq!(crs.epsg(), Some(5070));
    }

    #[test]
    fn parse_epsg_codes() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::Geographic);
        assert_eq!(Crs::parse("EPSG:5070").unwrap(), Crs::albers_conus());
        assert_eq!(Crs::parse("EPSG:32617").unwrap(), Crs::Epsg { code: 32617 });
    }

    #[test]
    fn parse_rejects_non_metre_units_and_unknown_proj() {
        assert!(Crs::parse("+proj=aea +lat_1=29.5 +lat_2=45.5 +units=us-ft").is_err());
        assert!(Crs::parse("+proj=merc +datum=WGS84").is_err());
    }
}
