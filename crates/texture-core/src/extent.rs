//! Crop extent: polygon(s) read from GeoJSON, with point-in-polygon masking.

use std::fs;
use std::path::Path;

use geo::{BoundingRect, Contains, Coord, Densify, Geometry, MapCoords, MultiPolygon, Point, Polygon, Rect};
use geojson::GeoJson;

use crate::error::{Error, Result};
use crate::projection::Crs;
use crate::raster::Bounds;

/// Vertices added per bounding-box side when an extent is reprojected.
const DENSIFY_STEPS: f64 = 64.0;

/// Union of polygons in a single CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    pub polygons: MultiPolygon<f64>,
    pub crs: Crs,
}

impl Extent {
    /// Axis-aligned rectangle, mostly useful for tests and bbox-only crops.
    pub fn rectangle(bounds: Bounds, crs: Crs) -> Self {
        let rect = Rect::new(
            Coord { x: bounds.min_x, y: bounds.min_y },
            Coord { x: bounds.max_x, y: bounds.max_y },
        );
        Self { polygons: MultiPolygon::new(vec![rect.to_polygon()]), crs }
    }

    pub fn bounds(&self) -> Bounds {
        match self.polygons.bounding_rect() {
            Some(r) => Bounds { min_x: r.min().x, max_x: r.max().x, min_y: r.min().y, max_y: r.max().y },
            None => Bounds {
                min_x: f64::INFINITY,
                max_x: f64::NEG_INFINITY,
                min_y: f64::INFINITY,
                max_y: f64::NEG_INFINITY,
            },
        }
    }

    /// Inside an exterior ring and outside all of its holes.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygons.contains(&Point::new(x, y))
    }

    /// Re-express the extent in `target`, densifying edges so curved
    /// projected boundaries stay close to the true outline.
    pub fn to_crs(&self, target: &Crs) -> Result<Extent> {
        if &self.crs == target {
            return Ok(self.clone());
        }
        let project: Box<dyn Fn(f64, f64) -> (f64, f64)> = match (&self.crs, target) {
            (Crs::Geographic, Crs::AlbersEqualArea(p)) => {
                let p = *p;
                Box::new(move |x, y| p.forward(x, y))
            }
            (Crs::AlbersEqualArea(p), Crs::Geographic) => {
                let p = *p;
                Box::new(move |x, y| p.inverse(x, y))
            }
            (from, to) => {
                return Err(Error::ProjectionMismatch {
                    raster: to.to_string(),
                    extent: from.to_string(),
                    reason: "no transformation between these reference systems".into(),
                })
            }
        };
        let b = self.bounds();
        let step = (b.max_x - b.min_x).max(b.max_y - b.min_y) / DENSIFY_STEPS;
        let dense = if step > 0.0 { self.polygons.densify(step) } else { self.polygons.clone() };
        let polygons = dense.map_coords(|Coord { x, y }| {
            let (x, y) = project(x, y);
            Coord { x, y }
        });
        Ok(Extent { polygons, crs: target.clone() })
    }
}

/// Read a Polygon/MultiPolygon extent from a GeoJSON file.
pub fn read_extent<P: AsRef<Path>>(path: P) -> Result<Extent> {
    let text = fs::read_to_string(path.as_ref())?;
    parse_extent(&text)
}

/// Parse GeoJSON text. RFC 7946 coordinates are lon/lat; a legacy `crs`
/// member naming an EPSG code overrides that.
pub fn parse_extent(text: &str) -> Result<Extent> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let crs = match value.pointer("/crs/properties/name").and_then(|n| n.as_str()) {
        Some(name) => crs_from_name(name)?,
        None => Crs::Geographic,
    };

    let geometries: Vec<geojson::Geometry> = match GeoJson::from_json_value(value)? {
        GeoJson::Geometry(g) => vec![g],
        GeoJson::Feature(f) => f.geometry.into_iter().collect(),
        GeoJson::FeatureCollection(fc) => fc.features.into_iter().filter_map(|f| f.geometry).collect(),
    };

    let mut polygons = Vec::new();
    for g in geometries {
        collect_polygons(Geometry::<f64>::try_from(g)?, &mut polygons);
    }
    if polygons.is_empty() {
        return Err(Error::GeoJson("no Polygon or MultiPolygon geometry found".into()));
    }
    Ok(Extent { polygons: MultiPolygon::new(polygons), crs })
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

/// `EPSG:5070`, `urn:ogc:def:crs:EPSG::5070`, `urn:ogc:def:crs:OGC:1.3:CRS84`.
fn crs_from_name(name: &str) -> Result<Crs> {
    if name.ends_with("CRS84") {
        return Ok(Crs::Geographic);
    }
    let code = name
        .rsplit(':')
        .next()
        .and_then(|c| c.parse::<u32>().ok())
        .ok_or_else(|| Error::GeoJson(format!("unrecognised crs name {name:?}")))?;
    Ok(Crs::from_epsg(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE_WITH_HOLE: &str = r#"{
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Polygon",
            "coordinates": [
                [[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]],
                [[4, 4], [6, 4], [6, 6], [4, 6], [4, 4]]
            ]
        }
    }"#;

    #[test]
    fn polygon_with_hole_contains() {
        let e = parse_extent(SQUARE_WITH_HOLE).unwrap();
        assert_eq!(e.crs, Crs::Geographic);
        assert!(e.contains(1.0, 1.0));
        assert!(!e.contains(5.0, 5.0));
        assert!(!e.contains(11.0, 5.0));
        let b = e.bounds();
        assert_eq!((b.min_x, b.max_x, b.min_y, b.max_y), (0.0, 10.0, 0.0, 10.0));
    }

    #[test]
    fn legacy_crs_member_is_honoured() {
        let text = r#"{
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::5070" } },
            "features": [{
                "type": "Feature", "properties": {},
                "geometry": { "type": "MultiPolygon", "coordinates": [[[[0,0],[1,0],[1,1],[0,0]]]] }
            }]
        }"#;
        let e = parse_extent(text).unwrap();
        assert_eq!(e.crs, Crs::albers_conus());
        assert_eq!(e.polygons.0.len(), 1);
    }

    #[test]
    fn point_geometry_is_rejected() {
        let text = r#"{ "type": "Point", "coordinates": [1, 2] }"#;
        assert!(matches!(parse_extent(text), Err(Error::GeoJson(_))));
    }

    #[test]
    fn geographic_extent_projects_to_albers() {
        let e = Extent::rectangle(
            Bounds { min_x: -84.0, max_x: -83.0, min_y: 35.0, max_y: 36.0 },
            Crs::Geographic,
        );
        let p = e.to_crs(&Crs::albers_conus()).unwrap();
        let (cx, cy) = crate::projection::AlbersParams::CONUS.forward(-83.5, 35.5);
        assert!(p.contains(cx, cy));
        assert!(e.to_crs(&Crs::Epsg { code: 32617 }).is_err());
    }

    #[test]
    fn reprojected_extent_keeps_holes_and_gains_vertices() {
        let text = r#"{
            "type": "Polygon",
            "coordinates": [
                [[-84, 35], [-83, 35], [-83, 36], [-84, 36], [-84, 35]],
                [[-83.6, 35.4], [-83.4, 35.4], [-83.4, 35.6], [-83.6, 35.6], [-83.6, 35.4]]
            ]
        }"#;
        let e = parse_extent(text).unwrap();
        let p = e.to_crs(&Crs::albers_conus()).unwrap();
        let poly = &p.polygons.0[0];
        assert_eq!(poly.interiors().len(), 1);
        assert!(poly.exterior().0.len() > e.polygons.0[0].exterior().0.len());

        let albers = crate::projection::AlbersParams::CONUS;
        let (hx, hy) = albers.forward(-83.5, 35.5);
        let (sx, sy) = albers.forward(-83.8, 35.2);
        assert!(!p.contains(hx, hy));
        assert!(p.contains(sx, sy));
        let b = p.bounds();
        assert!(b.min_x < sx && sx < b.max_x && b.min_y < sy && sy < b.max_y);
    }
}
