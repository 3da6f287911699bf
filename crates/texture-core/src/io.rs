//! Single-band GeoTIFF reading and writing on top of the `tiff` crate.
//!
//! Georeferencing comes from ModelPixelScale + ModelTiepoint, the CRS from
//! the GeoKeyDirectory (GeographicType / ProjectedCSType keys, or a
//! user-defined Albers projection whose parameters live in GeoDoubleParams)
//! and the no-data marker from the GDAL_NODATA ascii tag.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use log::{debug, warn};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::error::{Error, Result};
use crate::projection::{AlbersParams, Crs, Ellipsoid};
use crate::raster::{GeoTransform, Raster};

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;

const GEOG_GEODETIC_DATUM: u16 = 2050;
const GEOG_ELLIPSOID: u16 = 2056;
const GEOG_SEMI_MAJOR_AXIS: u16 = 2057;
const GEOG_INV_FLATTENING: u16 = 2059;
const PROJ_COORD_TRANS: u16 = 3075;
const PROJ_LINEAR_UNITS: u16 = 3076;
const PROJ_STD_PARALLEL_1: u16 = 3078;
const PROJ_STD_PARALLEL_2: u16 = 3079;
const PROJ_NAT_ORIGIN_LONG: u16 = 3080;
const PROJ_NAT_ORIGIN_LAT: u16 = 3081;
const PROJ_FALSE_EASTING: u16 = 3082;
const PROJ_FALSE_NORTHING: u16 = 3083;
const PROJ_FALSE_ORIGIN_LONG: u16 = 3084;
const PROJ_FALSE_ORIGIN_LAT: u16 = 3085;
const PROJ_FALSE_ORIGIN_EASTING: u16 = 3086;
const PROJ_FALSE_ORIGIN_NORTHING: u16 = 3087;
const PROJ_CENTER_LONG: u16 = 3088;

const CT_ALBERS_EQUAL_AREA: u16 = 11;
const LINEAR_METER: u16 = 9001;
/// Where a key's value is stored, per the GeoKeyDirectory TIFFTagLocation field.
const GEO_DOUBLE_PARAMS: u16 = 34736;

/// Marker written for NaN cells when the raster has none of its own.
pub const DEFAULT_NODATA: f64 = -9999.0;

pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

pub fn read_geotiff_from_buffer(data: &[u8]) -> Result<Raster> {
    decode_geotiff(Cursor::new(data))
}

fn decode_geotiff<R: Read + Seek>(reader: R) -> Result<Raster> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);

    let mut data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => return Err(Error::UnsupportedDataType("expected a single-band numeric TIFF".into())),
    };
    if data.len() != rows * cols {
        // Multi-band or chunky layouts land here.
        return Err(Error::UnsupportedDataType(format!(
            "{} samples for a {}x{} grid; only single-band rasters are supported",
            data.len(),
            cols,
            rows
        )));
    }

    let transform = read_transform(&mut decoder)?;
    let crs = read_crs(&mut decoder);
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse::<f64>().ok());

    if let Some(nd) = nodata {
        let marker = nd as f32;
        for v in data.iter_mut().filter(|v| **v == marker) {
            *v = f32::NAN;
        }
    }
    debug!("decoded {cols}x{rows} GeoTIFF, crs {crs}, nodata {nodata:?}");

    let mut raster = Raster::from_vec(data, cols, rows, transform, crs)?;
    raster.nodata = nodata;
    Ok(raster)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::MissingGeoreference("no ModelPixelScale tag".into()))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::MissingGeoreference("no ModelTiepoint tag".into()))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(Error::MissingGeoreference("short pixel-scale or tiepoint tag".into()));
    }
    // tiepoint = [I, J, K, X, Y, Z]; raster (I, J) maps to model (X, Y).
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Crs {
    let keys = match decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag) {
        Ok(keys) if keys.len() >= 4 => keys,
        _ => return Crs::Unknown,
    };
    let params = decoder.get_tag_f64_vec(Tag::GeoDoubleParamsTag).unwrap_or_default();
    let keys = GeoKeys::parse(&keys, &params);

    match (keys.short(PROJECTED_CS_TYPE), keys.short(GEOGRAPHIC_TYPE), keys.short(GT_MODEL_TYPE)) {
        (Some(code), _, _) if code != USER_DEFINED => Crs::from_epsg(u32::from(code)),
        (Some(_), _, _) => match keys.albers() {
            Some(p) => Crs::AlbersEqualArea(p),
            None => {
                warn!("user-defined projected CRS is not an Albers equal-area projection");
                Crs::Unknown
            }
        },
        (None, Some(code), _) if code != USER_DEFINED => Crs::from_epsg(u32::from(code)),
        (None, _, Some(2)) => Crs::Geographic,
        _ => Crs::Unknown,
    }
}

/// GeoKeyDirectory entries resolved to their values.
struct GeoKeys {
    shorts: HashMap<u16, u16>,
    doubles: HashMap<u16, f64>,
}

impl GeoKeys {
    /// Header: version, revision, minor, key count; then
    /// `[key, location, count, value-or-offset]` entries.
    fn parse(directory: &[u16], params: &[f64]) -> Self {
        let n = directory.get(3).copied().unwrap_or(0) as usize;
        let mut shorts = HashMap::new();
        let mut doubles = HashMap::new();
        for entry in directory[4..].chunks_exact(4).take(n) {
            let (id, location, value) = (entry[0], entry[1], entry[3]);
            match location {
                0 => {
                    shorts.insert(id, value);
                }
                GEO_DOUBLE_PARAMS => {
                    if let Some(&v) = params.get(value as usize) {
                        doubles.insert(id, v);
                    }
                }
                _ => {}
            }
        }
        Self { shorts, doubles }
    }

    fn short(&self, id: u16) -> Option<u16> {
        self.shorts.get(&id).copied()
    }

    /// First of `ids` present as a double key.
    fn double(&self, ids: &[u16]) -> Option<f64> {
        ids.iter().find_map(|id| self.doubles.get(id).copied())
    }

    fn albers(&self) -> Option<AlbersParams> {
        if self.short(PROJ_COORD_TRANS) != Some(CT_ALBERS_EQUAL_AREA) {
            return None;
        }
        Some(AlbersParams {
            ellipsoid: self.ellipsoid(),
            lat_1: self.double(&[PROJ_STD_PARALLEL_1])?,
            lat_2: self.double(&[PROJ_STD_PARALLEL_2])?,
            lat_0: self.double(&[PROJ_NAT_ORIGIN_LAT, PROJ_FALSE_ORIGIN_LAT]).unwrap_or(0.0),
            lon_0: self
                .double(&[PROJ_CENTER_LONG, PROJ_FALSE_ORIGIN_LONG, PROJ_NAT_ORIGIN_LONG])
                .unwrap_or(0.0),
            false_easting: self.double(&[PROJ_FALSE_EASTING, PROJ_FALSE_ORIGIN_EASTING]).unwrap_or(0.0),
            false_northing: self.double(&[PROJ_FALSE_NORTHING, PROJ_FALSE_ORIGIN_NORTHING]).unwrap_or(0.0),
        })
    }

    /// Explicit axes win, then the ellipsoid, geographic CRS and datum codes.
    fn ellipsoid(&self) -> Ellipsoid {
        if let (Some(a), Some(inv_f)) = (self.double(&[GEOG_SEMI_MAJOR_AXIS]), self.double(&[GEOG_INV_FLATTENING])) {
            return Ellipsoid { a, inv_f };
        }
        let coded = [GEOG_ELLIPSOID, GEOGRAPHIC_TYPE, GEOG_GEODETIC_DATUM]
            .iter()
            .filter_map(|&id| self.short(id))
            .find_map(ellipsoid_from_code);
        coded.unwrap_or_else(|| {
            debug!("no ellipsoid in GeoKeyDirectory, assuming GRS80");
            Ellipsoid::GRS80
        })
    }
}

/// EPSG ellipsoid, geographic CRS or datum code for the ellipsoids we carry.
fn ellipsoid_from_code(code: u16) -> Option<Ellipsoid> {
    match code {
        7019 | 4269 | 6269 => Some(Ellipsoid::GRS80),
        7030 | 4326 | 6326 => Some(Ellipsoid::WGS84),
        7008 | 4267 | 6267 => Some(Ellipsoid::CLARKE1866),
        _ => None,
    }
}

fn geographic_code(ellipsoid: &Ellipsoid) -> Option<u16> {
    [4269, 4326, 4267].into_iter().find(|&c| ellipsoid_from_code(c).as_ref() == Some(ellipsoid))
}

/// Write a raster as a Float32 GeoTIFF. NaN cells become the no-data marker.
pub fn write_geotiff<P: AsRef<Path>>(raster: &Raster, path: P) -> Result<()> {
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, file)
}

pub fn write_geotiff_to_buffer(raster: &Raster) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_geotiff<W: Write + Seek>(raster: &Raster, writer: W) -> Result<()> {
    let nodata = raster.nodata.unwrap_or(DEFAULT_NODATA);
    let data: Vec<f32> = raster
        .data
        .iter()
        .map(|&v| if v.is_nan() { nodata as f32 } else { v })
        .collect();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(raster.width as u32, raster.height as u32)?;

    let gt = raster.transform;
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    let (directory, params) = geokeys(&raster.crs);
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &directory[..])?;
    if !params.is_empty() {
        image.encoder().write_tag(Tag::GeoDoubleParamsTag, &params[..])?;
    }
    image.encoder().write_tag(Tag::GdalNodata, format!("{nodata}").as_str())?;

    image.write_data(&data)?;
    Ok(())
}

/// GeoKeyDirectory shorts plus the GeoDoubleParams they point into.
fn geokeys(crs: &Crs) -> (Vec<u16>, Vec<f64>) {
    let mut entries: Vec<[u16; 4]> = vec![[GT_RASTER_TYPE, 0, 1, 1]];
    let mut params = Vec::new();
    match (crs, crs.epsg()) {
        (Crs::Geographic, Some(code)) => {
            entries.insert(0, [GT_MODEL_TYPE, 0, 1, 2]);
            entries.push([GEOGRAPHIC_TYPE, 0, 1, code as u16]);
        }
        (_, Some(code)) if code <= u32::from(u16::MAX) => {
            entries.insert(0, [GT_MODEL_TYPE, 0, 1, 1]);
            entries.push([PROJECTED_CS_TYPE, 0, 1, code as u16]);
        }
        (Crs::AlbersEqualArea(p), None) => {
            entries.insert(0, [GT_MODEL_TYPE, 0, 1, 1]);
            entries.push([PROJECTED_CS_TYPE, 0, 1, USER_DEFINED]);
            entries.push([PROJ_COORD_TRANS, 0, 1, CT_ALBERS_EQUAL_AREA]);
            entries.push([PROJ_LINEAR_UNITS, 0, 1, LINEAR_METER]);
            let mut doubles = vec![
                (PROJ_STD_PARALLEL_1, p.lat_1),
                (PROJ_STD_PARALLEL_2, p.lat_2),
                (PROJ_NAT_ORIGIN_LAT, p.lat_0),
                (PROJ_FALSE_EASTING, p.false_easting),
                (PROJ_FALSE_NORTHING, p.false_northing),
                (PROJ_CENTER_LONG, p.lon_0),
            ];
            match geographic_code(&p.ellipsoid) {
                Some(code) => entries.push([GEOGRAPHIC_TYPE, 0, 1, code]),
                None => {
                    entries.push([GEOGRAPHIC_TYPE, 0, 1, USER_DEFINED]);
                    doubles.push((GEOG_SEMI_MAJOR_AXIS, p.ellipsoid.a));
                    doubles.push((GEOG_INV_FLATTENING, p.ellipsoid.inv_f));
                }
            }
            for (id, v) in doubles {
                entries.push([id, GEO_DOUBLE_PARAMS, 1, params.len() as u16]);
                params.push(v);
            }
        }
        _ => entries.insert(0, [GT_MODEL_TYPE, 0, 1, 1]),
    }
    // Keys must be sorted by id.
    entries.sort_by_key(|e| e[0]);
    let mut out = vec![1, 1, 0, entries.len() as u16];
    out.extend(entries.iter().flatten());
    (out, params)
}
