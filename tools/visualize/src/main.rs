//! Static tile-grid renderer: turns a scene JSON written by `stratify` into a
//! PNG with one height-mapped surface per tile, one row per class, each tile
//! labelled with its metric value and local mean.
//!
//! Labels need a TrueType font (`--font`, or a common system font). The same
//! captions also go to a `.txt` sidecar next to the image.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use clap::Parser;
use image::{ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_polygon_mut, draw_text_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::{info, warn};
use texture_core::color::Rgb;
use texture_core::scene::{Camera, Panel, Scene, SceneRenderer};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render a tile scene JSON to a PNG grid")]
struct Args {
    /// Scene JSON produced by `stratify`
    scene: PathBuf,

    /// Output PNG (defaults to the scene path with a .png extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Panel edge length in pixels
    #[arg(long, default_value = "240")]
    panel_px: u32,

    /// Rotate the shared camera by this many degrees of azimuth
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    rotate: f64,

    /// Tilt the shared camera by this many degrees of elevation
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    tilt: f64,

    /// TrueType font for panel labels (defaults to a system sans font)
    #[arg(long)]
    font: Option<PathBuf>,
}

// ── Rasterisation helpers ────────────────────────────────────────────────────

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FRAME: Rgba<u8> = Rgba([200, 200, 200, 255]);
const LABEL: Rgba<u8> = Rgba([30, 30, 30, 255]);
const LEGEND_PX: u32 = 16;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

fn read_font(path: &Path) -> Result<FontVec> {
    let bytes = fs::read(path).with_context(|| format!("Cannot read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).with_context(|| format!("Invalid font {}", path.display()))
}

/// An explicit font must load; otherwise the first usable system font, if any.
fn load_font(explicit: Option<&Path>) -> Result<Option<FontVec>> {
    if let Some(path) = explicit {
        return read_font(path).map(Some);
    }
    let found = SYSTEM_FONTS.iter().map(Path::new).filter(|p| p.exists()).find_map(|p| read_font(p).ok());
    if found.is_none() {
        warn!("no system font found; panel labels only go to the caption file (use --font)");
    }
    Ok(found)
}

fn shade(c: Rgb, f: f64) -> Rgba<u8> {
    let s = |v: u8| (v as f64 * f).round().clamp(0.0, 255.0) as u8;
    Rgba([s(c.r), s(c.g), s(c.b), 255])
}

/// Pixel polygon for `draw_polygon_mut`: no repeated vertices and an open
/// ring. `None` when fewer than three distinct points remain.
fn to_polygon(pts: &[(f64, f64)]) -> Option<Vec<Point<i32>>> {
    let mut points: Vec<Point<i32>> = pts.iter().map(|&(x, y)| Point::new(x.round() as i32, y.round() as i32)).collect();
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    (points.len() >= 3).then_some(points)
}

fn fill(img: &mut RgbaImage, pts: &[(f64, f64)], color: Rgba<u8>) {
    if let Some(points) = to_polygon(pts) {
        draw_polygon_mut(img, &points, color);
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Oblique height-column view of every panel through the shared camera,
/// cells drawn back to front.
struct PngRenderer {
    panel_px: u32,
    font: Option<FontVec>,
}

impl PngRenderer {
    fn canvas_size(&self, scene: &Scene) -> (u32, u32) {
        let cols = scene.columns.max(1) as u32;
        let rows = scene.rows.max(1) as u32;
        (cols * self.panel_px, rows * self.panel_px + LEGEND_PX)
    }

    fn label_scale(&self) -> PxScale {
        PxScale::from((self.panel_px as f32 / 16.0).clamp(9.0, 18.0))
    }

    fn draw_panel(&self, img: &mut RgbaImage, scene: &Scene, panel: &Panel) {
        let cam: &Camera = &scene.camera;
        let size = self.panel_px as f64;
        let ox = panel.col as f64 * size;
        let oy = panel.row as f64 * size;
        // Projected points of a unit panel stay within ~1.3 units; keep a margin.
        let scale = size / 1.6;
        let to_px = |(sx, sy, _): (f64, f64, f64)| (ox + size / 2.0 + sx * scale, oy + size * 0.6 - sy * scale);

        let (w, h) = (panel.width as f64, panel.height as f64);
        let corner = |r: f64, c: f64| (c / w - 0.5, 0.5 - r / h);

        let mut cells: Vec<(f64, usize, usize)> = Vec::with_capacity(panel.width * panel.height);
        for r in 0..panel.height {
            for c in 0..panel.width {
                if panel.height_at(r, c).is_some() {
                    let (x, y) = corner(r as f64 + 0.5, c as f64 + 0.5);
                    cells.push((cam.project(x, y, 0.0).2, r, c));
                }
            }
        }
        cells.sort_by(|a, b| b.0.total_cmp(&a.0));

        let (sa, ca) = cam.azimuth.to_radians().sin_cos();
        for (_, r, c) in cells {
            let Some(hgt) = panel.height_at(r, c) else { continue };
            let color = panel.colors[r * panel.width + c].unwrap_or(Rgb::new(128, 128, 128));
            let z = scene.normalize(hgt);
            let (rf, cf) = (r as f64, c as f64);
            let quad = [corner(rf, cf), corner(rf, cf + 1.0), corner(rf + 1.0, cf + 1.0), corner(rf + 1.0, cf)];

            // Side faces: outward normals +y, +x, -y, -x in quad edge order.
            let normals = [(0.0, 1.0), (1.0, 0.0), (0.0, -1.0), (-1.0, 0.0)];
            for (i, (nx, ny)) in normals.iter().enumerate() {
                if nx * sa + ny * ca >= 0.0 {
                    continue;
                }
                let (a, b) = (quad[i], quad[(i + 1) % 4]);
                let face = [
                    to_px(cam.project(a.0, a.1, 0.0)),
                    to_px(cam.project(b.0, b.1, 0.0)),
                    to_px(cam.project(b.0, b.1, z)),
                    to_px(cam.project(a.0, a.1, z)),
                ];
                fill(img, &face, shade(color, 0.65));
            }
            let top: Vec<(f64, f64)> = quad.iter().map(|&(x, y)| to_px(cam.project(x, y, z))).collect();
            fill(img, &top, shade(color, 1.0));
        }

        let (x0, y0) = (panel.col as u32 * self.panel_px, panel.row as u32 * self.panel_px);
        draw_hollow_rect_mut(img, Rect::at(x0 as i32, y0 as i32).of_size(self.panel_px, self.panel_px), FRAME);
        if let Some(font) = &self.font {
            draw_text_mut(img, LABEL, x0 as i32 + 4, y0 as i32 + 3, self.label_scale(), font, &panel.annotation);
        }
    }

    fn draw_legend(&self, img: &mut RgbaImage, scene: &Scene) {
        let palette = scene.ramp.palette();
        if palette.is_empty() {
            return;
        }
        let top = (img.height() - LEGEND_PX) as i32;
        let step = img.width() as f64 / palette.len() as f64;
        for (i, c) in palette.iter().enumerate() {
            let x0 = (i as f64 * step).round() as i32;
            let x1 = ((i + 1) as f64 * step).round() as i32;
            if x1 > x0 {
                draw_filled_rect_mut(img, Rect::at(x0, top).of_size((x1 - x0) as u32, LEGEND_PX), shade(*c, 1.0));
            }
        }
    }

    fn captions(scene: &Scene) -> String {
        let mut out = format!("{}\n", scene.title);
        for p in &scene.panels {
            out.push_str(&format!("class {} [{}, {}]: {}\n", p.stratum, p.row, p.col, p.annotation));
        }
        out
    }
}

impl SceneRenderer for PngRenderer {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn render(&self, scene: &Scene) -> texture_core::Result<Vec<u8>> {
        let (w, h) = self.canvas_size(scene);
        let mut img = RgbaImage::from_pixel(w, h, BACKGROUND);
        for panel in &scene.panels {
            self.draw_panel(&mut img, scene, panel);
        }
        self.draw_legend(&mut img, scene);

        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| texture_core::Error::Io(std::io::Error::other(e)))?;
        Ok(bytes)
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let bytes = fs::read(&args.scene).with_context(|| format!("Cannot read {}", args.scene.display()))?;
    let mut scene =
        Scene::from_json(&bytes).with_context(|| format!("Cannot parse scene {}", args.scene.display()))?;
    scene.camera.rotate(args.rotate, args.tilt);
    info!(
        "{}: {} panels in {}x{}, camera az {:.0}° el {:.0}°",
        scene.title, scene.panels.len(), scene.rows, scene.columns, scene.camera.azimuth, scene.camera.elevation
    );

    let font = load_font(args.font.as_deref())?;
    let renderer = PngRenderer { panel_px: args.panel_px.max(16), font };
    let output = args.output.unwrap_or_else(|| args.scene.with_extension(renderer.extension()));
    renderer
        .render_to_file(&scene, &output)
        .with_context(|| format!("Cannot render {}", output.display()))?;

    let captions = output.with_extension("txt");
    fs::write(&captions, PngRenderer::captions(&scene))
        .with_context(|| format!("Cannot write {}", captions.display()))?;
    println!("{}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use texture_core::color::ColorRamp;
    use texture_core::metrics::{SurfaceMetric, WindowSize};
    use texture_core::projection::Crs;
    use texture_core::raster::{GeoTransform, Raster};
    use texture_core::sampling::{Sample, StratifiedSample};
    use texture_core::tiles::build_tiles;

    fn scene() -> Scene {
        let mut src = Raster::new(20, 20, GeoTransform::square(0.0, 600.0, 30.0), Crs::albers_conus(), 0.0);
        for (i, v) in src.data.iter_mut().enumerate() {
            *v = (i % 97) as f32;
        }
        let samples = [(5, 5, 1), (6, 12, 1), (14, 8, 2)]
            .iter()
            .map(|&(row, col, stratum)| {
                let (x, y) = src.transform.pixel_to_geo(row, col);
                Sample { row, col, x, y, stratum, metric_value: 0.5, mean_value: 48.0, raw_metric_value: 0.5 }
            })
            .collect();
        let sampled =
            StratifiedSample { metric: SurfaceMetric::Sq, edges: vec![0.0, 1.0, 2.0], samples, shortfalls: vec![] };
        let grid = build_tiles(&src, &sampled, WindowSize::new(5).unwrap());
        Scene::from_grid(&grid, &ColorRamp::default(), SurfaceMetric::Sq)
    }

    #[test]
    fn png_has_one_panel_per_grid_cell_plus_legend() {
        let r = PngRenderer { panel_px: 64, font: None };
        let bytes = r.render(&scene()).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (2 * 64, 2 * 64 + LEGEND_PX));
    }

    #[test]
    fn surfaces_are_drawn_inside_their_panels() {
        let r = PngRenderer { panel_px: 64, font: None };
        let img = image::load_from_memory(&r.render(&scene()).unwrap()).unwrap().to_rgba8();
        let painted = |x0: u32, y0: u32| {
            (x0 + 1..x0 + 64).any(|x| (y0 + 1..y0 + 64).any(|y| *img.get_pixel(x, y) != BACKGROUND))
        };
        assert!(painted(0, 0));
        assert!(painted(64, 0));
        assert!(painted(0, 64));
        // Class 2 has a single sample, so its second slot stays empty.
        assert!(!painted(64, 64));
    }

    #[test]
    fn panel_frames_are_closed_on_every_side() {
        let r = PngRenderer { panel_px: 64, font: None };
        let img = image::load_from_memory(&r.render(&scene()).unwrap()).unwrap().to_rgba8();
        // Right edge of the last column and bottom edge of the last row.
        assert_eq!(*img.get_pixel(127, 2), FRAME);
        assert_eq!(*img.get_pixel(2, 127), FRAME);
        assert_eq!(*img.get_pixel(0, 2), FRAME);
        assert_eq!(*img.get_pixel(2, 0), FRAME);
    }

    #[test]
    fn annotations_are_drawn_onto_the_image() {
        let Ok(Some(font)) = load_font(None) else {
            eprintln!("no system font available, skipping label rendering check");
            return;
        };
        let scene = scene();
        let plain = PngRenderer { panel_px: 160, font: None };
        let labelled = PngRenderer { panel_px: 160, font: Some(font) };
        let a = image::load_from_memory(&plain.render(&scene).unwrap()).unwrap().to_rgba8();
        let b = image::load_from_memory(&labelled.render(&scene).unwrap()).unwrap().to_rgba8();
        let label_px = (4..150)
            .flat_map(|x| (3..14).map(move |y| (x, y)))
            .filter(|&(x, y)| a.get_pixel(x, y) != b.get_pixel(x, y))
            .count();
        assert!(label_px > 20, "only {label_px} label pixels");
        // The empty slot gets no label.
        assert!((164..310).all(|x| (163..174).all(|y| a.get_pixel(x, y) == b.get_pixel(x, y))));
    }

    #[test]
    fn explicit_font_must_exist() {
        assert!(load_font(Some(Path::new("/nonexistent/font.ttf"))).is_err());
    }

    #[test]
    fn polygon_drops_repeated_and_closing_points() {
        let pts = [(2.0, 2.0), (2.2, 2.1), (8.0, 2.0), (8.0, 8.0), (2.0, 8.0), (2.0, 2.0)];
        let poly = to_polygon(&pts).unwrap();
        assert_eq!(poly.len(), 4);
        assert_ne!(poly.first(), poly.last());
        assert!(to_polygon(&[(1.0, 1.0), (1.2, 1.1), (5.0, 5.0)]).is_none());

        let mut img = RgbaImage::from_pixel(10, 10, BACKGROUND);
        let red = Rgba([255, 0, 0, 255]);
        fill(&mut img, &pts, red);
        assert_eq!(*img.get_pixel(5, 5), red);
        assert_eq!(*img.get_pixel(1, 1), BACKGROUND);
    }

    #[test]
    fn captions_list_every_annotation() {
        let text = PngRenderer::captions(&scene());
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("sq = 0.50 | mean = 48.00"));
    }
}
