// ============================================================================
// RENDERER: scene compositing plus transient editing overlays
// ============================================================================
//
// Output is always at scene resolution.  Overlay strokes are sized in screen
// pixels and divided by the zoom so they look constant on screen.
// Layer compositing is row-parallel via rayon.

use egui::Pos2;
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{BACKGROUND, BlendMode, CanvasConfig, blend_pixel};
use crate::editor::Editor;
use crate::geometry::distance;
use crate::interaction::{HANDLE_RADIUS, Handle, InteractionMode, Tool, handle_points};
use crate::layers::{Layer, LayerId, visible_images};
use crate::ops::adjustments::{Adjustment, apply_adjustment};
use crate::ops::selection::LassoSelection;

const HATCH_TILE: u32 = 20;
const HATCH_FILL: Rgba<u8> = Rgba([0, 0, 0, 0x55]);
const HATCH_LINE: Rgba<u8> = Rgba([255, 255, 255, 0x33]);
const ANT_DASH: f32 = 5.0;
const ANT_WIDTH: f32 = 2.0;
const OUTLINE: Rgba<u8> = Rgba([0x3b, 0x82, 0xf6, 255]);
const OUTLINE_HINT: Rgba<u8> = Rgba([0x3b, 0x82, 0xf6, 0x55]);
const ROTATE_HANDLE: Rgba<u8> = Rgba([0xcc, 0xff, 0x00, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Clone, Copy, Debug, Default)]
pub struct RenderOptions {
    /// Draw selection and transform overlays (never for export).
    pub overlays: bool,
    /// Wall-clock milliseconds driving the marching-ants phase.
    pub time_ms: u64,
}

/// Does the current state need continuous redraws (animated ants)?
pub fn needs_animation(editor: &Editor) -> bool {
    editor.selection.active || editor.interaction_mode() == InteractionMode::Selecting
}

/// Full editor frame: composite with the pending adjustment previewed on the
/// active layer, then overlays if requested.
pub fn render(editor: &Editor, opts: RenderOptions) -> RgbaImage {
    let preview = match (editor.active_id, editor.adjustment.as_ref()) {
        (Some(id), Some(adj)) => Some((id, adj)),
        _ => None,
    };
    let mut img = composite(&editor.config, &editor.layers, preview);
    if opts.overlays {
        draw_overlays(&mut img, editor, opts.time_ms);
    }
    img
}

/// Flatten the layer tree over the background.  `preview` applies an
/// adjustment to one layer's draw without touching its raster.
pub fn composite(config: &CanvasConfig, layers: &[Layer], preview: Option<(LayerId, &Adjustment)>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(config.width, config.height, BACKGROUND);
    for layer in visible_images(layers) {
        let Some(raster) = layer.raster() else { continue };
        match preview {
            Some((id, adj)) if id == layer.id => {
                let adjusted = apply_adjustment(raster.image(), adj);
                draw_layer(&mut canvas, layer, &adjusted);
            }
            _ => draw_layer(&mut canvas, layer, raster.image()),
        }
    }
    canvas
}

/// Draw `src` into the layer's rotated display box with its opacity and
/// blend mode.  Each destination pixel is mapped back into raster space.
fn draw_layer(canvas: &mut RgbaImage, layer: &Layer, src: &RgbaImage) {
    let (cw, ch) = canvas.dimensions();
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 || layer.width <= 0.0 || layer.height <= 0.0 || layer.opacity <= 0.0 {
        return;
    }
    let Some((x0, y0, x1, y1)) = clip_bounds(&layer.corners(), 0.0, cw, ch) else {
        return;
    };

    let center = layer.center();
    let (sin, cos) = (-layer.rotation).sin_cos();
    let sx = sw as f32 / layer.width;
    let sy = sh as f32 / layer.height;
    let opacity = layer.opacity / 100.0;
    let mode = layer.blend_mode;
    let stride = cw as usize * 4;

    canvas
        .par_chunks_mut(stride)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let py = y as f32 + 0.5;
            for x in x0..x1 {
                let px = x as f32 + 0.5;
                let dx = px - center.x;
                let dy = py - center.y;
                let lx = center.x + dx * cos - dy * sin;
                let ly = center.y + dx * sin + dy * cos;
                let u = (lx - layer.x) * sx;
                let v = (ly - layer.y) * sy;
                if u < 0.0 || v < 0.0 || u >= sw as f32 || v >= sh as f32 {
                    continue;
                }
                let top = sample_bilinear(src, u - 0.5, v - 0.5);
                let i = x as usize * 4;
                let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                row[i..i + 4].copy_from_slice(&blend_pixel(base, top, mode, opacity).0);
            }
        });
}

/// Bilinear sample with edge clamping.
fn sample_bilinear(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let (w, h) = img.dimensions();
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        let cx = sx.clamp(0, w as i32 - 1) as u32;
        let cy = sy.clamp(0, h as i32 - 1) as u32;
        let p = img.get_pixel(cx, cy).0;
        [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
    };

    let p00 = sample(x0, y0);
    let p10 = sample(x0 + 1, y0);
    let p01 = sample(x0, y0 + 1);
    let p11 = sample(x0 + 1, y0 + 1);

    let w00 = (1.0 - fx) * (1.0 - fy);
    let w10 = fx * (1.0 - fy);
    let w01 = (1.0 - fx) * fy;
    let w11 = fx * fy;

    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (p00[c] * w00 + p10[c] * w10 + p01[c] * w01 + p11[c] * w11)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Integer pixel bounds of `points` grown by `pad`, clipped to the canvas.
fn clip_bounds(points: &[Pos2], pad: f32, w: u32, h: u32) -> Option<(u32, u32, u32, u32)> {
    let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min) - pad;
    let min_y = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min) - pad;
    let max_x = points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max) + pad;
    let max_y = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max) + pad;
    if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
        return None;
    }
    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(w);
    let y1 = (max_y.ceil().max(0.0) as u32).min(h);
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}

// ============================================================================
// OVERLAYS
// ============================================================================

fn draw_overlays(img: &mut RgbaImage, editor: &Editor, time_ms: u64) {
    let zoom = editor.viewport.zoom.max(f32::EPSILON);

    if editor.selection.has_path() {
        draw_selection(img, &editor.selection, zoom, time_ms);
    }

    // Nothing else competes with an open adjustment.
    if editor.adjustment.is_some() {
        return;
    }

    let mut ids: Vec<LayerId> = editor.active_id.into_iter().collect();
    for id in &editor.multi_selected {
        if !ids.contains(id) {
            ids.push(*id);
        }
    }
    let targets: Vec<&Layer> = ids
        .iter()
        .filter_map(|id| editor.layer(*id))
        .filter(|l| !l.is_group())
        .collect();

    if editor.tool == Tool::Move {
        for layer in targets {
            let corners = layer.corners();
            draw_polyline(img, &corners, true, ANT_WIDTH / zoom, OUTLINE);
            if Some(layer.id) == editor.active_id && !layer.locked {
                draw_handles(img, layer, zoom);
            }
        }
    } else {
        let busy = editor.interaction_mode() == InteractionMode::Drawing
            || editor.tool == Tool::Selection
            || editor.selection.active;
        if busy {
            return;
        }
        for layer in targets {
            let outline = [
                Pos2::new(layer.x, layer.y),
                Pos2::new(layer.x + layer.width, layer.y),
                Pos2::new(layer.x + layer.width, layer.y + layer.height),
                Pos2::new(layer.x, layer.y + layer.height),
            ];
            draw_polyline(img, &outline, true, 1.0 / zoom, OUTLINE_HINT);
        }
    }
}

fn draw_handles(img: &mut RgbaImage, layer: &Layer, zoom: f32) {
    let r = HANDLE_RADIUS / zoom;
    let [tl, tr, _, _] = layer.corners();
    let top_mid = Pos2::new((tl.x + tr.x) / 2.0, (tl.y + tr.y) / 2.0);
    for (handle, p) in handle_points(layer, zoom) {
        if handle == Handle::Rotate {
            draw_segment(img, top_mid, p, 1.0 / zoom, ROTATE_HANDLE);
            fill_circle(img, p, r, ROTATE_HANDLE);
        } else {
            fill_circle(img, p, r, WHITE);
            draw_ring(img, p, r, 1.0 / zoom, OUTLINE);
        }
    }
}

/// Hatch the selected region and run marching ants along the path.
fn draw_selection(img: &mut RgbaImage, sel: &LassoSelection, zoom: f32, time_ms: u64) {
    let (w, h) = img.dimensions();

    if sel.points.len() >= 3 {
        // Inside-only hatching can stay within the path bounds.
        let bounds = if sel.inverted {
            Some((0, 0, w, h))
        } else {
            clip_bounds(&sel.points, 1.0, w, h)
        };
        if let Some((x0, y0, x1, y1)) = bounds {
            let stride = w as usize * 4;
            img.par_chunks_mut(stride)
                .enumerate()
                .skip(y0 as usize)
                .take((y1 - y0) as usize)
                .for_each(|(y, row)| {
                    for x in x0..x1 {
                        if !sel.contains(Pos2::new(x as f32 + 0.5, y as f32 + 0.5)) {
                            continue;
                        }
                        let i = x as usize * 4;
                        let mut px = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                        px = blend_pixel(px, HATCH_FILL, BlendMode::Normal, 1.0);
                        // Diagonal stripe, ~2px wide, repeating every tile.
                        let diag = (x + y as u32) % HATCH_TILE;
                        if diag < 2 || diag == HATCH_TILE - 1 {
                            px = blend_pixel(px, HATCH_LINE, BlendMode::Normal, 1.0);
                        }
                        row[i..i + 4].copy_from_slice(&px.0);
                    }
                });
        }
    }

    let dash = ANT_DASH / zoom;
    let phase = (time_ms as f32 / 20.0) / zoom;
    let width = ANT_WIDTH / zoom;
    draw_dashed(img, &sel.points, sel.active, dash, phase, width, WHITE);
    draw_dashed(img, &sel.points, sel.active, dash, phase + dash, width, BLACK);
}

/// Dash pattern `dash` on / `dash` off along the path, shifted by `phase`.
fn draw_dashed(img: &mut RgbaImage, pts: &[Pos2], closed: bool, dash: f32, phase: f32, width: f32, color: Rgba<u8>) {
    if pts.len() < 2 || dash <= 0.0 {
        return;
    }
    let period = dash * 2.0;
    let mut travelled = 0.0f32;
    let edges = pts.len() - usize::from(!closed);
    for i in 0..edges {
        let a = pts[i];
        let b = pts[(i + 1) % pts.len()];
        let len = distance(a, b);
        if len <= f32::EPSILON {
            continue;
        }
        let mut t = 0.0f32;
        while t < len {
            let m = (travelled + t + phase).rem_euclid(period);
            if m < dash {
                let end = (t + (dash - m)).min(len);
                let p0 = a + (b - a) * (t / len);
                let p1 = a + (b - a) * (end / len);
                draw_segment(img, p0, p1, width, color);
                t = end.max(t + 1e-3);
            } else {
                t = (t + (period - m)).max(t + 1e-3);
            }
        }
        travelled += len;
    }
}

fn draw_polyline(img: &mut RgbaImage, pts: &[Pos2], closed: bool, width: f32, color: Rgba<u8>) {
    if pts.len() < 2 {
        return;
    }
    let edges = pts.len() - usize::from(!closed);
    for i in 0..edges {
        draw_segment(img, pts[i], pts[(i + 1) % pts.len()], width, color);
    }
}

/// Antialiased thick segment.
fn draw_segment(img: &mut RgbaImage, a: Pos2, b: Pos2, width: f32, color: Rgba<u8>) {
    let half = (width / 2.0).max(0.5);
    let (w, h) = img.dimensions();
    let Some((x0, y0, x1, y1)) = clip_bounds(&[a, b], half + 1.0, w, h) else {
        return;
    };
    let ab = b - a;
    let len_sq = ab.length_sq();
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Pos2::new(x as f32 + 0.5, y as f32 + 0.5);
            let t = if len_sq > 0.0 { ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0) } else { 0.0 };
            let d = distance(p, a + ab * t);
            let coverage = (half - d + 0.5).clamp(0.0, 1.0);
            if coverage > 0.0 {
                let base = *img.get_pixel(x, y);
                img.put_pixel(x, y, blend_pixel(base, color, BlendMode::Normal, coverage));
            }
        }
    }
}

fn fill_circle(img: &mut RgbaImage, c: Pos2, r: f32, color: Rgba<u8>) {
    shade_disc(img, c, r + 1.0, color, |d| (r - d + 0.5).clamp(0.0, 1.0));
}

fn draw_ring(img: &mut RgbaImage, c: Pos2, r: f32, width: f32, color: Rgba<u8>) {
    let half = (width / 2.0).max(0.5);
    shade_disc(img, c, r + half + 1.0, color, |d| (half - (d - r).abs() + 0.5).clamp(0.0, 1.0));
}

fn shade_disc<F: Fn(f32) -> f32>(img: &mut RgbaImage, c: Pos2, reach: f32, color: Rgba<u8>, coverage: F) {
    let (w, h) = img.dimensions();
    let corners = [c - egui::vec2(reach, reach), c + egui::vec2(reach, reach)];
    let Some((x0, y0, x1, y1)) = clip_bounds(&corners, 0.0, w, h) else {
        return;
    };
    for y in y0..y1 {
        for x in x0..x1 {
            let cov = coverage(distance(c, Pos2::new(x as f32 + 0.5, y as f32 + 0.5)));
            if cov > 0.0 {
                let base = *img.get_pixel(x, y);
                img.put_pixel(x, y, blend_pixel(base, color, BlendMode::Normal, cov));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{LayerPatch, Raster};

    fn solid_layer(color: [u8; 4], x: f32, y: f32, size: u32) -> Layer {
        Layer::new_image(
            "solid",
            Some(Raster::Surface(RgbaImage::from_pixel(size, size, Rgba(color)))),
            x,
            y,
            size as f32,
            size as f32,
        )
    }

    #[test]
    fn empty_scene_is_background() {
        let cfg = CanvasConfig::custom(8, 4);
        let img = composite(&cfg, &[], None);
        assert_eq!(img.dimensions(), (8, 4));
        assert!(img.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn display_box_scales_raster() {
        let cfg = CanvasConfig::custom(40, 40);
        let mut layer = solid_layer([255, 0, 0, 255], 10.0, 10.0, 5);
        layer.width = 20.0;
        layer.height = 20.0;
        let img = composite(&cfg, &[layer], None);
        assert_eq!(img.get_pixel(20, 20), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(29, 29), &Rgba([255, 0, 0, 255]));
        assert_eq!(img.get_pixel(31, 20), &BACKGROUND);
        assert_eq!(img.get_pixel(5, 5), &BACKGROUND);
    }

    #[test]
    fn rotation_turns_box_about_center() {
        let cfg = CanvasConfig::custom(100, 100);
        let mut layer = Layer::new_image(
            "bar",
            Some(Raster::Surface(RgbaImage::from_pixel(80, 10, Rgba([0, 0, 255, 255])))),
            10.0,
            45.0,
            80.0,
            10.0,
        );
        let flat = composite(&cfg, std::slice::from_ref(&layer), None);
        assert_eq!(flat.get_pixel(15, 50)[2], 255);
        assert_eq!(flat.get_pixel(50, 15), &BACKGROUND);

        layer.rotation = std::f32::consts::FRAC_PI_2;
        let turned = composite(&cfg, &[layer], None);
        assert_eq!(turned.get_pixel(50, 15), &Rgba([0, 0, 255, 255]));
        assert_eq!(turned.get_pixel(15, 50), &BACKGROUND);
    }

    #[test]
    fn hidden_layers_are_skipped_and_opacity_applies() {
        let cfg = CanvasConfig::custom(10, 10);
        let mut hidden = solid_layer([0, 0, 0, 255], 0.0, 0.0, 10);
        hidden.visible = false;
        let mut half = solid_layer([0, 0, 0, 255], 0.0, 0.0, 10);
        half.opacity = 50.0;
        let img = composite(&cfg, &[hidden, half], None);
        let p = img.get_pixel(5, 5);
        assert!((p[0] as i32 - 128).abs() <= 1, "got {:?}", p);
    }

    #[test]
    fn adjustment_preview_leaves_raster_alone() {
        let cfg = CanvasConfig::custom(10, 10);
        let layer = solid_layer([200, 100, 50, 255], 0.0, 0.0, 10);
        let id = layer.id;
        let layers = vec![layer];
        let dim = Adjustment::Hsb { hue_deg: 0.0, saturation_pct: 100.0, brightness_pct: -50.0 };
        let img = composite(&cfg, &layers, Some((id, &dim)));
        assert_eq!(img.get_pixel(3, 3), &Rgba([100, 50, 25, 255]));
        assert_eq!(layers[0].raster().unwrap().image().get_pixel(3, 3), &Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn selection_hatch_follows_inversion() {
        let mut ed = Editor::new(CanvasConfig::custom(100, 100));
        ed.selection.begin(Pos2::new(20.0, 20.0));
        for p in [Pos2::new(80.0, 20.0), Pos2::new(80.0, 80.0), Pos2::new(20.0, 80.0)] {
            ed.selection.extend(p);
        }
        ed.selection.finish();
        let opts = RenderOptions { overlays: true, time_ms: 0 };

        let inside = render(&ed, opts);
        assert!(inside.get_pixel(50, 51)[0] < 255);
        assert_eq!(inside.get_pixel(5, 50), &BACKGROUND);

        ed.invert_selection();
        let outside = render(&ed, opts);
        assert_eq!(outside.get_pixel(50, 51), &BACKGROUND);
        assert!(outside.get_pixel(5, 50)[0] < 255);

        // Export never carries overlays.
        assert!(ed.composite().pixels().all(|p| *p == BACKGROUND));
        assert!(needs_animation(&ed));
        ed.clear_selection();
        assert!(!needs_animation(&ed));
    }

    #[test]
    fn move_tool_draws_handles_for_active_layer() {
        let mut ed = Editor::new(CanvasConfig::custom(200, 200));
        let id = ed.add_layer(Some(RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 0]))));
        ed.update_layer(id, &LayerPatch { x: Some(50.0), y: Some(50.0), width: Some(100.0), height: Some(100.0), ..Default::default() });
        ed.set_tool(Tool::Move);
        let img = render(&ed, RenderOptions { overlays: true, time_ms: 0 });
        // rotation handle 30px above the top edge's midpoint
        assert_eq!(img.get_pixel(100, 20), &ROTATE_HANDLE);
        // outline along the left edge
        assert_ne!(img.get_pixel(50, 100), &BACKGROUND);

        ed.begin_adjustment(Adjustment::hsb());
        let quiet = render(&ed, RenderOptions { overlays: true, time_ms: 0 });
        assert_eq!(quiet.get_pixel(100, 20), &BACKGROUND);
    }

    #[test]
    fn hint_outline_for_paint_tools_is_axis_aligned() {
        let mut ed = Editor::new(CanvasConfig::custom(200, 200));
        let id = ed.add_layer(Some(RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 0]))));
        ed.update_layer(id, &LayerPatch { x: Some(50.0), y: Some(50.0), width: Some(100.0), height: Some(100.0), rotation: Some(0.7), ..Default::default() });
        ed.set_tool(Tool::Brush);
        let img = render(&ed, RenderOptions { overlays: true, time_ms: 0 });
        assert_ne!(img.get_pixel(50, 100), &BACKGROUND);
        assert_eq!(img.get_pixel(100, 20), &BACKGROUND);
    }
}
