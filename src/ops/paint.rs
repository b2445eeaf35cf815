// ============================================================================
// PAINT ENGINE: brush / eraser stamping into a layer's raster surface
// ============================================================================

use egui::Pos2;
use image::{Rgba, RgbaImage};

use crate::geometry::{distance, rotate_point};
use crate::layers::Layer;

/// Dabs placed per step by the clouds kernel.
const CLOUD_DABS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BrushKernel {
    /// Radial falloff from full opacity at the center to nothing at the radius.
    #[default]
    Soft,
    /// Flat disc.
    Hard,
    /// Flat dot at a tenth of the brush size.
    Pencil,
    /// Scattered low-opacity discs.
    Clouds,
}

impl BrushKernel {
    pub fn all() -> &'static [BrushKernel] {
        &[BrushKernel::Soft, BrushKernel::Hard, BrushKernel::Pencil, BrushKernel::Clouds]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrushKernel::Soft => "soft",
            BrushKernel::Hard => "hard",
            BrushKernel::Pencil => "pencil",
            BrushKernel::Clouds => "clouds",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        BrushKernel::all()
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeParams {
    pub kernel: BrushKernel,
    /// Scene units.
    pub size: f32,
    /// 0..=100
    pub opacity: f32,
    pub color: [u8; 3],
    pub erase: bool,
}

impl Default for StrokeParams {
    fn default() -> Self {
        Self {
            kernel: BrushKernel::Soft,
            size: 20.0,
            opacity: 100.0,
            color: [0, 0, 0],
            erase: false,
        }
    }
}

/// Map a scene point into the layer's raster pixel space: undo the rotation
/// about the layer center, then scale display units to raster pixels.
pub fn layer_local_point(layer: &Layer, scene: Pos2, raster_w: u32, raster_h: u32) -> Pos2 {
    let unrotated = rotate_point(scene, layer.center(), -layer.rotation);
    let sx = if layer.width.abs() > f32::EPSILON { raster_w as f32 / layer.width } else { 1.0 };
    let sy = if layer.height.abs() > f32::EPSILON { raster_h as f32 / layer.height } else { 1.0 };
    Pos2::new((unrotated.x - layer.x) * sx, (unrotated.y - layer.y) * sy)
}

/// Points to stamp between `prev` (exclusive) and `cur` (inclusive).
/// The step shrinks with the brush so small brushes stay continuous.
pub fn interpolate(prev: Option<Pos2>, cur: Pos2, size: f32) -> Vec<Pos2> {
    let Some(prev) = prev else {
        return vec![cur];
    };
    let step = (size * 0.1).max(1.0);
    let steps = (distance(prev, cur) / step).ceil() as usize;
    if steps == 0 {
        return vec![cur];
    }
    (1..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            Pos2::new(prev.x + (cur.x - prev.x) * t, prev.y + (cur.y - prev.y) * t)
        })
        .collect()
}

/// Paint one stroke segment (scene space) onto `layer`.
///
/// Silently does nothing for hidden, locked, group or raster-less layers.
/// Returns whether any pixels were touched.  `seed` advances with every
/// clouds dab so repeated strokes differ.
pub fn paint_segment(
    layer: &mut Layer,
    prev_scene: Option<Pos2>,
    cur_scene: Pos2,
    params: &StrokeParams,
    seed: &mut u32,
) -> bool {
    if !layer.visible || layer.locked {
        return false;
    }
    let Some((rw, rh)) = layer.raster().map(|r| r.dimensions()) else {
        return false;
    };

    let scale = if layer.width.abs() > f32::EPSILON { rw as f32 / layer.width } else { 1.0 };
    let size = (params.size * scale).max(0.5);
    let cur = layer_local_point(layer, cur_scene, rw, rh);
    let prev = prev_scene.map(|p| layer_local_point(layer, p, rw, rh));
    let points = interpolate(prev, cur, size);

    let Some(raster) = layer.raster_mut() else {
        return false;
    };
    let img = raster.make_editable();
    let opacity = (params.opacity / 100.0).clamp(0.0, 1.0);
    for p in points {
        stamp(img, p, size, params, opacity, seed);
    }
    true
}

fn stamp(img: &mut RgbaImage, center: Pos2, size: f32, params: &StrokeParams, opacity: f32, seed: &mut u32) {
    match params.kernel {
        BrushKernel::Soft => fill_disc(img, center, size, params, |d| {
            if d >= size { 0.0 } else { opacity * (1.0 - d / size) }
        }),
        BrushKernel::Hard => {
            let r = size / 2.0;
            fill_disc(img, center, r + 1.0, params, |d| opacity * edge_coverage(r, d));
        }
        BrushKernel::Pencil => {
            let r = (size * 0.1).max(0.5);
            fill_disc(img, center, r + 1.0, params, |d| opacity * edge_coverage(r, d));
        }
        BrushKernel::Clouds => {
            let dab_alpha = opacity * if params.erase { 0.2 } else { 0.1 };
            for _ in 0..CLOUD_DABS {
                let r1 = unit(stamp_hash(center.x, center.y, *seed));
                let r2 = unit(stamp_hash(center.y, center.x, seed.wrapping_add(99_991)));
                let r3 = unit(stamp_hash(center.x + center.y, center.x, seed.wrapping_add(7_919)));
                *seed = seed.wrapping_add(1);

                let reach = r1 * size;
                let angle = r2 * std::f32::consts::TAU;
                let c = Pos2::new(center.x + reach * angle.cos(), center.y + reach * angle.sin());
                let r = size * (0.2 + r3 * 0.5);
                fill_disc(img, c, r + 1.0, params, |d| dab_alpha * edge_coverage(r, d));
            }
        }
    }
}

/// Antialiased coverage of a pixel whose center lies `d` from a disc of
/// radius `r`.
fn edge_coverage(r: f32, d: f32) -> f32 {
    (r - d + 0.5).clamp(0.0, 1.0)
}

/// Apply `alpha_at(distance)` to every pixel within `reach` of `center`.
fn fill_disc<F>(img: &mut RgbaImage, center: Pos2, reach: f32, params: &StrokeParams, alpha_at: F)
where
    F: Fn(f32) -> f32,
{
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || reach <= 0.0 {
        return;
    }
    let x0 = (center.x - reach).floor().max(0.0) as u32;
    let y0 = (center.y - reach).floor().max(0.0) as u32;
    let x1 = (center.x + reach).ceil().min(w as f32) as u32;
    let y1 = (center.y + reach).ceil().min(h as f32) as u32;

    for y in y0..y1 {
        for x in x0..x1 {
            let d = distance(center, Pos2::new(x as f32 + 0.5, y as f32 + 0.5));
            let a = alpha_at(d);
            if a <= 0.0 {
                continue;
            }
            let px = img.get_pixel_mut(x, y);
            *px = if params.erase {
                erase_pixel(*px, a)
            } else {
                paint_pixel(*px, params.color, a)
            };
        }
    }
}

/// Source-over of a flat colour with alpha `a`.
fn paint_pixel(dst: Rgba<u8>, color: [u8; 3], a: f32) -> Rgba<u8> {
    let da = dst[3] as f32 / 255.0;
    let out_a = a + da * (1.0 - a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (color[c] as f32 * a + dst[c] as f32 * da * (1.0 - a)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Destination-out: reduce alpha by `a`, colour untouched.
fn erase_pixel(dst: Rgba<u8>, a: f32) -> Rgba<u8> {
    let na = (dst[3] as f32 * (1.0 - a)).round().clamp(0.0, 255.0) as u8;
    Rgba([dst[0], dst[1], dst[2], na])
}

/// Deterministic hash for dab scatter.
fn stamp_hash(x: f32, y: f32, counter: u32) -> u32 {
    let ix = (x * 100.0) as i32 as u32;
    let iy = (y * 100.0) as i32 as u32;
    let mut h = ix
        .wrapping_mul(374_761_393)
        .wrapping_add(iy.wrapping_mul(668_265_263))
        .wrapping_add(counter.wrapping_mul(1_013_904_223));
    h ^= h >> 13;
    h = h.wrapping_mul(1_274_126_177);
    h ^= h >> 16;
    h
}

fn unit(h: u32) -> f32 {
    (h >> 8) as f32 / (1u32 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Raster;
    use std::sync::Arc;

    fn blank_layer(display: f32, raster: u32) -> Layer {
        Layer::new_image(
            "paint",
            Some(Raster::Surface(RgbaImage::new(raster, raster))),
            0.0,
            0.0,
            display,
            display,
        )
    }

    fn hard(size: f32) -> StrokeParams {
        StrokeParams { kernel: BrushKernel::Hard, size, ..Default::default() }
    }

    fn alpha(layer: &Layer, x: u32, y: u32) -> u8 {
        layer.raster().unwrap().image().get_pixel(x, y)[3]
    }

    #[test]
    fn double_resolution_raster_maps_to_doubled_coords() {
        let mut layer = blank_layer(100.0, 200);
        let mut seed = 0;
        assert!(paint_segment(&mut layer, None, Pos2::new(30.0, 40.0), &hard(4.0), &mut seed));
        assert!(alpha(&layer, 60, 80) > 0);
        assert_eq!(alpha(&layer, 30, 40), 0);
        assert_eq!(alpha(&layer, 60, 90), 0);
    }

    #[test]
    fn rotation_is_undone_before_scaling() {
        let mut layer = blank_layer(100.0, 100);
        layer.rotation = std::f32::consts::PI;
        let local = layer_local_point(&layer, Pos2::new(10.0, 20.0), 100, 100);
        assert!((local.x - 90.0).abs() < 1e-3);
        assert!((local.y - 80.0).abs() < 1e-3);
    }

    #[test]
    fn interpolation_fills_gaps() {
        let pts = interpolate(Some(Pos2::new(0.0, 0.0)), Pos2::new(100.0, 0.0), 20.0);
        assert_eq!(pts.len(), 50);
        assert_eq!(*pts.last().unwrap(), Pos2::new(100.0, 0.0));
        assert_eq!(interpolate(None, Pos2::new(5.0, 5.0), 20.0), vec![Pos2::new(5.0, 5.0)]);

        let mut layer = blank_layer(200.0, 200);
        let mut seed = 0;
        paint_segment(&mut layer, Some(Pos2::new(10.0, 100.0)), Pos2::new(190.0, 100.0), &hard(6.0), &mut seed);
        assert!((10..190).all(|x| alpha(&layer, x, 100) > 0));
    }

    #[test]
    fn soft_kernel_fades_out() {
        let mut layer = blank_layer(100.0, 100);
        let params = StrokeParams { kernel: BrushKernel::Soft, size: 20.0, ..Default::default() };
        paint_segment(&mut layer, None, Pos2::new(50.0, 50.0), &params, &mut 0);
        let center = alpha(&layer, 50, 50);
        let mid = alpha(&layer, 60, 50);
        assert!(center > mid && mid > 0);
        assert_eq!(alpha(&layer, 71, 50), 0);
    }

    #[test]
    fn pencil_is_a_small_dot() {
        let mut layer = blank_layer(100.0, 100);
        let params = StrokeParams { kernel: BrushKernel::Pencil, size: 40.0, ..Default::default() };
        paint_segment(&mut layer, None, Pos2::new(50.0, 50.0), &params, &mut 0);
        assert!(alpha(&layer, 50, 50) > 0);
        assert_eq!(alpha(&layer, 56, 50), 0);
    }

    #[test]
    fn clouds_scatter_partial_alpha() {
        let mut layer = blank_layer(100.0, 100);
        let params = StrokeParams { kernel: BrushKernel::Clouds, size: 20.0, ..Default::default() };
        let mut seed = 7;
        paint_segment(&mut layer, None, Pos2::new(50.0, 50.0), &params, &mut seed);
        assert_eq!(seed, 7 + CLOUD_DABS);
        let img = layer.raster().unwrap().image();
        let touched: Vec<u8> = img.pixels().map(|p| p[3]).filter(|a| *a > 0).collect();
        assert!(!touched.is_empty());
        assert!(touched.iter().all(|a| *a < 255));
    }

    #[test]
    fn eraser_removes_alpha() {
        let mut layer = Layer::new_image(
            "full",
            Some(Raster::Surface(RgbaImage::from_pixel(50, 50, Rgba([9, 9, 9, 255])))),
            0.0,
            0.0,
            50.0,
            50.0,
        );
        let params = StrokeParams { erase: true, ..hard(10.0) };
        paint_segment(&mut layer, None, Pos2::new(25.0, 25.0), &params, &mut 0);
        assert_eq!(alpha(&layer, 25, 25), 0);
        assert_eq!(alpha(&layer, 0, 0), 255);
    }

    #[test]
    fn locked_or_hidden_layers_are_untouched() {
        let mut layer = blank_layer(50.0, 50);
        layer.locked = true;
        assert!(!paint_segment(&mut layer, None, Pos2::new(25.0, 25.0), &hard(10.0), &mut 0));
        layer.locked = false;
        layer.visible = false;
        assert!(!paint_segment(&mut layer, None, Pos2::new(25.0, 25.0), &hard(10.0), &mut 0));
        assert_eq!(alpha(&layer, 25, 25), 0);
    }

    #[test]
    fn first_stroke_materializes_source() {
        let src = Arc::new(RgbaImage::new(20, 20));
        let mut layer = Layer::new_image("src", Some(Raster::Source(src.clone())), 0.0, 0.0, 20.0, 20.0);
        paint_segment(&mut layer, None, Pos2::new(10.0, 10.0), &hard(4.0), &mut 0);
        assert!(layer.raster().unwrap().is_editable());
        assert_eq!(src.get_pixel(10, 10)[3], 0);
        assert!(alpha(&layer, 10, 10) > 0);
    }

    #[test]
    fn kernel_names_round_trip() {
        for k in BrushKernel::all() {
            assert_eq!(BrushKernel::from_name(k.name()), Some(*k));
        }
        assert_eq!(BrushKernel::from_name(" HARD "), Some(BrushKernel::Hard));
        assert_eq!(BrushKernel::from_name("spray"), None);
    }
}
