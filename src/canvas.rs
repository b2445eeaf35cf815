// ============================================================================
// CANVAS: blend modes, pixel compositing math, scene config and viewport
// ============================================================================

use image::Rgba;
use serde::{Deserialize, Serialize};

/// Largest scene edge accepted from user input or a stored record.
pub const MAX_CANVAS_DIM: u32 = 32_768;

/// Flat wash the scene is cleared to before layers are drawn.
pub const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Darken,
    Multiply,
    ColorBurn,
    Lighten,
    Screen,
    ColorDodge,
    Overlay,
    SoftLight,
    HardLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// Returns all blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Darken,
            BlendMode::Multiply,
            BlendMode::ColorBurn,
            BlendMode::Lighten,
            BlendMode::Screen,
            BlendMode::ColorDodge,
            BlendMode::Overlay,
            BlendMode::SoftLight,
            BlendMode::HardLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Hue,
            BlendMode::Saturation,
            BlendMode::Color,
            BlendMode::Luminosity,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Darken => "Darken",
            BlendMode::Multiply => "Multiply",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::Lighten => "Lighten",
            BlendMode::Screen => "Screen",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::Overlay => "Overlay",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::HardLight => "Hard Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Darken => 1,
            BlendMode::Multiply => 2,
            BlendMode::ColorBurn => 3,
            BlendMode::Lighten => 4,
            BlendMode::Screen => 5,
            BlendMode::ColorDodge => 6,
            BlendMode::Overlay => 7,
            BlendMode::SoftLight => 8,
            BlendMode::HardLight => 9,
            BlendMode::Difference => 10,
            BlendMode::Exclusion => 11,
            BlendMode::Hue => 12,
            BlendMode::Saturation => 13,
            BlendMode::Color => 14,
            BlendMode::Luminosity => 15,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        BlendMode::all()
            .get(v as usize)
            .copied()
            .unwrap_or(BlendMode::Normal)
    }

    fn is_non_separable(&self) -> bool {
        matches!(
            self,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
        )
    }
}

/// Composite `top` over `base` with the given blend mode and layer opacity
/// (0.0..=1.0).  Straight (non-premultiplied) RGBA in and out.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel, nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }

    // Fast path: Normal blend, full opacity, fully opaque top pixel, just overwrite
    if matches!(mode, BlendMode::Normal) && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let cb = [
        base[0] as f32 / 255.0,
        base[1] as f32 / 255.0,
        base[2] as f32 / 255.0,
    ];
    let base_a = base[3] as f32 / 255.0;
    let cs = [
        top[0] as f32 / 255.0,
        top[1] as f32 / 255.0,
        top[2] as f32 / 255.0,
    ];
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let mixed = if mode.is_non_separable() {
        blend_non_separable(cb, cs, mode)
    } else {
        [
            blend_channel(cb[0], cs[0], mode),
            blend_channel(cb[1], cs[1], mode),
            blend_channel(cb[2], cs[2], mode),
        ]
    };

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        // Where the backdrop is transparent the source colour shows unblended.
        let src = (1.0 - base_a) * cs[c] + base_a * mixed[c];
        let v = (src * top_a + cb[c] * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

fn blend_channel(base: f32, top: f32, mode: BlendMode) -> f32 {
    match mode {
        BlendMode::Darken => base.min(top),
        BlendMode::Multiply => base * top,
        BlendMode::ColorBurn => color_burn_channel(base, top),
        BlendMode::Lighten => base.max(top),
        BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
        BlendMode::ColorDodge => color_dodge_channel(base, top),
        BlendMode::Overlay => overlay_channel(base, top),
        BlendMode::SoftLight => soft_light_channel(base, top),
        BlendMode::HardLight => overlay_channel(top, base),
        BlendMode::Difference => (base - top).abs(),
        BlendMode::Exclusion => base + top - 2.0 * base * top,
        _ => top,
    }
}

// Blend mode helper functions
fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if base >= 1.0 {
        1.0
    } else if top <= 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if base <= 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

/// Soft light, smooth variant.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

// Non-separable modes: work on the whole colour via lum/sat

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 && l - n > f32::EPSILON {
        for v in &mut out {
            *v = l + (*v - l) * l / (l - n);
        }
    }
    if x > 1.0 && x - l > f32::EPSILON {
        for v in &mut out {
            *v = l + (*v - l) * (1.0 - l) / (x - l);
        }
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    if max - min <= f32::EPSILON {
        return [0.0; 3];
    }
    [
        (c[0] - min) * s / (max - min),
        (c[1] - min) * s / (max - min),
        (c[2] - min) * s / (max - min),
    ]
}

fn blend_non_separable(cb: [f32; 3], cs: [f32; 3], mode: BlendMode) -> [f32; 3] {
    match mode {
        BlendMode::Hue => set_lum(set_sat(cs, sat(cb)), lum(cb)),
        BlendMode::Saturation => set_lum(set_sat(cb, sat(cs)), lum(cb)),
        BlendMode::Color => set_lum(cs, lum(cb)),
        BlendMode::Luminosity => set_lum(cb, lum(cs)),
        _ => cs,
    }
}

// ============================================================================
// SCENE CONFIGURATION
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

pub const CUSTOM_CANVAS_NAME: &str = "Custom Canvas";

impl CanvasConfig {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width: width.clamp(1, MAX_CANVAS_DIM),
            height: height.clamp(1, MAX_CANVAS_DIM),
        }
    }

    pub fn custom(width: u32, height: u32) -> Self {
        Self::new(CUSTOM_CANVAS_NAME, width, height)
    }

    /// Print and screen sizes offered when starting a new design.
    pub fn presets() -> Vec<CanvasConfig> {
        vec![
            CanvasConfig::new("A4 Paper", 2480, 3508),
            CanvasConfig::new("A3 Paper", 3508, 4960),
            CanvasConfig::new("Screen (HD)", 1920, 1080),
            CanvasConfig::new("Square (2k)", 2048, 2048),
        ]
    }

    pub fn is_custom(&self) -> bool {
        self.name == CUSTOM_CANVAS_NAME
    }

    pub fn is_valid(&self) -> bool {
        (1..=MAX_CANVAS_DIM).contains(&self.width) && (1..=MAX_CANVAS_DIM).contains(&self.height)
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        CanvasConfig::new("Square (2k)", 2048, 2048)
    }
}

// ============================================================================
// VIEWPORT
// ============================================================================

pub const MIN_ZOOM: f32 = 0.05;
pub const MAX_ZOOM: f32 = 5.0;
const FIT_PADDING: f32 = 80.0;
const FALLBACK_ZOOM: f32 = 0.15;

/// Screen-space offset of the scene origin plus zoom.  View state only,
/// never stored with a project.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

impl Viewport {
    pub fn screen_to_scene(&self, p: egui::Pos2) -> egui::Pos2 {
        egui::pos2((p.x - self.x) / self.zoom, (p.y - self.y) / self.zoom)
    }

    pub fn scene_to_screen(&self, p: egui::Pos2) -> egui::Pos2 {
        egui::pos2(p.x * self.zoom + self.x, p.y * self.zoom + self.y)
    }

    /// Center the scene inside a `view_w × view_h` area with padding.
    pub fn fit_to_window(&mut self, config: &CanvasConfig, view_w: f32, view_h: f32) {
        let zx = (view_w - FIT_PADDING) / config.width as f32;
        let zy = (view_h - FIT_PADDING) / config.height as f32;
        let mut zoom = zx.min(zy);
        if !zoom.is_finite() || zoom <= 0.0 {
            zoom = FALLBACK_ZOOM;
        }
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        self.x = (view_w - config.width as f32 * self.zoom) / 2.0;
        self.y = (view_h - config.height as f32 * self.zoom) / 2.0;
    }

    /// Multiply zoom by `factor`, keeping the scene point under `anchor`
    /// (screen space) fixed.
    pub fn zoom_at(&mut self, anchor: egui::Pos2, factor: f32) {
        let scene = self.screen_to_scene(anchor);
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        self.x = anchor.x - scene.x * self.zoom;
        self.y = anchor.y - scene.y * self.zoom;
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_codes_are_stable() {
        for (i, mode) in BlendMode::all().iter().enumerate() {
            assert_eq!(mode.to_u8() as usize, i);
            assert_eq!(BlendMode::from_u8(mode.to_u8()), *mode);
        }
        assert_eq!(BlendMode::from_u8(200), BlendMode::Normal);
        assert_eq!(BlendMode::all().len(), 16);
    }

    #[test]
    fn multiply_half_opacity_on_opaque_base() {
        let base = Rgba([200, 100, 50, 255]);
        let top = Rgba([100, 200, 255, 255]);
        let out = blend_pixel(base, top, BlendMode::Multiply, 0.5);
        for c in 0..3 {
            let a = base[c] as f32 / 255.0;
            let b = top[c] as f32 / 255.0;
            let expected = (a * 0.5 + a * b * 0.5) * 255.0;
            assert!((out[c] as f32 - expected).abs() <= 1.0, "channel {c}: {} vs {expected}", out[c]);
        }
        assert_eq!(out[3], 255);
    }

    #[test]
    fn screen_and_difference() {
        let base = Rgba([128, 0, 255, 255]);
        let top = Rgba([128, 255, 0, 255]);
        let s = blend_pixel(base, top, BlendMode::Screen, 1.0);
        assert_eq!(s[1], 255);
        assert_eq!(s[2], 255);
        let d = blend_pixel(base, top, BlendMode::Difference, 1.0);
        assert_eq!(d[0], 0);
        assert_eq!(d[1], 255);
        assert_eq!(d[2], 255);
    }

    #[test]
    fn transparent_backdrop_shows_source_colour() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([10, 20, 30, 255]), BlendMode::Multiply, 1.0);
        assert_eq!(out, Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn luminosity_keeps_backdrop_hue() {
        // Grey source over red: luminosity takes the grey's lightness, keeps red hue.
        let out = blend_pixel(Rgba([255, 0, 0, 255]), Rgba([128, 128, 128, 255]), BlendMode::Luminosity, 1.0);
        assert!(out[0] > out[1] && out[0] > out[2]);
        let hue = blend_pixel(Rgba([0, 0, 255, 255]), Rgba([255, 0, 0, 255]), BlendMode::Hue, 1.0);
        assert!(hue[0] > hue[1]);
    }

    #[test]
    fn viewport_fit_and_zoom_clamp() {
        let cfg = CanvasConfig::custom(1000, 500);
        let mut vp = Viewport::default();
        vp.fit_to_window(&cfg, 1080.0, 1080.0);
        assert!((vp.zoom - 1.0).abs() < 1e-6);
        assert!((vp.x - 40.0).abs() < 1e-4);
        assert!((vp.y - 290.0).abs() < 1e-4);

        vp.zoom_at(egui::pos2(0.0, 0.0), 100.0);
        assert_eq!(vp.zoom, MAX_ZOOM);
        vp.zoom_at(egui::pos2(0.0, 0.0), 0.0001);
        assert_eq!(vp.zoom, MIN_ZOOM);

        let p = egui::pos2(123.0, 45.0);
        let back = vp.screen_to_scene(vp.scene_to_screen(p));
        assert!((back.x - p.x).abs() < 1e-3 && (back.y - p.y).abs() < 1e-3);
    }

    #[test]
    fn degenerate_view_uses_fallback_zoom() {
        let mut vp = Viewport::default();
        vp.fit_to_window(&CanvasConfig::custom(2000, 2000), 10.0, 10.0);
        assert!((vp.zoom - FALLBACK_ZOOM).abs() < 1e-6);
    }

    #[test]
    fn presets_match_print_sizes() {
        let presets = CanvasConfig::presets();
        assert_eq!(presets[0].width, 2480);
        assert_eq!(presets[0].height, 3508);
        assert!(presets.iter().all(|p| !p.is_custom() && p.is_valid()));
    }
}
