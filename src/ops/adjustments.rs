// ============================================================================
// ADJUSTMENTS: non-destructive colour / tone adjustments for the active layer
// ============================================================================
//
// An adjustment is previewed by the renderer on a transformed copy of the
// active layer's raster; the layer itself only changes on commit.
// Pixel work is parallelized per row via rayon.
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub enum Adjustment {
    /// `hue_deg`: rotation in degrees, `saturation_pct`: 100 = unchanged,
    /// `brightness_pct`: offset where 0 = unchanged.
    Hsb {
        hue_deg: f32,
        saturation_pct: f32,
        brightness_pct: f32,
    },
    /// Tone curve control points (input, output), both 0..255.
    Curves { points: Vec<(f32, f32)> },
}

impl Adjustment {
    pub fn hsb() -> Self {
        Adjustment::Hsb {
            hue_deg: 0.0,
            saturation_pct: 100.0,
            brightness_pct: 0.0,
        }
    }

    pub fn curves() -> Self {
        Adjustment::Curves {
            points: vec![(0.0, 0.0), (255.0, 255.0)],
        }
    }

    pub fn is_identity(&self) -> bool {
        match self {
            Adjustment::Hsb {
                hue_deg,
                saturation_pct,
                brightness_pct,
            } => hue_deg.rem_euclid(360.0) == 0.0 && *saturation_pct == 100.0 && *brightness_pct == 0.0,
            Adjustment::Curves { points } => {
                let lut = build_curves_lut(points);
                lut.iter().enumerate().all(|(i, v)| *v as usize == i)
            }
        }
    }
}

/// Return an adjusted copy of `src`.  Alpha is never modified.
pub fn apply_adjustment(src: &RgbaImage, adj: &Adjustment) -> RgbaImage {
    match adj {
        Adjustment::Hsb {
            hue_deg,
            saturation_pct,
            brightness_pct,
        } => {
            let hue_shift = hue_deg / 360.0;
            let sat_factor = (saturation_pct / 100.0).max(0.0);
            let gain = ((100.0 + brightness_pct) / 100.0).max(0.0);
            apply_pixel_transform(src, move |r, g, b, a| {
                let [nr, ng, nb] = shift_hue_saturation([r / 255.0, g / 255.0, b / 255.0], hue_shift, sat_factor);
                (nr * 255.0 * gain, ng * 255.0 * gain, nb * 255.0 * gain, a)
            })
        }
        Adjustment::Curves { points } => {
            let lut = build_curves_lut(points);
            apply_pixel_transform(src, move |r, g, b, a| {
                (
                    lut[r as usize] as f32,
                    lut[g as usize] as f32,
                    lut[b as usize] as f32,
                    a,
                )
            })
        }
    }
}

/// Run `transform` over every pixel, returning a new image.
/// `transform` receives (r, g, b, a) as f32 0..255 and returns the same.
fn apply_pixel_transform<F>(src: &RgbaImage, transform: F) -> RgbaImage
where
    F: Fn(f32, f32, f32, f32) -> (f32, f32, f32, f32) + Sync,
{
    let (w, h) = src.dimensions();
    let stride = w as usize * 4;
    let mut out = RgbaImage::new(w, h);
    if stride == 0 {
        return out;
    }
    let src_raw = src.as_raw();

    out.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let row_in = &src_raw[y * stride..(y + 1) * stride];
        for (px_out, px_in) in row_out.chunks_exact_mut(4).zip(row_in.chunks_exact(4)) {
            if px_in[3] == 0 {
                px_out.copy_from_slice(px_in);
                continue;
            }
            let (nr, ng, nb, na) = transform(
                px_in[0] as f32,
                px_in[1] as f32,
                px_in[2] as f32,
                px_in[3] as f32,
            );
            px_out[0] = nr.round().clamp(0.0, 255.0) as u8;
            px_out[1] = ng.round().clamp(0.0, 255.0) as u8;
            px_out[2] = nb.round().clamp(0.0, 255.0) as u8;
            px_out[3] = na.round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

/// Build a 256-entry lookup table from curve control points using
/// monotone cubic (Fritsch-Carlson) interpolation.
pub fn build_curves_lut(points: &[(f32, f32)]) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let mut pts: Vec<(f32, f32)> = points.to_vec();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0));
    pts.dedup_by(|a, b| (a.0 - b.0).abs() < 1e-6);

    if pts.len() < 2 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let n = pts.len();
    let delta: Vec<f32> = pts
        .windows(2)
        .map(|w| (w[1].1 - w[0].1) / (w[1].0 - w[0].0))
        .collect();

    // Tangents, flattened where the slope changes sign
    let mut m = vec![0.0f32; n];
    m[0] = delta[0];
    m[n - 1] = delta[n - 2];
    for i in 1..n - 1 {
        m[i] = if delta[i - 1] * delta[i] <= 0.0 {
            0.0
        } else {
            (delta[i - 1] + delta[i]) / 2.0
        };
    }
    for i in 0..n - 1 {
        if delta[i].abs() < 1e-6 {
            m[i] = 0.0;
            m[i + 1] = 0.0;
        } else {
            let alpha = m[i] / delta[i];
            let beta = m[i + 1] / delta[i];
            let s = alpha * alpha + beta * beta;
            if s > 9.0 {
                let tau = 3.0 / s.sqrt();
                m[i] = tau * alpha * delta[i];
                m[i + 1] = tau * beta * delta[i];
            }
        }
    }

    for (i, out) in lut.iter_mut().enumerate() {
        let x = i as f32;
        let y = if x <= pts[0].0 {
            pts[0].1
        } else if x >= pts[n - 1].0 {
            pts[n - 1].1
        } else {
            let seg = pts.windows(2).position(|w| x < w[1].0).unwrap_or(n - 2);
            let (x0, y0) = pts[seg];
            let (x1, y1) = pts[seg + 1];
            let h = x1 - x0;
            let t = (x - x0) / h;
            let t2 = t * t;
            let t3 = t2 * t;
            // Hermite basis
            let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
            let h10 = t3 - 2.0 * t2 + t;
            let h01 = -2.0 * t3 + 3.0 * t2;
            let h11 = t3 - t2;
            h00 * y0 + h10 * h * m[seg] + h01 * y1 + h11 * h * m[seg + 1]
        };
        *out = y.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Rotate hue by `turns` (1.0 = full circle) and scale HSL saturation by
/// `sat_factor`, keeping lightness.  Channels are 0..1.
///
/// Works on chroma directly: hue is a position on the six-sector colour
/// hexagon, saturation is chroma relative to the most a colour of this
/// lightness can carry.
fn shift_hue_saturation(rgb: [f32; 3], turns: f32, sat_factor: f32) -> [f32; 3] {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;
    let lightness = (max + min) / 2.0;
    if chroma < 1e-6 {
        return rgb;
    }

    let sector = if max == r {
        ((g - b) / chroma).rem_euclid(6.0)
    } else if max == g {
        (b - r) / chroma + 2.0
    } else {
        (r - g) / chroma + 4.0
    };
    let sector = (sector + turns * 6.0).rem_euclid(6.0);

    // Chroma ceiling at this lightness.
    let ceiling = 1.0 - (2.0 * lightness - 1.0).abs();
    let saturation = (chroma / ceiling * sat_factor).clamp(0.0, 1.0);
    let chroma = saturation * ceiling;

    let mid = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match sector as u32 {
        0 => (chroma, mid, 0.0),
        1 => (mid, chroma, 0.0),
        2 => (0.0, chroma, mid),
        3 => (0.0, mid, chroma),
        4 => (mid, 0.0, chroma),
        _ => (chroma, 0.0, mid),
    };
    let base = lightness - chroma / 2.0;
    [r1 + base, g1 + base, b1 + base]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn swatch(px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(3, 2, Rgba(px))
    }

    #[test]
    fn defaults_are_identity() {
        assert!(Adjustment::hsb().is_identity());
        assert!(Adjustment::curves().is_identity());
        let img = swatch([12, 200, 77, 255]);
        assert_eq!(apply_adjustment(&img, &Adjustment::hsb()), img);
        assert_eq!(apply_adjustment(&img, &Adjustment::curves()), img);
    }

    #[test]
    fn hue_rotation_moves_red_to_green() {
        let adj = Adjustment::Hsb {
            hue_deg: 120.0,
            saturation_pct: 100.0,
            brightness_pct: 0.0,
        };
        let out = apply_adjustment(&swatch([255, 0, 0, 255]), &adj);
        assert_eq!(out.get_pixel(1, 1), &Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn zero_saturation_greys_and_brightness_scales() {
        let grey = Adjustment::Hsb {
            hue_deg: 0.0,
            saturation_pct: 0.0,
            brightness_pct: 0.0,
        };
        let p = *apply_adjustment(&swatch([200, 40, 40, 180]), &grey).get_pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert_eq!(p[3], 180);

        let dim = Adjustment::Hsb {
            hue_deg: 0.0,
            saturation_pct: 100.0,
            brightness_pct: -50.0,
        };
        let p = *apply_adjustment(&swatch([200, 100, 50, 255]), &dim).get_pixel(0, 0);
        assert_eq!(p, Rgba([100, 50, 25, 255]));
    }

    #[test]
    fn hue_shift_keeps_lightness_and_wraps() {
        let [r, g, b] = shift_hue_saturation([0.8, 0.4, 0.2], 0.5, 1.0);
        let light = (r.max(g).max(b) + r.min(g).min(b)) / 2.0;
        assert!((light - 0.5).abs() < 1e-5);
        // Half a turn lands on the complementary hue.
        assert!(b > g && g > r);

        let full = shift_hue_saturation([0.8, 0.4, 0.2], 1.0, 1.0);
        for (got, want) in full.iter().zip([0.8, 0.4, 0.2]) {
            assert!((got - want).abs() < 1e-5);
        }
        assert_eq!(shift_hue_saturation([0.3, 0.3, 0.3], 0.25, 2.0), [0.3, 0.3, 0.3]);
    }

    #[test]
    fn inverted_curve() {
        let adj = Adjustment::Curves {
            points: vec![(0.0, 255.0), (255.0, 0.0)],
        };
        let out = apply_adjustment(&swatch([0, 100, 255, 255]), &adj);
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 155, 0, 255]));
    }

    #[test]
    fn curve_lut_is_monotone_through_points() {
        let lut = build_curves_lut(&[(0.0, 0.0), (64.0, 128.0), (255.0, 255.0)]);
        assert_eq!(lut[0], 0);
        assert_eq!(lut[64], 128);
        assert_eq!(lut[255], 255);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
    }
}
