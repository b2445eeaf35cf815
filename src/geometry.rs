// ============================================================================
// GEOMETRY & COLOR HELPERS: pure functions shared by the editor
// ============================================================================

use egui::Pos2;

/// Euclidean distance between two points.
pub fn distance(a: Pos2, b: Pos2) -> f32 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Angle of the vector a→b in radians (atan2 convention, +y points down).
pub fn angle_between(a: Pos2, b: Pos2) -> f32 {
    (b.y - a.y).atan2(b.x - a.x)
}

pub fn midpoint(a: Pos2, b: Pos2) -> Pos2 {
    Pos2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Rotate `p` around `pivot` by `angle` radians.
pub fn rotate_point(p: Pos2, pivot: Pos2, angle: f32) -> Pos2 {
    let (sin, cos) = angle.sin_cos();
    let dx = p.x - pivot.x;
    let dy = p.y - pivot.y;
    Pos2::new(pivot.x + dx * cos - dy * sin, pivot.y + dx * sin + dy * cos)
}

/// Even-odd point-in-polygon test.  Polygons with fewer than 3 vertices
/// contain nothing.
pub fn point_in_polygon(p: Pos2, poly: &[Pos2]) -> bool {
    if poly.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (a, b) = (poly[i], poly[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Parse `#rrggbb` (leading `#` optional).  Anything else yields black.
pub fn hex_to_rgb(hex: &str) -> [u8; 3] {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.is_ascii() {
        return [0, 0, 0];
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => [r, g, b],
        _ => [0, 0, 0],
    }
}

pub fn rgb_to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// HSB → `#rrggbb`.
/// `h`: 0..360 degrees, `s` and `b`: 0..100 percent.
pub fn hsb_to_hex(h: f32, s: f32, b: f32) -> String {
    let s = s / 100.0;
    let b = b / 100.0;
    let k = |n: f32| (n + h / 60.0).rem_euclid(6.0);
    let f = |n: f32| b * (1.0 - s * k(n).min(4.0 - k(n)).clamp(0.0, 1.0));
    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    rgb_to_hex([to_u8(f(5.0)), to_u8(f(3.0)), to_u8(f(1.0))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn distance_and_angle() {
        let a = Pos2::new(0.0, 0.0);
        let b = Pos2::new(3.0, 4.0);
        assert!((distance(a, b) - 5.0).abs() < 1e-6);
        assert!((angle_between(a, Pos2::new(0.0, 2.0)) - FRAC_PI_2).abs() < 1e-6);
        assert!((angle_between(a, Pos2::new(-1.0, 0.0)) - PI).abs() < 1e-6);
    }

    #[test]
    fn rotation_about_pivot() {
        let p = rotate_point(Pos2::new(2.0, 1.0), Pos2::new(1.0, 1.0), FRAC_PI_2);
        assert!((p.x - 1.0).abs() < 1e-5);
        assert!((p.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn polygon_containment() {
        let square = [
            Pos2::new(0.0, 0.0),
            Pos2::new(10.0, 0.0),
            Pos2::new(10.0, 10.0),
            Pos2::new(0.0, 10.0),
        ];
        assert!(point_in_polygon(Pos2::new(5.0, 5.0), &square));
        assert!(!point_in_polygon(Pos2::new(15.0, 5.0), &square));
        assert!(!point_in_polygon(Pos2::new(5.0, 5.0), &square[..2]));
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(hex_to_rgb("#ff8000"), [255, 128, 0]);
        assert_eq!(hex_to_rgb("00FF10"), [0, 255, 16]);
        assert_eq!(hex_to_rgb("#zzz"), [0, 0, 0]);
        assert_eq!(rgb_to_hex([1, 2, 255]), "#0102ff");
    }

    #[test]
    fn hsb_primaries() {
        assert_eq!(hsb_to_hex(0.0, 100.0, 100.0), "#ff0000");
        assert_eq!(hsb_to_hex(120.0, 100.0, 100.0), "#00ff00");
        assert_eq!(hsb_to_hex(240.0, 100.0, 100.0), "#0000ff");
        assert_eq!(hsb_to_hex(0.0, 0.0, 100.0), "#ffffff");
        assert_eq!(hsb_to_hex(300.0, 50.0, 0.0), "#000000");
    }
}
