// ============================================================================
// CLIPBOARD: single-slot copy / cut / paste of a layer's raster
// ============================================================================
//
// Copy and cut always take the whole layer raster, even while a lasso is
// active.  Paste never consumes the slot.

use image::{Rgba, RgbaImage};

use crate::canvas::{BlendMode, CanvasConfig};
use crate::layers::{Layer, Raster};

/// Displacement from dead-center applied to pasted layers.
pub const PASTE_OFFSET: f32 = 20.0;

pub const PASTED_LAYER_NAME: &str = "Pasted Layer";

#[derive(Clone, Debug)]
pub struct ClipboardSlot {
    pub image: RgbaImage,
    pub opacity: f32,
    pub blend_mode: BlendMode,
}

/// Snapshot `layer`'s raster.  `None` for groups and empty image layers.
pub fn copy_layer(layer: &Layer) -> Option<ClipboardSlot> {
    let raster = layer.raster()?;
    Some(ClipboardSlot {
        image: raster.image().clone(),
        opacity: layer.opacity,
        blend_mode: layer.blend_mode,
    })
}

/// Wipe the whole raster to transparent (materializing it first).
pub fn clear_raster(layer: &mut Layer) -> bool {
    match layer.raster_mut() {
        Some(raster) => {
            let img = raster.make_editable();
            for px in img.pixels_mut() {
                *px = Rgba([px[0], px[1], px[2], 0]);
            }
            true
        }
        None => false,
    }
}

/// Build the independent layer a paste inserts: native raster size, centered
/// on the scene plus [`PASTE_OFFSET`], fresh id.
pub fn pasted_layer(slot: &ClipboardSlot, config: &CanvasConfig) -> Layer {
    let (w, h) = slot.image.dimensions();
    let (w, h) = (w as f32, h as f32);
    let x = config.width as f32 / 2.0 - w / 2.0 + PASTE_OFFSET;
    let y = config.height as f32 / 2.0 - h / 2.0 + PASTE_OFFSET;
    let mut layer = Layer::new_image(PASTED_LAYER_NAME, Some(Raster::Surface(slot.image.clone())), x, y, w, h);
    layer.opacity = slot.opacity;
    layer.blend_mode = slot.blend_mode;
    layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn source_layer() -> Layer {
        let img = RgbaImage::from_pixel(40, 30, Rgba([200, 10, 10, 255]));
        let mut layer = Layer::new_image("src", Some(Raster::Source(Arc::new(img))), 5.0, 5.0, 80.0, 60.0);
        layer.opacity = 35.0;
        layer.blend_mode = BlendMode::Screen;
        layer
    }

    #[test]
    fn copy_captures_raster_and_presentation() {
        let slot = copy_layer(&source_layer()).unwrap();
        assert_eq!(slot.image.dimensions(), (40, 30));
        assert_eq!(slot.opacity, 35.0);
        assert_eq!(slot.blend_mode, BlendMode::Screen);
        assert!(copy_layer(&Layer::new_group("g", vec![])).is_none());
    }

    #[test]
    fn cut_clears_whole_surface() {
        let mut layer = source_layer();
        assert!(clear_raster(&mut layer));
        let raster = layer.raster().unwrap();
        assert!(raster.is_editable());
        assert!(raster.image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn paste_is_offset_and_independent() {
        let src = source_layer();
        let slot = copy_layer(&src).unwrap();
        let cfg = CanvasConfig::custom(1000, 800);
        let pasted = pasted_layer(&slot, &cfg);
        assert_ne!(pasted.id, src.id);
        assert_eq!(pasted.name, PASTED_LAYER_NAME);
        assert_eq!((pasted.x, pasted.y), (500.0 - 20.0 + 20.0, 400.0 - 15.0 + 20.0));
        assert_eq!((pasted.width, pasted.height), (40.0, 30.0));
        assert_eq!(pasted.opacity, 35.0);
        assert_eq!(pasted.blend_mode, BlendMode::Screen);

        // The slot survives for a second paste.
        let again = pasted_layer(&slot, &cfg);
        assert_ne!(again.id, pasted.id);
    }
}
