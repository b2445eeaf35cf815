// ============================================================================
// INTERACTION: pointer-driven state machine for the canvas
// ============================================================================
//
// Pointer positions arrive in screen space.  Everything transient about the
// current gesture lives in one `InteractionContext`, which is wiped whenever
// the machine returns to idle.

use std::f32::consts::FRAC_PI_2;

use egui::{Pos2, Vec2};

use crate::editor::Editor;
use crate::geometry::{angle_between, distance, midpoint, rotate_point};
use crate::layers::{Layer, LayerId, LayerTransform, find_layer, find_layer_mut, hit_test};

/// Grab radius for transform handles, in screen pixels.
pub const HANDLE_HIT_RADIUS: f32 = 30.0;
/// Drawn radius of corner handles, in screen pixels.
pub const HANDLE_RADIUS: f32 = 5.0;
/// Distance of the rotation handle above the top edge, in screen pixels.
pub const ROTATE_HANDLE_OFFSET: f32 = 30.0;
/// Resizing never shrinks a layer below this fraction of its start size.
pub const MIN_RESIZE_SCALE: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Move,
    Brush,
    Eraser,
    Selection,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[Tool::Move, Tool::Brush, Tool::Eraser, Tool::Selection]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Move => "Move",
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::Selection => "Lasso",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InteractionMode {
    #[default]
    Idle,
    Panning,
    Moving,
    Resizing,
    Rotating,
    Drawing,
    Selecting,
    Gesture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
    Rotate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    /// Middle button / pan modifier: drags the viewport.
    Pan,
}

/// Two-pointer baseline captured when a pinch/rotate starts.
#[derive(Clone, Copy, Debug)]
struct GestureBaseline {
    layer: LayerId,
    distance: f32,
    angle: f32,
    midpoint: Pos2,
    start: LayerTransform,
}

/// All per-gesture transients.
#[derive(Clone, Debug, Default)]
pub struct InteractionContext {
    mode: InteractionMode,
    /// Active pointers in press order (screen space).
    pointers: Vec<(u64, Pos2)>,
    /// Scene-space press point for move/resize/rotate.
    drag_start: Option<Pos2>,
    /// Last screen position while panning.
    pan_last: Option<Pos2>,
    handle: Option<Handle>,
    /// Start transforms of every layer a drag affects.
    initial: Vec<(LayerId, LayerTransform)>,
    gesture: Option<GestureBaseline>,
    /// Last scene point painted in the current stroke.
    last_paint: Option<Pos2>,
}

impl InteractionContext {
    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.mode == InteractionMode::Idle && self.pointers.is_empty()
    }

    /// Drop every transient, keeping the pointers that are still down.
    fn restart(&mut self, mode: InteractionMode) {
        let pointers = std::mem::take(&mut self.pointers);
        *self = InteractionContext { mode, pointers, ..Default::default() };
    }

    pub fn reset(&mut self) {
        *self = InteractionContext::default();
    }

    fn track(&mut self, id: u64, pos: Pos2) {
        match self.pointers.iter_mut().find(|(pid, _)| *pid == id) {
            Some(entry) => entry.1 = pos,
            None => self.pointers.push((id, pos)),
        }
    }

    fn two_pointers(&self) -> Option<(Pos2, Pos2)> {
        match self.pointers.as_slice() {
            [(_, a), (_, b), ..] => Some((*a, *b)),
            _ => None,
        }
    }
}

/// Scene positions of the draggable handles of `layer` at `zoom`.
/// Corners follow the layer rotation; the rotation handle sits above the
/// rotated top edge.
pub fn handle_points(layer: &Layer, zoom: f32) -> [(Handle, Pos2); 5] {
    let [tl, tr, br, bl] = layer.corners();
    let top_mid = midpoint(tl, tr);
    let up = rotate_point(Pos2::new(0.0, -ROTATE_HANDLE_OFFSET / zoom), Pos2::ZERO, layer.rotation);
    [
        (Handle::Rotate, top_mid + up.to_vec2()),
        (Handle::TopLeft, tl),
        (Handle::TopRight, tr),
        (Handle::BottomRight, br),
        (Handle::BottomLeft, bl),
    ]
}

impl Editor {
    pub fn interaction_mode(&self) -> InteractionMode {
        self.interaction.mode()
    }

    /// Pointer pressed at `screen`.  Ignored while an adjustment is open.
    pub fn pointer_down(&mut self, pointer_id: u64, screen: Pos2, button: PointerButton) {
        if self.adjustment.is_some() {
            return;
        }
        self.interaction.track(pointer_id, screen);

        if button == PointerButton::Pan {
            self.interaction.restart(InteractionMode::Panning);
            self.interaction.pan_last = Some(screen);
            return;
        }

        if self.interaction.pointer_count() == 2 {
            self.begin_gesture();
            return;
        }
        if self.interaction.pointer_count() > 2 || self.interaction.mode != InteractionMode::Idle {
            return;
        }

        let scene = self.viewport.screen_to_scene(screen);
        match self.tool {
            Tool::Selection => {
                self.selection.begin(scene);
                self.interaction.restart(InteractionMode::Selecting);
                self.invalidate();
            }
            Tool::Brush | Tool::Eraser => {
                if self.active_id.is_none() {
                    return;
                }
                self.interaction.restart(InteractionMode::Drawing);
                self.paint_to(None, scene);
                self.interaction.last_paint = Some(scene);
            }
            Tool::Move => self.begin_move_tool(scene),
        }
    }

    pub fn pointer_move(&mut self, pointer_id: u64, screen: Pos2) {
        if !self.interaction.pointers.iter().any(|(id, _)| *id == pointer_id) {
            return;
        }
        self.interaction.track(pointer_id, screen);
        let scene = self.viewport.screen_to_scene(screen);

        match self.interaction.mode {
            InteractionMode::Idle => {}
            InteractionMode::Panning => {
                if let Some(last) = self.interaction.pan_last {
                    let d = screen - last;
                    self.viewport.pan(d.x, d.y);
                    self.interaction.pan_last = Some(screen);
                    self.invalidate();
                }
            }
            InteractionMode::Gesture => self.update_gesture(),
            InteractionMode::Drawing => {
                let prev = self.interaction.last_paint;
                self.paint_to(prev, scene);
                self.interaction.last_paint = Some(scene);
            }
            InteractionMode::Selecting => {
                self.selection.extend(scene);
                self.invalidate();
            }
            InteractionMode::Moving => {
                let Some(start) = self.interaction.drag_start else { return };
                let delta = scene - start;
                let initial = self.interaction.initial.clone();
                for (id, t) in initial {
                    if let Some(layer) = find_layer_mut(&mut self.layers, id) {
                        layer.x = t.x + delta.x;
                        layer.y = t.y + delta.y;
                    }
                }
                self.mark_modified();
            }
            InteractionMode::Rotating => {
                let Some(&(id, t)) = self.interaction.initial.first() else { return };
                if let Some(layer) = find_layer_mut(&mut self.layers, id) {
                    layer.rotation = angle_between(t.center(), scene) + FRAC_PI_2;
                    self.mark_modified();
                }
            }
            InteractionMode::Resizing => {
                let (Some(start), Some(&(id, t))) = (self.interaction.drag_start, self.interaction.initial.first()) else {
                    return;
                };
                if t.width.abs() <= f32::EPSILON {
                    return;
                }
                let scale = ((t.width + (scene.x - start.x)) / t.width).max(MIN_RESIZE_SCALE);
                if let Some(layer) = find_layer_mut(&mut self.layers, id) {
                    layer.width = t.width * scale;
                    layer.height = t.height * scale;
                    self.mark_modified();
                }
            }
        }
    }

    pub fn pointer_up(&mut self, pointer_id: u64) {
        self.interaction.pointers.retain(|(id, _)| *id != pointer_id);
        if !self.interaction.pointers.is_empty() {
            return;
        }
        if self.interaction.mode == InteractionMode::Selecting {
            self.selection.finish();
            self.invalidate();
        }
        self.interaction.reset();
    }

    /// Escape / tool switch: abandon whatever gesture is in progress.
    pub fn cancel_interaction(&mut self) {
        if self.interaction.mode == InteractionMode::Selecting {
            self.selection.clear();
            self.invalidate();
        }
        self.interaction.reset();
    }

    fn begin_move_tool(&mut self, scene: Pos2) {
        let zoom = self.viewport.zoom;

        if let Some(active) = self.active_layer()
            && !active.locked
            && !active.is_group()
        {
            let grab = HANDLE_HIT_RADIUS / zoom;
            let hit = handle_points(active, zoom)
                .into_iter()
                .find(|(_, p)| distance(*p, scene) <= grab);
            if let Some((handle, _)) = hit {
                let entry = (active.id, active.transform());
                let mode = if handle == Handle::Rotate {
                    InteractionMode::Rotating
                } else {
                    InteractionMode::Resizing
                };
                self.interaction.restart(mode);
                self.interaction.handle = Some(handle);
                self.interaction.drag_start = Some(scene);
                self.interaction.initial = vec![entry];
                return;
            }
        }

        let Some(hit) = hit_test(&self.layers, scene) else {
            self.active_id = None;
            self.invalidate();
            return;
        };

        if !self.multi_selected.contains(&hit) {
            self.multi_selected.clear();
        }
        self.active_id = Some(hit);
        let affected: Vec<LayerId> = if self.multi_selected.is_empty() {
            vec![hit]
        } else {
            self.multi_selected.clone()
        };
        let initial = affected
            .into_iter()
            .filter_map(|id| find_layer(&self.layers, id).map(|l| (id, l.transform())))
            .collect();

        self.interaction.restart(InteractionMode::Moving);
        self.interaction.drag_start = Some(scene);
        self.interaction.initial = initial;
        self.invalidate();
    }

    fn begin_gesture(&mut self) {
        let Some((a, b)) = self.interaction.two_pointers() else { return };
        let layer = match (self.tool, self.active_layer()) {
            (Tool::Move, Some(layer)) if !layer.locked => layer,
            _ => return,
        };
        let baseline = GestureBaseline {
            layer: layer.id,
            distance: distance(a, b),
            angle: angle_between(a, b),
            midpoint: midpoint(a, b),
            start: layer.transform(),
        };
        self.interaction.restart(InteractionMode::Gesture);
        self.interaction.gesture = Some(baseline);
    }

    fn update_gesture(&mut self) {
        let (Some(base), Some((a, b))) = (self.interaction.gesture, self.interaction.two_pointers()) else {
            return;
        };
        if base.distance <= f32::EPSILON {
            return;
        }
        let scale = distance(a, b) / base.distance;
        let rotation = angle_between(a, b) - base.angle;
        let shift: Vec2 = (midpoint(a, b) - base.midpoint) / self.viewport.zoom;
        let t = base.start;

        if let Some(layer) = find_layer_mut(&mut self.layers, base.layer) {
            layer.width = t.width * scale;
            layer.height = t.height * scale;
            layer.rotation = t.rotation + rotation;
            // Keep the box centered on where the start center has travelled.
            layer.x = t.x + shift.x + t.width * (1.0 - scale) / 2.0;
            layer.y = t.y + shift.y + t.height * (1.0 - scale) / 2.0;
            self.mark_modified();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasConfig;
    use image::RgbaImage;

    fn editor_with_square() -> (Editor, LayerId) {
        let mut ed = Editor::new(CanvasConfig::custom(1000, 1000));
        let id = ed.add_layer(Some(RgbaImage::new(200, 200)));
        ed.update_layer(
            id,
            &crate::layers::LayerPatch {
                x: Some(100.0),
                y: Some(100.0),
                width: Some(200.0),
                height: Some(200.0),
                ..Default::default()
            },
        );
        ed.set_tool(Tool::Move);
        (ed, id)
    }

    fn layer(ed: &Editor, id: LayerId) -> &Layer {
        find_layer(&ed.layers, id).unwrap()
    }

    #[test]
    fn pinch_scales_and_rotates_by_pointer_geometry() {
        let (mut ed, id) = editor_with_square();
        ed.pointer_down(1, Pos2::new(150.0, 200.0), PointerButton::Primary);
        ed.pointer_down(2, Pos2::new(250.0, 200.0), PointerButton::Primary);
        assert_eq!(ed.interaction_mode(), InteractionMode::Gesture);

        // start: distance 100, angle 0.  end: distance 200, angle 90°
        ed.pointer_move(2, Pos2::new(150.0, 400.0));
        let l = layer(&ed, id);
        let expected_scale = 200.0 / 100.0;
        assert!((l.width - 200.0 * expected_scale).abs() < 1e-3);
        assert!((l.height - 200.0 * expected_scale).abs() < 1e-3);
        assert!((l.rotation - FRAC_PI_2).abs() < 1e-5);

        ed.pointer_up(1);
        assert_eq!(ed.interaction_mode(), InteractionMode::Gesture);
        ed.pointer_up(2);
        assert!(ed.interaction.is_idle());
    }

    #[test]
    fn gesture_needs_move_tool() {
        let (mut ed, _) = editor_with_square();
        ed.set_tool(Tool::Brush);
        ed.pointer_down(1, Pos2::new(150.0, 200.0), PointerButton::Primary);
        ed.pointer_down(2, Pos2::new(250.0, 200.0), PointerButton::Primary);
        assert_ne!(ed.interaction_mode(), InteractionMode::Gesture);
    }

    #[test]
    fn corner_drag_resizes_uniformly_from_fixed_origin() {
        let (mut ed, id) = editor_with_square();
        ed.pointer_down(1, Pos2::new(300.0, 100.0), PointerButton::Primary);
        assert_eq!(ed.interaction_mode(), InteractionMode::Resizing);
        assert_eq!(ed.interaction.handle(), Some(Handle::TopRight));
        ed.pointer_move(1, Pos2::new(400.0, 100.0));
        let l = layer(&ed, id);
        assert!((l.width - 300.0).abs() < 1e-3);
        assert!((l.height - 300.0).abs() < 1e-3);
        assert_eq!((l.x, l.y), (100.0, 100.0));

        ed.pointer_move(1, Pos2::new(-2000.0, 100.0));
        assert!((layer(&ed, id).width - 20.0).abs() < 1e-3);
        ed.pointer_up(1);
        assert_eq!(ed.interaction_mode(), InteractionMode::Idle);
    }

    #[test]
    fn rotation_handle_zero_points_up() {
        let (mut ed, id) = editor_with_square();
        // rotation handle: top-mid (200,100) raised 30 units
        ed.pointer_down(1, Pos2::new(200.0, 70.0), PointerButton::Primary);
        assert_eq!(ed.interaction_mode(), InteractionMode::Rotating);
        ed.pointer_move(1, Pos2::new(200.0, 50.0));
        assert!(layer(&ed, id).rotation.abs() < 1e-5);
        // Directly right of the center (200,200) is a quarter turn.
        ed.pointer_move(1, Pos2::new(400.0, 200.0));
        assert!((layer(&ed, id).rotation - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn dragging_moves_all_multi_selected_layers() {
        let (mut ed, a) = editor_with_square();
        let b = ed.add_layer(Some(RgbaImage::new(50, 50)));
        ed.update_layer(b, &crate::layers::LayerPatch { x: Some(600.0), y: Some(600.0), width: Some(50.0), height: Some(50.0), ..Default::default() });
        ed.set_tool(Tool::Move);
        ed.set_active_layer(Some(a));
        ed.toggle_layer_selection(b);
        assert_eq!(ed.multi_selected, vec![a, b]);

        ed.pointer_down(1, Pos2::new(150.0, 150.0), PointerButton::Primary);
        assert_eq!(ed.interaction_mode(), InteractionMode::Moving);
        ed.pointer_move(1, Pos2::new(160.0, 130.0));
        ed.pointer_up(1);

        assert_eq!((layer(&ed, a).x, layer(&ed, a).y), (110.0, 80.0));
        assert_eq!((layer(&ed, b).x, layer(&ed, b).y), (610.0, 580.0));
    }

    #[test]
    fn clicking_empty_space_clears_active() {
        let (mut ed, id) = editor_with_square();
        assert_eq!(ed.active_id, Some(id));
        ed.pointer_down(1, Pos2::new(900.0, 900.0), PointerButton::Primary);
        assert_eq!(ed.active_id, None);
        ed.pointer_up(1);
    }

    #[test]
    fn lasso_activates_on_release_with_three_points() {
        let (mut ed, _) = editor_with_square();
        ed.set_tool(Tool::Selection);
        ed.pointer_down(1, Pos2::new(0.0, 0.0), PointerButton::Primary);
        ed.pointer_move(1, Pos2::new(10.0, 0.0));
        ed.pointer_up(1);
        assert!(!ed.selection.active);

        ed.pointer_down(1, Pos2::new(0.0, 0.0), PointerButton::Primary);
        ed.pointer_move(1, Pos2::new(10.0, 0.0));
        ed.pointer_move(1, Pos2::new(10.0, 10.0));
        assert_eq!(ed.interaction_mode(), InteractionMode::Selecting);
        ed.pointer_up(1);
        assert!(ed.selection.active);
        assert_eq!(ed.selection.points.len(), 3);
    }

    #[test]
    fn brush_paints_on_press_and_drag() {
        let mut ed = Editor::new(CanvasConfig::custom(100, 100));
        let id = ed.add_layer(None);
        assert_eq!(ed.tool, Tool::Brush);
        ed.brush.kernel = crate::ops::paint::BrushKernel::Hard;
        ed.brush.size = 4.0;
        ed.pointer_down(1, Pos2::new(10.0, 50.0), PointerButton::Primary);
        ed.pointer_move(1, Pos2::new(90.0, 50.0));
        ed.pointer_up(1);
        let img = layer(&ed, id).raster().unwrap().image();
        assert!((10..90).all(|x| img.get_pixel(x, 50)[3] > 0));
        assert!(ed.has_unsaved_changes);
    }

    #[test]
    fn pan_button_moves_viewport_only() {
        let (mut ed, id) = editor_with_square();
        ed.pointer_down(9, Pos2::new(10.0, 10.0), PointerButton::Pan);
        assert_eq!(ed.interaction_mode(), InteractionMode::Panning);
        ed.pointer_move(9, Pos2::new(40.0, 30.0));
        ed.pointer_up(9);
        assert_eq!((ed.viewport.x, ed.viewport.y), (30.0, 20.0));
        assert_eq!(layer(&ed, id).x, 100.0);
    }

    #[test]
    fn adjustment_blocks_pointer_and_cancel_resets() {
        let (mut ed, _) = editor_with_square();
        ed.begin_adjustment(crate::ops::adjustments::Adjustment::hsb());
        ed.pointer_down(1, Pos2::new(150.0, 150.0), PointerButton::Primary);
        assert!(ed.interaction.is_idle());
        ed.cancel_adjustment();

        ed.set_tool(Tool::Selection);
        ed.pointer_down(1, Pos2::new(0.0, 0.0), PointerButton::Primary);
        ed.pointer_move(1, Pos2::new(5.0, 5.0));
        ed.cancel_interaction();
        assert!(ed.interaction.is_idle());
        assert!(ed.selection.points.is_empty());
    }
}
