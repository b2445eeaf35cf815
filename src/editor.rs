// ============================================================================
// EDITOR: owns the layer tree and every piece of editing state
// ============================================================================
//
// Layer rasters are mutated in place.  Anything that changes what the canvas
// shows bumps `revision`; anything that changes the layer tree additionally
// bumps `tree_revision`, which autosave watches.

use std::sync::Arc;

use image::RgbaImage;

use crate::canvas::{CanvasConfig, Viewport};
use crate::interaction::{InteractionContext, Tool};
use crate::io::{self, StoreError};
use crate::layers::{self, Layer, LayerId, LayerKind, LayerPatch, Raster, find_layer, find_layer_mut};
use crate::ops::adjustments::{self, Adjustment};
use crate::ops::clipboard::{self, ClipboardSlot};
use crate::ops::generate::{GenerateError, GenerationQueue, ImageGenerator};
use crate::ops::paint::{self, StrokeParams};
use crate::ops::selection::LassoSelection;
use crate::renderer;
use crate::settings::AppSettings;

/// Imported / generated content is capped to this share of the scene width.
const IMPORT_MAX_WIDTH_FRACTION: f32 = 0.8;

pub const IMAGE_LAYER_NAME: &str = "Image Layer";
pub const GROUP_NAME: &str = "Group";

pub struct Editor {
    pub config: CanvasConfig,
    pub layers: Vec<Layer>,
    pub active_id: Option<LayerId>,
    /// Extra layers selected alongside the active one (move / generate refs).
    pub multi_selected: Vec<LayerId>,
    pub tool: Tool,
    pub brush: StrokeParams,
    pub eraser: StrokeParams,
    pub selection: LassoSelection,
    pub clipboard: Option<ClipboardSlot>,
    pub viewport: Viewport,
    /// Pending, uncommitted adjustment for the active layer.
    pub adjustment: Option<Adjustment>,
    pub interaction: InteractionContext,
    /// Saved project this session belongs to, once saved or opened.
    pub project_id: Option<String>,
    pub has_unsaved_changes: bool,
    /// Last user-facing error (generation failure, bad import, ...).
    pub last_error: Option<String>,
    revision: u64,
    tree_revision: u64,
    generation: GenerationQueue,
    paint_seed: u32,
}

impl Editor {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            config,
            layers: Vec::new(),
            active_id: None,
            multi_selected: Vec::new(),
            tool: Tool::Move,
            brush: StrokeParams::default(),
            eraser: StrokeParams {
                size: 50.0,
                erase: true,
                ..StrokeParams::default()
            },
            selection: LassoSelection::default(),
            clipboard: None,
            viewport: Viewport::default(),
            adjustment: None,
            interaction: InteractionContext::default(),
            project_id: None,
            has_unsaved_changes: false,
            last_error: None,
            revision: 0,
            tree_revision: 0,
            generation: GenerationQueue::default(),
            paint_seed: 0,
        }
    }

    /// Fresh editor with brush/eraser defaults taken from settings.
    pub fn with_settings(config: CanvasConfig, settings: &AppSettings) -> Self {
        let mut editor = Self::new(config);
        editor.brush = settings.brush_params();
        editor.eraser = settings.eraser_params();
        editor
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Render invalidation counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Layer-tree mutation counter.
    pub fn tree_revision(&self) -> u64 {
        self.tree_revision
    }

    /// Something visible changed (selection, viewport, overlays).
    pub fn invalidate(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// The layer tree or a raster changed.
    pub fn mark_modified(&mut self) {
        self.invalidate();
        self.tree_revision = self.tree_revision.wrapping_add(1);
        self.has_unsaved_changes = true;
    }

    // ------------------------------------------------------------------
    // Layer tree
    // ------------------------------------------------------------------

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active_id.and_then(|id| find_layer(&self.layers, id))
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        find_layer(&self.layers, id)
    }

    /// Append a top-level image layer and make it active.
    ///
    /// Without content: a blank scene-sized surface, and the brush is picked.
    /// With content: native size capped to 80% of the scene width (aspect
    /// kept), centered on the scene.
    pub fn add_layer(&mut self, content: Option<RgbaImage>) -> LayerId {
        let scene_w = self.config.width as f32;
        let scene_h = self.config.height as f32;
        let layer = match content {
            None => {
                let name = format!("Layer {}", self.layers.len() + 1);
                let surface = RgbaImage::new(self.config.width, self.config.height);
                self.tool = Tool::Brush;
                Layer::new_image(name, Some(Raster::Surface(surface)), 0.0, 0.0, scene_w, scene_h)
            }
            Some(img) => {
                let (iw, ih) = img.dimensions();
                let aspect = if ih == 0 { 1.0 } else { iw as f32 / ih as f32 };
                let width = (scene_w * IMPORT_MAX_WIDTH_FRACTION).min(iw as f32);
                let height = width / aspect;
                let x = (scene_w - width) / 2.0;
                let y = (scene_h - height) / 2.0;
                Layer::new_image(IMAGE_LAYER_NAME, Some(Raster::Source(Arc::new(img))), x, y, width, height)
            }
        };
        let id = layer.id;
        self.layers.push(layer);
        self.active_id = Some(id);
        self.mark_modified();
        id
    }

    /// Insert a fully built layer on top (paste, generated result).
    pub fn push_layer(&mut self, layer: Layer) -> LayerId {
        let id = layer.id;
        self.layers.push(layer);
        self.active_id = Some(id);
        self.mark_modified();
        id
    }

    pub fn update_layer(&mut self, id: LayerId, patch: &LayerPatch) -> bool {
        let changed = layers::update_layer(&mut self.layers, id, patch);
        if changed {
            self.mark_modified();
        }
        changed
    }

    /// Remove a layer (and its subtree) from wherever it sits.
    pub fn delete_layer(&mut self, id: LayerId) -> bool {
        let Some(removed) = layers::remove_layer(&mut self.layers, id) else {
            return false;
        };
        if let Some(active) = self.active_id
            && removed.contains_id(active)
        {
            self.active_id = None;
            if self.adjustment.take().is_some() {
                self.interaction.reset();
            }
        }
        self.multi_selected.retain(|m| !removed.contains_id(*m));
        self.mark_modified();
        true
    }

    pub fn set_active_layer(&mut self, id: Option<LayerId>) {
        let id = id.filter(|id| find_layer(&self.layers, *id).is_some());
        if id != self.active_id {
            // A pending adjustment belongs to the layer it was opened on.
            self.adjustment = None;
        }
        self.active_id = id;
        self.invalidate();
    }

    /// Add/remove `id` from the multi-selection.  Starting a multi-select
    /// pulls the current active layer in first.
    pub fn toggle_layer_selection(&mut self, id: LayerId) {
        if find_layer(&self.layers, id).is_none() {
            return;
        }
        if self.multi_selected.is_empty()
            && let Some(active) = self.active_id
            && active != id
        {
            self.multi_selected.push(active);
        }
        if let Some(pos) = self.multi_selected.iter().position(|m| *m == id) {
            self.multi_selected.remove(pos);
        } else {
            self.multi_selected.push(id);
        }
        self.invalidate();
    }

    pub fn clear_multi_selection(&mut self) {
        if !self.multi_selected.is_empty() {
            self.multi_selected.clear();
            self.invalidate();
        }
    }

    /// Wrap the given top-level layers in a new group placed where the
    /// topmost member was.  Ids not found at the top level are ignored.
    pub fn group_layers(&mut self, ids: &[LayerId], name: Option<&str>) -> Option<LayerId> {
        let positions: Vec<usize> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| ids.contains(&l.id))
            .map(|(i, _)| i)
            .collect();
        let &top = positions.last()?;

        let mut children = Vec::with_capacity(positions.len());
        for &i in positions.iter().rev() {
            children.push(self.layers.remove(i));
        }
        children.reverse();

        let insert_at = top + 1 - positions.len();
        let group = Layer::new_group(name.unwrap_or(GROUP_NAME), children);
        let gid = group.id;
        self.layers.insert(insert_at, group);
        self.active_id = Some(gid);
        self.multi_selected.clear();
        self.mark_modified();
        Some(gid)
    }

    pub fn toggle_group_collapsed(&mut self, id: LayerId) -> bool {
        match find_layer_mut(&mut self.layers, id) {
            Some(Layer {
                kind: LayerKind::Group { collapsed, .. },
                ..
            }) => {
                *collapsed = !*collapsed;
                self.invalidate();
                true
            }
            _ => false,
        }
    }

    /// Move one step towards the top of the stack within its parent.
    pub fn move_layer_up(&mut self, id: LayerId) -> bool {
        self.shift_layer(id, 1)
    }

    pub fn move_layer_down(&mut self, id: LayerId) -> bool {
        self.shift_layer(id, -1)
    }

    fn shift_layer(&mut self, id: LayerId, dir: isize) -> bool {
        let Some((list, idx)) = layers::sibling_list_mut(&mut self.layers, id) else {
            return false;
        };
        let target = idx as isize + dir;
        if target < 0 || target as usize >= list.len() {
            return false;
        }
        list.swap(idx, target as usize);
        self.mark_modified();
        true
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    /// Switching tools drops the lasso and any half-finished gesture.
    pub fn set_tool(&mut self, tool: Tool) {
        self.interaction.reset();
        self.selection.clear();
        self.tool = tool;
        self.invalidate();
    }

    /// Paint from `prev` to `cur` (scene space) on the active layer with the
    /// current brush or eraser.
    pub(crate) fn paint_to(&mut self, prev: Option<egui::Pos2>, cur: egui::Pos2) {
        let params = if self.tool == Tool::Eraser { self.eraser } else { self.brush };
        let Some(id) = self.active_id else { return };
        let Some(layer) = find_layer_mut(&mut self.layers, id) else { return };
        if paint::paint_segment(layer, prev, cur, &params, &mut self.paint_seed) {
            self.mark_modified();
        }
    }

    pub fn invert_selection(&mut self) -> bool {
        let flipped = self.selection.invert();
        if flipped {
            self.invalidate();
        }
        flipped
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.invalidate();
    }

    // ------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------

    pub fn copy(&mut self) -> bool {
        match self.active_layer().and_then(clipboard::copy_layer) {
            Some(slot) => {
                self.clipboard = Some(slot);
                true
            }
            None => false,
        }
    }

    /// Copy, then wipe the active layer's whole raster.
    pub fn cut(&mut self) -> bool {
        if !self.copy() {
            return false;
        }
        let cleared = self
            .active_id
            .and_then(|id| find_layer_mut(&mut self.layers, id))
            .is_some_and(clipboard::clear_raster);
        if cleared {
            self.mark_modified();
        }
        true
    }

    pub fn paste(&mut self) -> Option<LayerId> {
        let layer = clipboard::pasted_layer(self.clipboard.as_ref()?, &self.config);
        Some(self.push_layer(layer))
    }

    // ------------------------------------------------------------------
    // Adjustments
    // ------------------------------------------------------------------

    /// Open an adjustment on the active image layer.
    pub fn begin_adjustment(&mut self, adjustment: Adjustment) -> bool {
        if self.active_layer().and_then(|l| l.raster()).is_none() {
            return false;
        }
        self.interaction.reset();
        self.adjustment = Some(adjustment);
        self.invalidate();
        true
    }

    /// Replace the pending adjustment's parameters (live preview).
    pub fn set_adjustment(&mut self, adjustment: Adjustment) {
        if self.adjustment.is_some() {
            self.adjustment = Some(adjustment);
            self.invalidate();
        }
    }

    /// Bake the pending adjustment into the active raster.
    pub fn commit_adjustment(&mut self) -> bool {
        let Some(adj) = self.adjustment.take() else {
            return false;
        };
        self.invalidate();
        if adj.is_identity() {
            return false;
        }
        let Some(id) = self.active_id else { return false };
        let Some(raster) = find_layer_mut(&mut self.layers, id).and_then(|l| l.raster_mut()) else {
            return false;
        };
        let adjusted = adjustments::apply_adjustment(raster.image(), &adj);
        *raster.make_editable() = adjusted;
        self.mark_modified();
        true
    }

    pub fn cancel_adjustment(&mut self) {
        if self.adjustment.take().is_some() {
            self.invalidate();
        }
    }

    // ------------------------------------------------------------------
    // Import / export
    // ------------------------------------------------------------------

    /// Decode an encoded image and add it as a new layer.
    pub fn import_image(&mut self, bytes: &[u8]) -> Result<LayerId, StoreError> {
        let img = io::decode_image(bytes)?;
        Ok(self.add_layer(Some(img)))
    }

    /// Overlay-free composite of the scene.
    pub fn composite(&self) -> RgbaImage {
        renderer::composite(&self.config, &self.layers, None)
    }

    pub fn export_png(&self) -> Result<Vec<u8>, StoreError> {
        io::encode_png(&self.composite())
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    pub fn fit_to_window(&mut self, view_w: f32, view_h: f32) {
        self.viewport.fit_to_window(&self.config, view_w, view_h);
        self.invalidate();
    }

    /// Wheel zoom around the cursor.
    pub fn zoom_at(&mut self, anchor: egui::Pos2, factor: f32) {
        self.viewport.zoom_at(anchor, factor);
        self.invalidate();
    }

    pub fn pan_view(&mut self, dx: f32, dy: f32) {
        self.viewport.pan(dx, dy);
        self.invalidate();
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    pub fn is_generating(&self) -> bool {
        self.generation.is_pending()
    }

    /// Rasters of the active and multi-selected visible image layers.
    pub fn reference_images(&self) -> Vec<RgbaImage> {
        let mut ids: Vec<LayerId> = self.active_id.into_iter().collect();
        for id in &self.multi_selected {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids.into_iter()
            .filter_map(|id| find_layer(&self.layers, id))
            .filter(|l| l.visible)
            .filter_map(|l| l.raster().map(|r| r.image().clone()))
            .collect()
    }

    /// Ask `backend` for one image from `prompt` plus the reference layers.
    /// Validation failures are reported immediately and change nothing.
    pub fn request_generation(&mut self, backend: Arc<dyn ImageGenerator>, prompt: &str) -> Result<(), GenerateError> {
        let refs = self.reference_images();
        match self.generation.submit(backend, prompt.to_string(), refs) {
            Ok(()) => {
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Apply a finished generation, if any.  Success adds the image as a new
    /// layer and clears the multi-selection; failure only records the error.
    pub fn poll_generation(&mut self) -> Option<LayerId> {
        match self.generation.poll()? {
            Ok(img) => {
                let id = self.add_layer(Some(img));
                self.multi_selected.clear();
                Some(id)
            }
            Err(e) => {
                log_err!("Generation failed: {}", e);
                self.last_error = Some(e.to_string());
                self.invalidate();
                None
            }
        }
    }

    /// Teardown: late results from in-flight work are ignored from now on.
    pub fn dispose(&mut self) {
        self.generation.invalidate();
        self.interaction.reset();
    }
}
