// ============================================================================
// DESKTOP HOST: one eframe window around a single Editor
// ============================================================================

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;

use crate::canvas::{BlendMode, CanvasConfig};
use crate::editor::Editor;
use crate::interaction::{PointerButton, Tool};
use crate::io::{self, ProjectStore};
use crate::layers::{Layer, LayerId, LayerKind, LayerPatch};
use crate::ops::adjustments::Adjustment;
use crate::ops::generate::ImageGenerator;
use crate::ops::paint::BrushKernel;
use crate::project::{Autosave, SavedProject};
use crate::renderer::{self, RenderOptions};
use crate::settings::AppSettings;

/// Pointer id used for the mouse; touches are offset past it.
const MOUSE_POINTER: u64 = 0;
const GENERATION_POLL: Duration = Duration::from_millis(100);

enum LayerAction {
    Select(LayerId),
    ToggleMulti(LayerId),
    Patch(LayerId, LayerPatch),
    Delete(LayerId),
    Up(LayerId),
    Down(LayerId),
    ToggleCollapsed(LayerId),
}

pub struct InkCanvasApp {
    editor: Editor,
    settings: AppSettings,
    store: ProjectStore,
    autosave: Autosave,
    generator: Option<Arc<dyn ImageGenerator>>,
    os_clipboard: Option<arboard::Clipboard>,

    texture: Option<egui::TextureHandle>,
    texture_revision: Option<u64>,
    started: Instant,
    needs_fit: bool,
    touch_active: bool,

    // Panels and dialogs
    prompt: String,
    show_projects: bool,
    projects: Vec<SavedProject>,
    thumbnails: HashMap<String, egui::TextureHandle>,
    pending_delete: Option<(String, String)>,
    save_error: Option<String>,
    custom_size: (u32, u32),
}

impl InkCanvasApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let settings = AppSettings::load();
        let store = ProjectStore::new(settings.store_path());
        let mut editor = Editor::with_settings(CanvasConfig::default(), &settings);

        match editor.restore_session(&store) {
            Ok(true) => log_info!("Recovered previous session"),
            Ok(false) => {}
            Err(e) => log_warn!("Session recovery failed: {}", e),
        }

        let mut autosave = Autosave::new(settings.autosave_delay());
        autosave.watch(&editor);

        let os_clipboard = match arboard::Clipboard::new() {
            Ok(c) => Some(c),
            Err(e) => {
                log_warn!("System clipboard unavailable: {}", e);
                None
            }
        };

        Self {
            editor,
            settings,
            store,
            autosave,
            generator: None,
            os_clipboard,
            texture: None,
            texture_revision: None,
            started: Instant::now(),
            needs_fit: true,
            touch_active: false,
            prompt: String::new(),
            show_projects: false,
            projects: Vec::new(),
            thumbnails: HashMap::new(),
            pending_delete: None,
            save_error: None,
            custom_size: (1500, 1500),
        }
    }

    /// Plug in an image-generation backend; without one the Generate
    /// button stays disabled.
    pub fn with_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    fn save(&mut self) {
        match self.editor.save_project(&self.store, self.settings.thumbnail_edge) {
            Ok(_) => {
                self.autosave.watch(&self.editor);
                self.refresh_projects();
            }
            Err(e) => self.save_error = Some(format!("The project was not saved.\n\n{}", e)),
        }
    }

    fn copy(&mut self, cut: bool) {
        let done = if cut { self.editor.cut() } else { self.editor.copy() };
        if !done {
            return;
        }
        if let (Some(slot), Some(clipboard)) = (self.editor.clipboard.as_ref(), self.os_clipboard.as_mut()) {
            let data = arboard::ImageData {
                width: slot.image.width() as usize,
                height: slot.image.height() as usize,
                bytes: Cow::Borrowed(slot.image.as_raw()),
            };
            if let Err(e) = clipboard.set_image(data) {
                log_warn!("Could not mirror copy to the system clipboard: {}", e);
            }
        }
    }

    fn open_project(&mut self, id: &str) {
        match self.editor.open_project(&self.store, id) {
            Ok(()) => {
                self.autosave.watch(&self.editor);
                self.needs_fit = true;
                self.show_projects = false;
            }
            Err(e) => self.editor.last_error = Some(format!("Could not open project: {}", e)),
        }
    }

    fn start_new(&mut self, config: CanvasConfig) {
        self.editor.start_new(&self.store, config);
        self.autosave.watch(&self.editor);
        self.needs_fit = true;
        self.show_projects = false;
    }

    fn request_delete(&mut self, id: String, name: String) {
        if self.settings.confirm_delete {
            self.pending_delete = Some((id, name));
        } else {
            self.delete_confirmed(&id);
        }
    }

    fn delete_confirmed(&mut self, id: &str) {
        match self.editor.delete_project(&self.store, id, |_| true) {
            Ok(_) => {
                self.thumbnails.remove(id);
                self.refresh_projects();
            }
            Err(e) => self.editor.last_error = Some(format!("Delete failed: {}", e)),
        }
    }

    fn refresh_projects(&mut self) {
        self.projects = match self.store.list() {
            Ok(p) => p,
            Err(e) => {
                log_warn!("Could not list projects: {}", e);
                Vec::new()
            }
        };
    }

    fn import_dropped(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        for file in dropped {
            let bytes = match (&file.bytes, &file.path) {
                (Some(b), _) => Ok(b.to_vec()),
                (None, Some(path)) => std::fs::read(path),
                (None, None) => continue,
            };
            let result = bytes
                .map_err(io::StoreError::from)
                .and_then(|b| self.editor.import_image(&b));
            if let Err(e) = result {
                log_warn!("Import of {:?} failed: {}", file.path, e);
                self.editor.last_error = Some(format!("Could not import image: {}", e));
            }
        }
    }

    fn apply_layer_actions(&mut self, actions: Vec<LayerAction>) {
        for action in actions {
            match action {
                LayerAction::Select(id) => self.editor.set_active_layer(Some(id)),
                LayerAction::ToggleMulti(id) => self.editor.toggle_layer_selection(id),
                LayerAction::Patch(id, patch) => {
                    self.editor.update_layer(id, &patch);
                }
                LayerAction::Delete(id) => {
                    self.editor.delete_layer(id);
                }
                LayerAction::Up(id) => {
                    self.editor.move_layer_up(id);
                }
                LayerAction::Down(id) => {
                    self.editor.move_layer_down(id);
                }
                LayerAction::ToggleCollapsed(id) => {
                    self.editor.toggle_group_collapsed(id);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (escape, delete, events) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Escape),
                i.key_pressed(egui::Key::Delete),
                i.events.clone(),
            )
        });
        if escape {
            self.editor.cancel_interaction();
        }
        if delete && let Some(id) = self.editor.active_id {
            self.editor.delete_layer(id);
        }
        for event in events {
            match event {
                egui::Event::Copy => self.copy(false),
                egui::Event::Cut => self.copy(true),
                egui::Event::Paste(_) => {
                    self.editor.paste();
                }
                _ => {}
            }
        }
    }

    /// Forward egui pointer / touch events inside `rect` to the editor in
    /// canvas-local screen coordinates.
    fn handle_canvas_input(&mut self, ctx: &egui::Context, rect: egui::Rect) {
        let (events, scroll, zoom, ctrl, hover) = ctx.input(|i| {
            (
                i.events.clone(),
                i.scroll_delta,
                i.zoom_delta(),
                i.modifiers.ctrl,
                i.pointer.hover_pos(),
            )
        });
        let local = |p: egui::Pos2| egui::pos2(p.x - rect.min.x, p.y - rect.min.y);

        for event in events {
            match event {
                egui::Event::Touch { id, phase, pos, .. } => {
                    let pointer = MOUSE_POINTER + 1 + id.0;
                    match phase {
                        egui::TouchPhase::Start if rect.contains(pos) => {
                            self.touch_active = true;
                            self.editor.pointer_down(pointer, local(pos), PointerButton::Primary);
                        }
                        egui::TouchPhase::Move => self.editor.pointer_move(pointer, local(pos)),
                        egui::TouchPhase::End | egui::TouchPhase::Cancel => {
                            self.editor.pointer_up(pointer);
                            if self.editor.interaction.pointer_count() == 0 {
                                self.touch_active = false;
                            }
                        }
                        _ => {}
                    }
                }
                // Touches also arrive as simulated mouse events; skip those.
                _ if self.touch_active => {}
                egui::Event::PointerButton { pos, button, pressed, .. } => {
                    let button = match button {
                        egui::PointerButton::Primary => PointerButton::Primary,
                        egui::PointerButton::Middle => PointerButton::Pan,
                        _ => continue,
                    };
                    if pressed {
                        if rect.contains(pos) {
                            self.editor.pointer_down(MOUSE_POINTER, local(pos), button);
                        }
                    } else {
                        self.editor.pointer_up(MOUSE_POINTER);
                    }
                }
                egui::Event::PointerMoved(pos) => self.editor.pointer_move(MOUSE_POINTER, local(pos)),
                egui::Event::PointerGone => self.editor.pointer_up(MOUSE_POINTER),
                _ => {}
            }
        }

        // Wheel: ctrl zooms around the cursor, otherwise pans.
        let Some(hover) = hover.filter(|p| rect.contains(*p)) else { return };
        if !self.editor.interaction.is_idle() || self.editor.adjustment.is_some() {
            return;
        }
        if (zoom - 1.0).abs() > f32::EPSILON {
            self.editor.zoom_at(local(hover), zoom);
        } else if ctrl && scroll.y != 0.0 {
            self.editor.zoom_at(local(hover), 1.0 + scroll.y * 0.001);
        } else if scroll != egui::Vec2::ZERO {
            self.editor.pan_view(scroll.x, scroll.y);
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    fn refresh_texture(&mut self, ctx: &egui::Context) {
        let animate = renderer::needs_animation(&self.editor);
        if self.texture.is_some() && self.texture_revision == Some(self.editor.revision()) && !animate {
            return;
        }
        let img = renderer::render(
            &self.editor,
            RenderOptions {
                overlays: true,
                time_ms: self.started.elapsed().as_millis() as u64,
            },
        );
        let color = egui::ColorImage::from_rgba_unmultiplied([img.width() as usize, img.height() as usize], img.as_raw());
        match &mut self.texture {
            Some(tex) => tex.set(color, egui::TextureOptions::LINEAR),
            None => self.texture = Some(ctx.load_texture("scene", color, egui::TextureOptions::LINEAR)),
        }
        self.texture_revision = Some(self.editor.revision());
        if animate {
            ctx.request_repaint();
        }
    }

    fn canvas(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let (rect, _response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        if self.needs_fit && rect.width() > 0.0 {
            self.editor.fit_to_window(rect.width(), rect.height());
            self.needs_fit = false;
        }

        self.handle_canvas_input(ctx, rect);
        self.refresh_texture(ctx);

        let Some(tex) = &self.texture else { return };
        let vp = self.editor.viewport;
        let min = rect.min + egui::vec2(vp.x, vp.y);
        let size = egui::vec2(
            self.editor.config.width as f32 * vp.zoom,
            self.editor.config.height as f32 * vp.zoom,
        );
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 0.0, egui::Color32::from_gray(24));
        painter.image(
            tex.id(),
            egui::Rect::from_min_size(min, size),
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Projects").clicked() {
                self.refresh_projects();
                self.show_projects = true;
            }
            let save_label = if self.editor.has_unsaved_changes { "Save*" } else { "Save" };
            if ui.button(save_label).clicked() {
                self.save();
            }
            ui.separator();

            for tool in Tool::all() {
                if ui.selectable_label(self.editor.tool == *tool, tool.name()).clicked() {
                    self.editor.set_tool(*tool);
                }
            }
            ui.separator();

            if ui.button("Add Layer").clicked() {
                self.editor.add_layer(None);
            }
            if ui.button("Group").clicked() {
                let mut ids: Vec<LayerId> = self.editor.active_id.into_iter().collect();
                ids.extend(self.editor.multi_selected.iter().copied().filter(|id| Some(*id) != self.editor.active_id));
                self.editor.group_layers(&ids, None);
            }
            if ui.button("Cut").clicked() {
                self.copy(true);
            }
            if ui.button("Copy").clicked() {
                self.copy(false);
            }
            if ui.add_enabled(self.editor.clipboard.is_some(), egui::Button::new("Paste")).clicked() {
                self.editor.paste();
            }
            ui.separator();

            if self.editor.selection.active {
                if ui.button("Invert Selection").clicked() {
                    self.editor.invert_selection();
                }
                if ui.button("Clear Selection").clicked() {
                    self.editor.clear_selection();
                }
                ui.separator();
            }

            let has_active = self.editor.active_layer().and_then(|l| l.raster()).is_some();
            ui.add_enabled_ui(has_active && self.editor.adjustment.is_none(), |ui| {
                if ui.button("HSB").clicked() {
                    self.editor.begin_adjustment(Adjustment::hsb());
                }
                if ui.button("Curves").clicked() {
                    self.editor.begin_adjustment(Adjustment::curves());
                }
            });
        });

        ui.horizontal(|ui| match self.editor.tool {
            Tool::Brush => {
                let brush = &mut self.editor.brush;
                egui::ComboBox::from_id_source("brush_kernel")
                    .selected_text(brush.kernel.name())
                    .show_ui(ui, |ui| {
                        for k in BrushKernel::all() {
                            ui.selectable_value(&mut brush.kernel, *k, k.name());
                        }
                    });
                ui.add(egui::Slider::new(&mut brush.size, 1.0..=200.0).text("Size"));
                ui.add(egui::Slider::new(&mut brush.opacity, 1.0..=100.0).text("Opacity"));
                ui.color_edit_button_srgb(&mut brush.color);
            }
            Tool::Eraser => {
                let eraser = &mut self.editor.eraser;
                ui.add(egui::Slider::new(&mut eraser.size, 1.0..=300.0).text("Size"));
                ui.add(egui::Slider::new(&mut eraser.opacity, 1.0..=100.0).text("Opacity"));
            }
            _ => {
                ui.add_enabled_ui(self.generator.is_some() && !self.editor.is_generating(), |ui| {
                    ui.add(egui::TextEdit::singleline(&mut self.prompt).hint_text("Describe a design"));
                    if ui.button("Generate").clicked()
                        && let Some(backend) = self.generator.clone()
                        && self.editor.request_generation(backend, &self.prompt).is_ok()
                    {
                        self.prompt.clear();
                    }
                });
                if self.editor.is_generating() {
                    ui.spinner();
                }
            }
        });
    }

    fn layer_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Layers");
        ui.separator();
        let mut actions = Vec::new();
        egui::ScrollArea::vertical().show(ui, |ui| {
            layer_rows(
                ui,
                &self.editor.layers,
                0,
                self.editor.active_id,
                &self.editor.multi_selected,
                &mut actions,
            );
        });
        self.apply_layer_actions(actions);
    }

    fn adjustment_window(&mut self, ctx: &egui::Context) {
        let Some(mut adj) = self.editor.adjustment.clone() else { return };
        let mut commit = false;
        let mut cancel = false;
        egui::Window::new("Adjust").collapsible(false).resizable(false).show(ctx, |ui| {
            match &mut adj {
                Adjustment::Hsb {
                    hue_deg,
                    saturation_pct,
                    brightness_pct,
                } => {
                    ui.add(egui::Slider::new(hue_deg, -180.0..=180.0).text("Hue"));
                    ui.add(egui::Slider::new(saturation_pct, 0.0..=200.0).text("Saturation"));
                    ui.add(egui::Slider::new(brightness_pct, -100.0..=100.0).text("Brightness"));
                }
                Adjustment::Curves { points } => {
                    let mut remove = None;
                    for (i, (x, y)) in points.iter_mut().enumerate() {
                        ui.horizontal(|ui| {
                            ui.add(egui::DragValue::new(x).clamp_range(0.0..=255.0).prefix("in "));
                            ui.add(egui::DragValue::new(y).clamp_range(0.0..=255.0).prefix("out "));
                            if ui.small_button("x").clicked() {
                                remove = Some(i);
                            }
                        });
                    }
                    if let Some(i) = remove
                        && points.len() > 2
                    {
                        points.remove(i);
                    }
                    if ui.button("Add point").clicked() {
                        points.push((128.0, 128.0));
                    }
                    points.sort_by(|a, b| a.0.total_cmp(&b.0));
                }
            }
            ui.horizontal(|ui| {
                commit = ui.button("Apply").clicked();
                cancel = ui.button("Cancel").clicked();
            });
        });

        if Some(&adj) != self.editor.adjustment.as_ref() {
            self.editor.set_adjustment(adj);
        }
        if commit {
            self.editor.commit_adjustment();
        } else if cancel {
            self.editor.cancel_adjustment();
        }
    }

    fn projects_window(&mut self, ctx: &egui::Context) {
        if !self.show_projects {
            return;
        }
        let mut open = true;
        let mut to_open = None;
        let mut to_delete = None;
        let mut new_config = None;

        egui::Window::new("Projects").open(&mut open).default_width(520.0).show(ctx, |ui| {
            ui.label("New canvas");
            ui.horizontal_wrapped(|ui| {
                for preset in CanvasConfig::presets() {
                    if ui.button(format!("{} ({}x{})", preset.name, preset.width, preset.height)).clicked() {
                        new_config = Some(preset);
                    }
                }
            });
            ui.horizontal(|ui| {
                ui.add(egui::DragValue::new(&mut self.custom_size.0).clamp_range(1..=crate::canvas::MAX_CANVAS_DIM));
                ui.label("x");
                ui.add(egui::DragValue::new(&mut self.custom_size.1).clamp_range(1..=crate::canvas::MAX_CANVAS_DIM));
                if ui.button("Custom").clicked() {
                    new_config = Some(CanvasConfig::custom(self.custom_size.0, self.custom_size.1));
                }
            });
            ui.separator();

            if self.projects.is_empty() {
                ui.label("No saved projects yet.");
            }
            egui::ScrollArea::vertical().max_height(420.0).show(ui, |ui| {
                for p in &self.projects {
                    ui.horizontal(|ui| {
                        let thumb = self.thumbnails.entry(p.id.clone()).or_insert_with(|| {
                            let img = io::decode_image(&p.thumbnail).unwrap_or_else(|_| image::RgbaImage::new(1, 1));
                            let color = egui::ColorImage::from_rgba_unmultiplied(
                                [img.width() as usize, img.height() as usize],
                                img.as_raw(),
                            );
                            ctx.load_texture(format!("thumb-{}", p.id), color, egui::TextureOptions::LINEAR)
                        });
                        let size = thumb.size_vec2();
                        let scale = 64.0 / size.x.max(size.y).max(1.0);
                        ui.image((thumb.id(), size * scale));
                        ui.vertical(|ui| {
                            ui.strong(p.name.as_str());
                            ui.label(format!("{}x{}, {} layers", p.config.width, p.config.height, p.layers.len()));
                            ui.horizontal(|ui| {
                                if ui.button("Open").clicked() {
                                    to_open = Some(p.id.clone());
                                }
                                if ui.button("Delete").clicked() {
                                    to_delete = Some((p.id.clone(), p.name.clone()));
                                }
                            });
                        });
                    });
                    ui.separator();
                }
            });
        });

        self.show_projects = open;
        if let Some(config) = new_config {
            self.start_new(config);
        }
        if let Some(id) = to_open {
            self.open_project(&id);
        }
        if let Some((id, name)) = to_delete {
            self.request_delete(id, name);
        }
    }

    fn modal_windows(&mut self, ctx: &egui::Context) {
        if let Some((id, name)) = self.pending_delete.clone() {
            let mut answer = None;
            egui::Window::new("Delete project?").collapsible(false).resizable(false).show(ctx, |ui| {
                ui.label(format!("Are you sure you want to delete \"{}\"?", name));
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        answer = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        answer = Some(false);
                    }
                });
            });
            if let Some(yes) = answer {
                self.pending_delete = None;
                if yes {
                    self.delete_confirmed(&id);
                }
            }
        }

        if let Some(msg) = self.save_error.clone() {
            egui::Window::new("Save failed").collapsible(false).resizable(false).show(ctx, |ui| {
                ui.label(msg);
                if ui.button("OK").clicked() {
                    self.save_error = None;
                }
            });
        }
    }
}

fn layer_rows(
    ui: &mut egui::Ui,
    layers: &[Layer],
    depth: usize,
    active: Option<LayerId>,
    multi: &[LayerId],
    actions: &mut Vec<LayerAction>,
) {
    // Topmost layer first.
    for layer in layers.iter().rev() {
        let id = layer.id;
        ui.horizontal(|ui| {
            ui.add_space(depth as f32 * 14.0);

            let mut visible = layer.visible;
            if ui.checkbox(&mut visible, "").changed() {
                actions.push(LayerAction::Patch(
                    id,
                    LayerPatch {
                        visible: Some(visible),
                        ..Default::default()
                    },
                ));
            }
            let mut locked = layer.locked;
            if ui.toggle_value(&mut locked, "lock").changed() {
                actions.push(LayerAction::Patch(
                    id,
                    LayerPatch {
                        locked: Some(locked),
                        ..Default::default()
                    },
                ));
            }

            if let LayerKind::Group { collapsed, .. } = &layer.kind
                && ui.small_button(if *collapsed { ">" } else { "v" }).clicked()
            {
                actions.push(LayerAction::ToggleCollapsed(id));
            }

            let selected = active == Some(id) || multi.contains(&id);
            let response = ui.selectable_label(selected, layer.name.as_str());
            if response.clicked() {
                if ui.input(|i| i.modifiers.shift || i.modifiers.command) {
                    actions.push(LayerAction::ToggleMulti(id));
                } else {
                    actions.push(LayerAction::Select(id));
                }
            }

            if ui.small_button("^").clicked() {
                actions.push(LayerAction::Up(id));
            }
            if ui.small_button("v").on_hover_text("Move down").clicked() {
                actions.push(LayerAction::Down(id));
            }
            if ui.small_button("del").clicked() {
                actions.push(LayerAction::Delete(id));
            }
        });

        if active == Some(id) {
            ui.horizontal(|ui| {
                ui.add_space(depth as f32 * 14.0 + 24.0);
                let mut opacity = layer.opacity;
                if ui.add(egui::Slider::new(&mut opacity, 0.0..=100.0).suffix("%")).changed() {
                    actions.push(LayerAction::Patch(id, LayerPatch::opacity(opacity)));
                }
                let mut mode = layer.blend_mode;
                egui::ComboBox::from_id_source(id)
                    .selected_text(mode.name())
                    .show_ui(ui, |ui| {
                        for m in BlendMode::all() {
                            ui.selectable_value(&mut mode, *m, m.name());
                        }
                    });
                if mode != layer.blend_mode {
                    actions.push(LayerAction::Patch(id, LayerPatch::blend_mode(mode)));
                }
            });
        }

        if let LayerKind::Group { children, collapsed: false } = &layer.kind {
            layer_rows(ui, children, depth + 1, active, multi, actions);
        }
    }
}

impl eframe::App for InkCanvasApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let dirty = if self.editor.has_unsaved_changes { "*" } else { "" };
        ctx.send_viewport_cmd(egui::ViewportCommand::Title(format!(
            "InkCanvas - {}{}",
            self.editor.config.name, dirty
        )));

        if ctx.input(|i| i.viewport().close_requested()) {
            self.autosave.flush(&self.editor, &self.store);
            self.settings.remember_tools(&self.editor.brush, &self.editor.eraser);
            self.settings.save();
            self.editor.dispose();
        }

        if self.editor.poll_generation().is_some() {
            self.prompt.clear();
        }
        if self.editor.is_generating() {
            ctx.request_repaint_after(GENERATION_POLL);
        }

        self.import_dropped(ctx);
        self.handle_shortcuts(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!(
                    "{} {}x{}  |  {:.0}%",
                    self.editor.config.name,
                    self.editor.config.width,
                    self.editor.config.height,
                    self.editor.viewport.zoom * 100.0
                ));
                if ui.small_button("Fit").clicked() {
                    self.needs_fit = true;
                }
                if let Some(err) = self.editor.last_error.clone() {
                    ui.separator();
                    ui.colored_label(egui::Color32::from_rgb(0xf8, 0x71, 0x71), err);
                    if ui.small_button("x").clicked() {
                        self.editor.last_error = None;
                    }
                }
            });
        });

        egui::SidePanel::right("layers").default_width(280.0).show(ctx, |ui| self.layer_panel(ui));

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.canvas(ctx, ui));

        self.adjustment_window(ctx);
        self.projects_window(ctx);
        self.modal_windows(ctx);

        if self.autosave.tick(&self.editor, &self.store) {
            log_info!("Session autosaved");
        }
        if self.autosave.is_pending() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }
    }
}
