use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::CanvasConfig;
use crate::editor::Editor;
use crate::io::{self, ProjectStore, SerializedLayer, StoreError};
use crate::logger;

/// A project in the store, as listed and reopened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedProject {
    pub id: String,
    pub name: String,
    /// Unix milliseconds.
    pub last_modified: u64,
    /// JPEG preview of the composite.
    pub thumbnail: Vec<u8>,
    pub config: CanvasConfig,
    pub layers: Vec<SerializedLayer>,
}

/// The autosave slot: whatever was on screen, saved or not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub config: CanvasConfig,
    pub layers: Vec<SerializedLayer>,
    pub project_id: Option<String>,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// Display name given to a project when it is saved.
pub fn project_name(config: &CanvasConfig, now_ms: u64) -> String {
    if config.is_custom() {
        format!("Untitled {}", logger::format_hms(now_ms / 1000))
    } else {
        format!("{} Project", config.name)
    }
}

// ============================================================================
// AUTOSAVE
// ============================================================================

/// Debounced session writer.  Watches [`Editor::tree_revision`]; once it has
/// been stable for `delay`, the tree is written to the session slot.
pub struct Autosave {
    delay: Duration,
    last_seen: u64,
    pending_since: Option<Instant>,
}

impl Autosave {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_seen: 0,
            pending_since: None,
        }
    }

    /// Start watching from the editor's current state (nothing pending).
    pub fn watch(&mut self, editor: &Editor) {
        self.last_seen = editor.tree_revision();
        self.pending_since = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Call once per frame.  Returns true when a snapshot was written.
    pub fn tick(&mut self, editor: &Editor, store: &ProjectStore) -> bool {
        self.tick_at(editor, store, Instant::now())
    }

    pub fn tick_at(&mut self, editor: &Editor, store: &ProjectStore, now: Instant) -> bool {
        let rev = editor.tree_revision();
        if rev != self.last_seen {
            self.last_seen = rev;
            self.pending_since = Some(now);
        }
        match self.pending_since {
            Some(since) if now.duration_since(since) >= self.delay => self.write(editor, store),
            _ => false,
        }
    }

    /// Write any pending change immediately (teardown).
    pub fn flush(&mut self, editor: &Editor, store: &ProjectStore) -> bool {
        if editor.tree_revision() != self.last_seen {
            self.last_seen = editor.tree_revision();
            self.pending_since = Some(Instant::now());
        }
        if self.pending_since.is_some() {
            self.write(editor, store)
        } else {
            false
        }
    }

    fn write(&mut self, editor: &Editor, store: &ProjectStore) -> bool {
        self.pending_since = None;
        if editor.layers.is_empty() {
            return false;
        }
        match editor.snapshot().and_then(|snap| store.write_session(&snap)) {
            Ok(()) => true,
            Err(e) => {
                log_warn!("Autosave failed: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// EDITOR PERSISTENCE FLOWS
// ============================================================================

impl Editor {
    /// Current tree, config and project id as a session record.
    pub fn snapshot(&self) -> Result<SessionSnapshot, StoreError> {
        Ok(SessionSnapshot {
            config: self.config.clone(),
            layers: io::serialize_layers(&self.layers)?,
            project_id: self.project_id.clone(),
            timestamp: logger::now_millis(),
        })
    }

    /// Write the scene as a saved project (allocating an id on first save)
    /// and drop the session backup.  Returns the project id.
    pub fn save_project(&mut self, store: &ProjectStore, thumbnail_edge: u32) -> Result<String, StoreError> {
        let result = self.build_saved_project(thumbnail_edge).and_then(|project| {
            store.save(&project)?;
            Ok(project)
        });
        let project = match result {
            Ok(p) => p,
            Err(e) => {
                log_err!("Save failed: {}", e);
                return Err(e);
            }
        };

        self.project_id = Some(project.id.clone());
        self.has_unsaved_changes = false;
        if let Err(e) = store.clear_session() {
            log_warn!("Could not clear session after save: {}", e);
        }
        log_info!("Saved project '{}' ({})", project.name, project.id);
        Ok(project.id)
    }

    fn build_saved_project(&self, thumbnail_edge: u32) -> Result<SavedProject, StoreError> {
        let now = logger::now_millis();
        Ok(SavedProject {
            id: self.project_id.clone().unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            name: project_name(&self.config, now),
            last_modified: now,
            thumbnail: io::encode_thumbnail(&self.composite(), thumbnail_edge)?,
            config: self.config.clone(),
            layers: io::serialize_layers(&self.layers)?,
        })
    }

    /// Replace the scene with a saved project.  The session slot belongs to
    /// whatever was open before, so it is discarded.
    pub fn open_project(&mut self, store: &ProjectStore, id: &str) -> Result<(), StoreError> {
        let project = store.load(id)?;
        let layers = match io::deserialize_layers(&project.layers) {
            Ok(layers) => layers,
            Err(e) => {
                log_err!("Failed to load project {}: {}", id, e);
                return Err(e);
            }
        };
        self.replace_scene(project.config, layers, Some(project.id));
        self.has_unsaved_changes = false;
        if let Err(e) = store.clear_session() {
            log_warn!("Could not clear session: {}", e);
        }
        log_info!("Opened project '{}' ({})", project.name, id);
        Ok(())
    }

    /// Recover the autosaved session, if there is one.
    pub fn restore_session(&mut self, store: &ProjectStore) -> Result<bool, StoreError> {
        let Some(session) = store.read_session()? else {
            return Ok(false);
        };
        let layers = io::deserialize_layers(&session.layers)?;
        self.replace_scene(session.config, layers, session.project_id);
        log_info!("Restored session from {}", session.timestamp);
        Ok(true)
    }

    /// Start over on a fresh canvas; the previous session backup is dropped.
    pub fn start_new(&mut self, store: &ProjectStore, config: CanvasConfig) {
        self.replace_scene(config, Vec::new(), None);
        self.has_unsaved_changes = false;
        if let Err(e) = store.clear_session() {
            log_warn!("Could not clear session: {}", e);
        }
    }

    /// Delete a saved project after `confirm` agrees.  Returns whether a
    /// record was removed.  The open scene stays; it just becomes unsaved.
    pub fn delete_project(
        &mut self,
        store: &ProjectStore,
        id: &str,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<bool, StoreError> {
        if !confirm(id) {
            return Ok(false);
        }
        let removed = store.delete(id)?;
        if removed {
            log_info!("Deleted project {}", id);
            if self.project_id.as_deref() == Some(id) {
                self.project_id = None;
                self.has_unsaved_changes = true;
            }
        }
        Ok(removed)
    }

    fn replace_scene(&mut self, config: CanvasConfig, layers: Vec<crate::layers::Layer>, project_id: Option<String>) {
        self.dispose();
        self.config = config;
        self.layers = layers;
        self.project_id = project_id;
        self.active_id = None;
        self.multi_selected.clear();
        self.selection.clear();
        self.adjustment = None;
        self.last_error = None;
        self.viewport = Default::default();
        self.mark_modified();
    }
}
