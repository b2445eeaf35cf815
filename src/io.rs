use std::fs;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageEncoder, RgbaImage};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{BlendMode, CanvasConfig, MAX_CANVAS_DIM};
use crate::layers::{Layer, LayerKind, MAX_TREE_DEPTH, Raster};
use crate::project::{SavedProject, SessionSnapshot};

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for the project store and the raster codec.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
    Encode(String),
    NotFound(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Serialize(e) => write!(f, "Serialization error: {}", e),
            StoreError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
            StoreError::Encode(e) => write!(f, "Image codec error: {}", e),
            StoreError::NotFound(id) => write!(f, "No saved project with id '{}'", id),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        StoreError::Serialize(e.to_string())
    }
}

impl From<image::ImageError> for StoreError {
    fn from(e: image::ImageError) -> Self {
        StoreError::Encode(e.to_string())
    }
}

// ============================================================================
// RASTER CODEC
// ============================================================================

/// JPEG quality used for project thumbnails.
pub const THUMBNAIL_QUALITY: u8 = 50;

/// Decode any format the `image` crate knows into RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, StoreError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || w > MAX_CANVAS_DIM || h > MAX_CANVAS_DIM {
        return Err(StoreError::InvalidFormat(format!(
            "Image size {}x{} is outside 1..={}",
            w, h, MAX_CANVAS_DIM
        )));
    }
    Ok(img)
}

/// Lossless PNG encoding of a raster payload.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)?;
    Ok(buf)
}

/// Lower-fidelity JPEG preview, longest side at most `max_edge`.
pub fn encode_thumbnail(image: &RgbaImage, max_edge: u32) -> Result<Vec<u8>, StoreError> {
    let (w, h) = image.dimensions();
    let longest = w.max(h).max(1);
    let max_edge = max_edge.max(1);
    let scaled = if longest > max_edge {
        let scale = max_edge as f32 / longest as f32;
        let tw = ((w as f32 * scale).round() as u32).max(1);
        let th = ((h as f32 * scale).round() as u32).max(1);
        imageops::resize(image, tw, th, FilterType::Triangle)
    } else {
        image.clone()
    };

    let rgb = DynamicImage::ImageRgba8(scaled).to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, THUMBNAIL_QUALITY);
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
    }
    Ok(buf.into_inner())
}

// ============================================================================
// LAYER TREE SERIALIZATION
// ============================================================================

const KIND_IMAGE: &str = "image";
const KIND_GROUP: &str = "group";

/// Storable form of a [`Layer`]: the live raster becomes `image_data` (PNG)
/// and children are serialized recursively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedLayer {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: u8,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    pub image_data: Option<Vec<u8>>,
    pub children: Option<Vec<SerializedLayer>>,
    pub collapsed: bool,
}

/// Encode a layer tree.  Rasters are PNG-encoded in parallel; order is kept.
pub fn serialize_layers(layers: &[Layer]) -> Result<Vec<SerializedLayer>, StoreError> {
    layers.par_iter().map(serialize_layer).collect()
}

fn serialize_layer(layer: &Layer) -> Result<SerializedLayer, StoreError> {
    let (kind, image_data, children, collapsed) = match &layer.kind {
        LayerKind::Image { raster } => {
            let data = match raster {
                Some(r) => Some(encode_png(r.image())?),
                None => None,
            };
            (KIND_IMAGE, data, None, false)
        }
        LayerKind::Group { children, collapsed } => (KIND_GROUP, None, Some(serialize_layers(children)?), *collapsed),
    };

    Ok(SerializedLayer {
        id: layer.id.to_string(),
        name: layer.name.clone(),
        kind: kind.to_string(),
        visible: layer.visible,
        locked: layer.locked,
        opacity: layer.opacity,
        blend_mode: layer.blend_mode.to_u8(),
        x: layer.x,
        y: layer.y,
        width: layer.width,
        height: layer.height,
        rotation: layer.rotation,
        image_data,
        children,
        collapsed,
    })
}

/// Nesting depth of a stored tree (a flat list is depth 1).
pub fn serialized_depth(layers: &[SerializedLayer]) -> usize {
    layers
        .iter()
        .map(|l| 1 + l.children.as_deref().map(serialized_depth).unwrap_or(0))
        .max()
        .unwrap_or(0)
}

/// Rebuild a layer tree.  A payload that fails to decode leaves that layer's
/// raster absent, and a node of unknown kind is dropped with its subtree; the
/// rest of the tree still loads.  Only an over-deep tree rejects the load.
pub fn deserialize_layers(layers: &[SerializedLayer]) -> Result<Vec<Layer>, StoreError> {
    let depth = serialized_depth(layers);
    if depth > MAX_TREE_DEPTH {
        return Err(StoreError::InvalidFormat(format!(
            "Layer tree depth {} exceeds the maximum of {}",
            depth, MAX_TREE_DEPTH
        )));
    }
    Ok(deserialize_level(layers))
}

fn deserialize_level(layers: &[SerializedLayer]) -> Vec<Layer> {
    layers.par_iter().filter_map(deserialize_layer).collect()
}

fn deserialize_layer(sl: &SerializedLayer) -> Option<Layer> {
    let kind = match sl.kind.as_str() {
        KIND_IMAGE => {
            let raster = sl.image_data.as_deref().and_then(|bytes| match decode_image(bytes) {
                Ok(img) => Some(Raster::Source(Arc::new(img))),
                Err(e) => {
                    log_warn!("Layer '{}' image failed to decode: {}", sl.name, e);
                    None
                }
            });
            LayerKind::Image { raster }
        }
        KIND_GROUP => LayerKind::Group {
            children: deserialize_level(sl.children.as_deref().unwrap_or(&[])),
            collapsed: sl.collapsed,
        },
        other => {
            log_warn!("Skipping layer '{}' of unknown kind '{}'", sl.name, other);
            return None;
        }
    };

    let id = match Uuid::parse_str(&sl.id) {
        Ok(id) => id,
        Err(_) => {
            log_warn!("Layer '{}' has malformed id '{}', assigning a new one", sl.name, sl.id);
            Uuid::new_v4()
        }
    };

    Some(Layer {
        id,
        name: sl.name.clone(),
        visible: sl.visible,
        locked: sl.locked,
        opacity: sl.opacity.clamp(0.0, 100.0),
        blend_mode: BlendMode::from_u8(sl.blend_mode),
        x: sl.x,
        y: sl.y,
        width: sl.width,
        height: sl.height,
        rotation: sl.rotation,
        kind,
    })
}

// ============================================================================
// PROJECT STORE
// ============================================================================

const PROJECT_MAGIC: &str = "INKP";
const SESSION_MAGIC: &str = "INKS";
const RECORD_EXT: &str = "ink";

#[derive(Serialize)]
struct RecordOut<'a, T> {
    magic: &'a str,
    record: &'a T,
}

#[derive(Deserialize)]
struct RecordIn<T> {
    #[allow(dead_code)]
    magic: String,
    record: T,
}

/// Durable keyed-record store: one file per saved project plus a single
/// session slot.
///
/// ```text
/// <dir>/projects/<id>.ink   saved projects (magic INKP)
/// <dir>/session.ink         autosave session (magic INKS)
/// ```
#[derive(Clone, Debug)]
pub struct ProjectStore {
    dir: PathBuf,
}

impl ProjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn projects_dir(&self) -> PathBuf {
        self.dir.join("projects")
    }

    fn project_path(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.projects_dir().join(format!("{}.{}", id, RECORD_EXT)))
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(format!("session.{}", RECORD_EXT))
    }

    /// All saved projects, newest first.  Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<SavedProject>, StoreError> {
        let dir = self.projects_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match read_record::<SavedProject>(&path, PROJECT_MAGIC) {
                Ok(project) => projects.push(project),
                Err(e) => log_warn!("Skipping unreadable project {}: {}", path.display(), e),
            }
        }
        projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(projects)
    }

    /// Insert or overwrite the record with `project.id`.
    pub fn save(&self, project: &SavedProject) -> Result<(), StoreError> {
        let path = self
            .project_path(&project.id)
            .ok_or_else(|| StoreError::InvalidFormat(format!("Bad project id '{}'", project.id)))?;
        write_record(&path, PROJECT_MAGIC, project)
    }

    pub fn load(&self, id: &str) -> Result<SavedProject, StoreError> {
        let path = self.project_path(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let project: SavedProject = read_record(&path, PROJECT_MAGIC)?;
        validate_config(&project.config)?;
        Ok(project)
    }

    /// Remove a record.  `Ok(false)` when there was nothing to remove.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        match self.project_path(id) {
            Some(path) if path.exists() => {
                fs::remove_file(path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn write_session(&self, session: &SessionSnapshot) -> Result<(), StoreError> {
        write_record(&self.session_path(), SESSION_MAGIC, session)
    }

    pub fn read_session(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let session: SessionSnapshot = read_record(&path, SESSION_MAGIC)?;
        validate_config(&session.config)?;
        Ok(Some(session))
    }

    pub fn clear_session(&self) -> Result<(), StoreError> {
        let path = self.session_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Project ids become file names; keep them to a safe alphabet.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_config(config: &CanvasConfig) -> Result<(), StoreError> {
    if config.is_valid() {
        Ok(())
    } else {
        Err(StoreError::InvalidFormat(format!(
            "Canvas size {}x{} is outside 1..={}",
            config.width, config.height, MAX_CANVAS_DIM
        )))
    }
}

/// Write via a temporary sibling and rename, so a crash mid-write never
/// leaves a truncated record behind.
fn write_record<T: Serialize>(path: &Path, magic: &str, record: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let file = fs::File::create(&tmp)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &RecordOut { magic, record })?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &Path, magic: &str) -> Result<T, StoreError> {
    let raw = fs::read(path)?;
    if raw.len() < 12 {
        return Err(StoreError::InvalidFormat("File too small".into()));
    }
    // bincode writes a String as an 8-byte length prefix plus UTF-8 data, so
    // the 4-byte magic sits at 8..12.
    let found = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if found != magic {
        return Err(StoreError::InvalidFormat(format!("Unknown magic '{}'", found)));
    }
    let parsed: RecordIn<T> = bincode::deserialize(&raw)?;
    Ok(parsed.record)
}
