use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::{hex_to_rgb, rgb_to_hex};
use crate::ops::paint::{BrushKernel, StrokeParams};

/// Application settings that persist across sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Project store directory.  Empty = `<data dir>/InkCanvas/store`.
    pub store_dir: String,
    /// Debounce between the last layer change and the session autosave.
    pub autosave_delay_ms: u64,
    pub brush_size: f32,
    pub brush_opacity: f32,
    /// `#rrggbb`
    pub brush_color: String,
    pub brush_kernel: BrushKernel,
    pub eraser_size: f32,
    pub eraser_opacity: f32,
    /// Longest side of saved-project thumbnails.
    pub thumbnail_edge: u32,
    /// Ask before deleting a saved project.
    pub confirm_delete: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            store_dir: String::new(),
            autosave_delay_ms: 2000,
            brush_size: 20.0,
            brush_opacity: 100.0,
            brush_color: "#000000".to_string(),
            brush_kernel: BrushKernel::Soft,
            eraser_size: 50.0,
            eraser_opacity: 100.0,
            thumbnail_edge: 256,
            confirm_delete: true,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/inkcanvas/inkcanvas_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\InkCanvas\inkcanvas_settings.cfg
    /// On macOS:   ~/Library/Application Support/InkCanvas/inkcanvas_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("InkCanvas").join("inkcanvas_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("InkCanvas")
                    .join("inkcanvas_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
                .ok()?;
            Some(config_dir.join("inkcanvas").join("inkcanvas_settings.cfg"))
        }
    }

    /// Load settings from the default location (defaults if missing or corrupt).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse `key=value` lines.  Unknown keys are ignored; malformed values
    /// keep their default.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        let d = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "store_dir" => s.store_dir = val.to_string(),
                "autosave_delay_ms" => s.autosave_delay_ms = val.parse().unwrap_or(d.autosave_delay_ms),
                "brush_size" => s.brush_size = parse_positive(val).unwrap_or(d.brush_size),
                "brush_opacity" => s.brush_opacity = parse_percent(val).unwrap_or(d.brush_opacity),
                "brush_color" => {
                    if is_hex_color(val) {
                        s.brush_color = val.to_lowercase();
                    }
                }
                "brush_kernel" => s.brush_kernel = BrushKernel::from_name(val).unwrap_or(d.brush_kernel),
                "eraser_size" => s.eraser_size = parse_positive(val).unwrap_or(d.eraser_size),
                "eraser_opacity" => s.eraser_opacity = parse_percent(val).unwrap_or(d.eraser_opacity),
                "thumbnail_edge" => {
                    s.thumbnail_edge = val.parse().ok().filter(|&e: &u32| e > 0).unwrap_or(d.thumbnail_edge)
                }
                "confirm_delete" => s.confirm_delete = val == "true",
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "store_dir={}\n\
             autosave_delay_ms={}\n\
             brush_size={}\n\
             brush_opacity={}\n\
             brush_color={}\n\
             brush_kernel={}\n\
             eraser_size={}\n\
             eraser_opacity={}\n\
             thumbnail_edge={}\n\
             confirm_delete={}\n",
            self.store_dir,
            self.autosave_delay_ms,
            self.brush_size,
            self.brush_opacity,
            self.brush_color,
            self.brush_kernel.name(),
            self.eraser_size,
            self.eraser_opacity,
            self.thumbnail_edge,
            self.confirm_delete,
        )
    }

    /// Save to the default location.  Failures are logged, never fatal.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            log_warn!("Failed to write settings to {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    pub fn store_path(&self) -> PathBuf {
        if self.store_dir.is_empty() {
            crate::logger::app_data_dir().join("store")
        } else {
            PathBuf::from(&self.store_dir)
        }
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn brush_params(&self) -> StrokeParams {
        StrokeParams {
            kernel: self.brush_kernel,
            size: self.brush_size,
            opacity: self.brush_opacity,
            color: hex_to_rgb(&self.brush_color),
            erase: false,
        }
    }

    pub fn eraser_params(&self) -> StrokeParams {
        StrokeParams {
            size: self.eraser_size,
            opacity: self.eraser_opacity,
            erase: true,
            ..StrokeParams::default()
        }
    }

    /// Remember the current brush and eraser for the next launch.
    pub fn remember_tools(&mut self, brush: &StrokeParams, eraser: &StrokeParams) {
        self.brush_size = brush.size;
        self.brush_opacity = brush.opacity;
        self.brush_color = rgb_to_hex(brush.color);
        self.brush_kernel = brush.kernel;
        self.eraser_size = eraser.size;
        self.eraser_opacity = eraser.opacity;
    }
}

fn parse_positive(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_percent(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| (0.0..=100.0).contains(v))
}

fn is_hex_color(val: &str) -> bool {
    val.len() == 7 && val.starts_with('#') && val[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(AppSettings::parse(""), AppSettings::default());
    }

    #[test]
    fn known_keys_are_read() {
        let s = AppSettings::parse(
            "store_dir=/tmp/ink\n\
             autosave_delay_ms = 500\n\
             brush_size=8\n\
             brush_color=#FF8800\n\
             brush_kernel=clouds\n\
             eraser_opacity=40\n\
             confirm_delete=false\n\
             unknown_key=whatever\n",
        );
        assert_eq!(s.store_dir, "/tmp/ink");
        assert_eq!(s.autosave_delay_ms, 500);
        assert_eq!(s.brush_size, 8.0);
        assert_eq!(s.brush_color, "#ff8800");
        assert_eq!(s.brush_kernel, BrushKernel::Clouds);
        assert_eq!(s.eraser_opacity, 40.0);
        assert!(!s.confirm_delete);
        assert_eq!(s.store_path(), PathBuf::from("/tmp/ink"));
    }

    #[test]
    fn corrupt_values_fall_back() {
        let s = AppSettings::parse("brush_size=-3\nbrush_opacity=250\nbrush_color=red\nbrush_kernel=spray\nthumbnail_edge=0\n");
        let d = AppSettings::default();
        assert_eq!(s.brush_size, d.brush_size);
        assert_eq!(s.brush_opacity, d.brush_opacity);
        assert_eq!(s.brush_color, d.brush_color);
        assert_eq!(s.brush_kernel, d.brush_kernel);
        assert_eq!(s.thumbnail_edge, d.thumbnail_edge);
    }

    #[test]
    fn config_string_parses_back() {
        let mut s = AppSettings::default();
        s.brush_kernel = BrushKernel::Pencil;
        s.eraser_size = 12.5;
        s.store_dir = "/data/ink".into();
        assert_eq!(AppSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn stroke_params_follow_settings() {
        let s = AppSettings::parse("brush_color=#102030\nbrush_size=5\neraser_size=70\n");
        let brush = s.brush_params();
        assert_eq!(brush.color, [0x10, 0x20, 0x30]);
        assert_eq!(brush.size, 5.0);
        assert!(!brush.erase);
        let eraser = s.eraser_params();
        assert_eq!(eraser.size, 70.0);
        assert!(eraser.erase);
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inkcanvas_settings.cfg");
        let mut s = AppSettings::default();
        s.autosave_delay_ms = 750;
        s.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), s);
        assert_eq!(AppSettings::load_from(&dir.path().join("missing.cfg")), AppSettings::default());
    }
}
