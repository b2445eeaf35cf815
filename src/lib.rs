// Library root: the headless editor core plus the desktop/CLI front-ends.

#[macro_use]
pub mod logger;

pub mod app;
pub mod canvas;
pub mod cli;
pub mod editor;
pub mod geometry;
pub mod interaction;
pub mod io;
pub mod layers;
pub mod ops;
pub mod project;
pub mod renderer;
pub mod settings;

pub use canvas::{BlendMode, CanvasConfig, Viewport};
pub use editor::Editor;
pub use layers::{Layer, LayerId, LayerKind, LayerPatch, Raster};
