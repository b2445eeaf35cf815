pub mod adjustments;
pub mod clipboard;
pub mod generate;
pub mod paint;
pub mod selection;
