//! Configuration module.
//!
//! - `core`: the network and export configuration structures
//! - `enums`: output modes, width presets and record formats

pub mod core;
pub mod enums;

pub use self::core::{DynamicAxis, ExportConfig, ShuffleSegConfig, INPUT_STRIDE};

pub use enums::{ArchPreset, OutputMode, RecordFormat};
