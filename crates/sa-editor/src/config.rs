//! Editor configuration.

use glam::Vec3;
use sa_core::DEFAULT_VOLUME_SIZE;
use serde::{Deserialize, Serialize};

/// Tunables for the editor. Every field has a default, so a config file
/// only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EditorConfig {
    /// Edge length of the placement volume (metres). Default: **20**.
    pub volume_size: f32,

    /// Uniform-scale snap step for the largest bbox dimension. Default: **1**.
    pub snap_step: f32,

    /// Placed assets taller than this are scaled down to it. Default: **1.75**
    /// (human height).
    pub max_import_height: f32,

    /// Offset applied to duplicates and pasted copies.
    pub duplicate_offset: Vec3,

    /// Maximum undo depth. Default: **100**.
    pub undo_depth: usize,

    /// Shrink over-tall assets on placement. Default: **true**.
    pub fit_imports: bool,

    /// Rest placed assets on the floor. Default: **true**.
    pub drop_imports: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            volume_size: DEFAULT_VOLUME_SIZE,
            snap_step: 1.0,
            max_import_height: 1.75,
            duplicate_offset: Vec3::new(0.5, 0.0, 0.5),
            undo_depth: 100,
            fit_imports: true,
            drop_imports: true,
        }
    }
}

impl EditorConfig {
    /// Read a JSON config. Missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
