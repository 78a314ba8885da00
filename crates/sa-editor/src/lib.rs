//! Editor engine for Scene Arranger: keeps the scene graph and its JSON
//! document in sync, runs gestures with a single clamp at the end, and
//! records transform edits for undo.

pub mod commands;
pub mod config;
pub mod sync;

pub use commands::CommandStack;
pub use config::EditorConfig;
pub use sync::{EditMutation, EditorEvent, GestureKind, Selection, SyncEngine};
