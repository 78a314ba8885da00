pub mod asset;
pub mod bounds;
pub mod document;
pub mod id;
pub mod math;
pub mod model;
pub mod pick;
pub mod reconcile;
pub mod reparent;
pub mod serialize;

pub use asset::{Asset, AssetCache, AssetError, AssetNode, AssetSource, MemoryAssetSource};
pub use bounds::{Volume, clamp};
pub use document::{DocumentError, SceneDocument, SceneEntry, emit_document, parse_document};
pub use id::{InternalId, NodeId};
pub use math::{Aabb, Transform};
pub use model::*;
pub use pick::{pick_point, pick_region, resolve_pick};
pub use reconcile::{ReconcileReport, reconcile, reconcile_text};
pub use reparent::{EditError, delete, detach, duplicate, group, reparent, ungroup};
pub use serialize::{serialize, serialize_to_string};

// Re-export petgraph types so downstream crates don't need a direct dependency
pub use petgraph::graph::NodeIndex;
