//! Asset resolution: async loading, in-flight coalescing, memoization, and
//! spawning a loaded hierarchy into the scene.

use crate::id::NodeId;
use crate::math::{Aabb, Transform};
use crate::model::{NodeKind, SceneGraph, SceneNode};
use futures::future::join_all;
use glam::Vec3;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("asset {0} not found")]
    NotFound(String),

    #[error("failed to read asset {reference}: {message}")]
    Io { reference: String, message: String },

    #[error("asset {reference} is malformed: {message}")]
    Malformed { reference: String, message: String },
}

/// One node of a loaded asset's hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetNode {
    pub name: String,
    #[serde(default)]
    pub transform: Transform,
    /// Mesh box in this node's own frame.
    #[serde(default)]
    pub geometry: Option<Aabb>,
    #[serde(default)]
    pub children: Vec<AssetNode>,
}

/// A loaded asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub root: AssetNode,
}

/// Where assets come from. Implementations are free to fail; callers
/// substitute placeholders.
pub trait AssetSource: Send + Sync {
    fn load(&self, reference: &str) -> impl Future<Output = Result<Asset, AssetError>> + Send;
}

type Slot = Arc<OnceCell<Result<Arc<Asset>, AssetError>>>;

/// Memoizing front for an [`AssetSource`]. Concurrent requests for the same
/// reference share one in-flight load; results, failures included, are kept
/// until evicted.
pub struct AssetCache<S> {
    source: S,
    slots: Mutex<HashMap<String, Slot>>,
    loads: AtomicUsize,
}

impl<S: AssetSource> AssetCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn slot(&self, reference: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(reference.to_string()).or_default().clone()
    }

    /// Resolve one reference.
    pub async fn resolve(&self, reference: &str) -> Result<Arc<Asset>, AssetError> {
        let slot = self.slot(reference);
        slot.get_or_init(|| async move {
            self.loads.fetch_add(1, Ordering::Relaxed);
            log::debug!("loading asset {reference}");
            let result = self.source.load(reference).await.map(Arc::new);
            if let Err(e) = &result {
                log::warn!("asset load failed: {e}");
            }
            result
        })
        .await
        .clone()
    }

    /// Resolve a batch of references concurrently. Duplicates are loaded once.
    pub async fn resolve_all<'a, I>(&self, references: I) -> HashMap<String, Result<Arc<Asset>, AssetError>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut unique: Vec<&str> = Vec::new();
        for r in references {
            if !unique.contains(&r) {
                unique.push(r);
            }
        }
        let results = join_all(unique.iter().map(|&r| self.resolve(r))).await;
        unique
            .into_iter()
            .map(String::from)
            .zip(results)
            .collect()
    }

    /// Forget a memoized result so the next request loads again.
    pub fn evict(&self, reference: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(reference).is_some()
    }

    /// Number of loads actually issued to the source.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

// ─── In-memory source ────────────────────────────────────────────────────

/// Assets held in memory, keyed by reference.
#[derive(Debug, Default, Clone)]
pub struct MemoryAssetSource {
    assets: HashMap<String, Asset>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, asset: Asset) {
        self.assets.insert(reference.into(), asset);
    }

    /// Register a single-box asset whose base sits on its local origin.
    pub fn with_box(mut self, reference: &str, name: &str, size: Vec3) -> Self {
        self.insert(
            reference,
            Asset {
                root: AssetNode {
                    name: name.to_string(),
                    transform: Transform::IDENTITY,
                    geometry: Some(Aabb::from_center_size(Vec3::Y * size.y / 2.0, size)),
                    children: Vec::new(),
                },
            },
        );
        self
    }
}

impl AssetSource for MemoryAssetSource {
    async fn load(&self, reference: &str) -> Result<Asset, AssetError> {
        // Loads always complete on a later poll, as real I/O would.
        tokio::task::yield_now().await;
        self.assets
            .get(reference)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(reference.to_string()))
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────

/// Insert a loaded asset under `parent`. The top node is selectable and
/// carries `name`, `reference`, and the asset root's geometry and transform;
/// everything below it is asset-internal and not selectable.
pub fn spawn_asset(
    graph: &mut SceneGraph,
    parent: NodeIndex,
    index: Option<usize>,
    name: &str,
    reference: &str,
    asset: &Asset,
) -> NodeIndex {
    let top = SceneNode::mesh(name, asset.root.geometry)
        .with_transform(asset.root.transform)
        .with_resource(reference);
    let idx = graph.insert_node(parent, index, top);
    for child in &asset.root.children {
        spawn_internal(graph, idx, child);
    }
    idx
}

fn spawn_internal(graph: &mut SceneGraph, parent: NodeIndex, node: &AssetNode) {
    let mut scene_node = SceneNode::mesh(node.name.clone(), node.geometry).with_transform(node.transform);
    scene_node.selectable = false;
    let idx = graph.add_node(parent, scene_node);
    for child in &node.children {
        spawn_internal(graph, idx, child);
    }
}

/// Stand-in for an asset that failed to load: a box of the declared size
/// resting on the node's origin.
pub fn spawn_placeholder(
    graph: &mut SceneGraph,
    parent: NodeIndex,
    index: Option<usize>,
    name: &str,
    reference: &str,
    bound: Vec3,
) -> NodeIndex {
    let node = SceneNode::new(
        NodeId::with_prefix("mesh"),
        name,
        NodeKind::Mesh {
            geometry: Some(Aabb::from_center_size(Vec3::Y * bound.y / 2.0, bound)),
            placeholder: true,
        },
    )
    .with_resource(reference);
    graph.insert_node(parent, index, node)
}
