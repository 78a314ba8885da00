//! Core scene-graph data model.
//!
//! The scene is a tree stored in a `StableDiGraph` arena: nodes are addressed
//! by a stable `NodeIndex` (and a session handle `NodeId`), edges go from
//! parent → child, and each parent's children are kept in an explicit ordered
//! list. Transforms are stored per node in local space; world transforms are
//! computed on demand from the current ancestor chain.

use crate::id::{InternalId, NodeId};
use crate::math::{Aabb, Transform};
use glam::{Mat4, Vec3};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::Dfs;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Default placement-volume size (metres).
pub const DEFAULT_VOLUME_SIZE: f32 = 20.0;

/// Name given to the canvas root.
pub const CANVAS_NAME: &str = "Canvas";

/// Ordered child list. Most nodes have a handful of children.
pub type ChildList = SmallVec<[NodeIndex; 4]>;

// ─── Scene Graph Nodes ───────────────────────────────────────────────────

/// The role of a node. Each variant carries only what that role needs.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Root of the scene. Owns the placement-volume size.
    CanvasRoot { size: f32 },

    /// A piece of loaded geometry. `geometry` is the box of the mesh data in
    /// the node's own frame; `placeholder` marks a stand-in for a failed load.
    Mesh {
        geometry: Option<Aabb>,
        placeholder: bool,
    },

    /// An editor group. Child 0 is the basis.
    Group,
}

/// A single node in the scene graph.
#[derive(Debug, Clone)]
pub struct SceneNode {
    /// Session handle.
    pub id: NodeId,

    /// Persistent identity used by reconciliation.
    pub internal_id: InternalId,

    /// Display name, also part of the identity key.
    pub name: String,

    pub kind: NodeKind,

    /// Transform relative to the parent.
    pub transform: Transform,

    /// Source asset reference (e.g. `chair.glb`).
    pub resource: Option<String>,

    /// Overrides the computed bounding-box size, in the node's own frame.
    pub explicit_bound: Option<Vec3>,

    /// Whether picks stop at this node. Asset-internal nodes are not selectable.
    pub selectable: bool,

    /// Set on nodes created or updated by the last reconciliation.
    pub import_tag: bool,

    /// Transform the node had when it was placed, used by reset.
    pub initial_transform: Transform,
}

impl SceneNode {
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            internal_id: InternalId::fresh(),
            name: name.into(),
            kind,
            transform: Transform::IDENTITY,
            resource: None,
            explicit_bound: None,
            selectable: true,
            import_tag: false,
            initial_transform: Transform::IDENTITY,
        }
    }

    /// A selectable mesh with the given geometry box.
    pub fn mesh(name: impl Into<String>, geometry: Option<Aabb>) -> Self {
        Self::new(
            NodeId::with_prefix("mesh"),
            name,
            NodeKind::Mesh {
                geometry,
                placeholder: false,
            },
        )
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(NodeId::with_prefix("group"), name, NodeKind::Group)
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self.initial_transform = transform;
        self
    }

    pub fn with_resource(mut self, reference: impl Into<String>) -> Self {
        self.resource = Some(reference.into());
        self
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group)
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::CanvasRoot { .. })
    }
}

// ─── Scene Graph ─────────────────────────────────────────────────────────

/// The complete scene: an arena of `SceneNode` values forming one tree
/// under a single `CanvasRoot`.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    /// Node arena; edges go parent → child.
    pub graph: StableDiGraph<SceneNode, ()>,

    /// The canvas root.
    pub root: NodeIndex,

    /// Index from NodeId → NodeIndex for fast lookup.
    pub id_index: HashMap<NodeId, NodeIndex>,

    /// Authoritative child order per parent.
    child_order: HashMap<NodeIndex, ChildList>,
}

impl SceneGraph {
    /// Create an empty scene with a canvas root of the given volume size.
    #[must_use]
    pub fn new(volume_size: f32) -> Self {
        let mut graph = StableDiGraph::new();
        let root_node = SceneNode::new(
            NodeId::intern("canvas"),
            CANVAS_NAME,
            NodeKind::CanvasRoot { size: volume_size },
        );
        let root_id = root_node.id;
        let root = graph.add_node(root_node);

        let mut id_index = HashMap::new();
        id_index.insert(root_id, root);

        Self {
            graph,
            root,
            id_index,
            child_order: HashMap::new(),
        }
    }

    /// Placement-volume size owned by the canvas root.
    pub fn volume_size(&self) -> f32 {
        match self.graph[self.root].kind {
            NodeKind::CanvasRoot { size } => size,
            _ => DEFAULT_VOLUME_SIZE,
        }
    }

    pub fn set_volume_size(&mut self, new_size: f32) {
        if let NodeKind::CanvasRoot { size } = &mut self.graph[self.root].kind {
            *size = new_size;
        }
    }

    /// Add a node as the last child of `parent`. Returns the new node's index.
    pub fn add_node(&mut self, parent: NodeIndex, node: SceneNode) -> NodeIndex {
        self.insert_node(parent, None, node)
    }

    /// Add a node under `parent` at `index` (appended when `None` or past the end).
    pub fn insert_node(
        &mut self,
        parent: NodeIndex,
        index: Option<usize>,
        node: SceneNode,
    ) -> NodeIndex {
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.id_index.insert(id, idx);
        self.link(idx, parent, index);
        idx
    }

    /// Remove a node and its whole subtree. Returns the removed nodes,
    /// top first.
    pub fn remove_subtree(&mut self, idx: NodeIndex) -> Vec<SceneNode> {
        if idx == self.root || !self.graph.contains_node(idx) {
            return Vec::new();
        }
        let doomed = self.subtree(idx);
        self.unlink(idx);

        let mut removed = Vec::with_capacity(doomed.len());
        for i in doomed {
            self.child_order.remove(&i);
            if let Some(node) = self.graph.remove_node(i) {
                self.id_index.remove(&node.id);
                removed.push(node);
            }
        }
        removed
    }

    /// Look up a node by its handle.
    pub fn get_by_id(&self, id: NodeId) -> Option<&SceneNode> {
        self.id_index.get(&id).map(|idx| &self.graph[*idx])
    }

    /// Look up a node mutably by its handle.
    pub fn get_by_id_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.id_index
            .get(&id)
            .copied()
            .map(|idx| &mut self.graph[idx])
    }

    /// Get the index for a NodeId.
    pub fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.id_index.get(&id).copied()
    }

    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.graph.contains_node(idx)
    }

    /// Get the parent index of a node.
    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Incoming).next()
    }

    /// Children of a node in order.
    pub fn children(&self, idx: NodeIndex) -> &[NodeIndex] {
        self.child_order
            .get(&idx)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Position of a node within its parent's child list.
    pub fn child_position(&self, idx: NodeIndex) -> Option<usize> {
        let parent = self.parent(idx)?;
        self.children(parent).iter().position(|&c| c == idx)
    }

    /// The basis of a group (its first child).
    pub fn basis_of(&self, group: NodeIndex) -> Option<NodeIndex> {
        if !self.graph[group].is_group() {
            return None;
        }
        self.children(group).first().copied()
    }

    /// Whether `idx` is the basis of its parent group.
    pub fn is_basis(&self, idx: NodeIndex) -> bool {
        self.parent(idx)
            .and_then(|p| self.basis_of(p))
            .is_some_and(|b| b == idx)
    }

    /// Attach `child` under `parent` at `index`. The child must be unlinked.
    pub(crate) fn link(&mut self, child: NodeIndex, parent: NodeIndex, index: Option<usize>) {
        self.graph.add_edge(parent, child, ());
        let order = self.child_order.entry(parent).or_default();
        match index {
            Some(i) if i <= order.len() => order.insert(i, child),
            _ => order.push(child),
        }
    }

    /// Detach `child` from its parent's edge set and child list.
    pub(crate) fn unlink(&mut self, child: NodeIndex) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(edge) = self.graph.find_edge(parent, child) {
            self.graph.remove_edge(edge);
        }
        if let Some(order) = self.child_order.get_mut(&parent) {
            order.retain(|c| *c != child);
            if order.is_empty() {
                self.child_order.remove(&parent);
            }
        }
    }

    /// The node and all its descendants, parents before children.
    pub fn subtree(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut dfs = Dfs::new(&self.graph, idx);
        while let Some(n) = dfs.next(&self.graph) {
            out.push(n);
        }
        out
    }

    /// Ordered depth-first walk (respecting child order), parents first.
    pub fn walk_ordered(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![idx];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    /// Check if `ancestor` is a parent/grandparent/etc. of `descendant`.
    pub fn is_ancestor_of(&self, ancestor: NodeIndex, descendant: NodeIndex) -> bool {
        if ancestor == descendant {
            return false;
        }
        let mut current = descendant;
        while let Some(parent) = self.parent(current) {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// World matrix of a node, composed from the current ancestor chain.
    pub fn world_matrix(&self, idx: NodeIndex) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(idx);
        while let Some(n) = current {
            let node = &self.graph[n];
            if node.is_root() {
                break;
            }
            matrix = node.transform.to_matrix() * matrix;
            current = self.parent(n);
        }
        matrix
    }

    pub fn world_transform(&self, idx: NodeIndex) -> Transform {
        Transform::from_matrix(self.world_matrix(idx))
    }

    /// Reference used for export and identity: own, the basis's for groups,
    /// or `<name>.glb` as a last resort.
    pub fn resolved_reference(&self, idx: NodeIndex) -> Option<String> {
        let node = &self.graph[idx];
        match node.kind {
            NodeKind::CanvasRoot { .. } => None,
            NodeKind::Group => {
                let from_basis = self
                    .basis_of(idx)
                    .and_then(|b| self.resolved_reference(b));
                Some(from_basis.unwrap_or_else(|| format!("{}.glb", node.name)))
            }
            NodeKind::Mesh { .. } => Some(
                node.resource
                    .clone()
                    .unwrap_or_else(|| format!("{}.glb", node.name)),
            ),
        }
    }

    /// All names currently used by nodes in the graph.
    pub fn names(&self) -> HashSet<&str> {
        self.graph
            .node_indices()
            .map(|i| self.graph[i].name.as_str())
            .collect()
    }

    /// Walk up from `idx` to the nearest selectable node.
    pub fn selectable_ancestor(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let mut current = Some(idx);
        while let Some(n) = current {
            let node = &self.graph[n];
            if node.is_root() {
                return None;
            }
            if node.selectable {
                return Some(n);
            }
            current = self.parent(n);
        }
        None
    }

    /// Number of nodes including the root.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Rebuild the `id_index` from the arena.
    pub fn rebuild_index(&mut self) {
        self.id_index.clear();
        for idx in self.graph.node_indices() {
            let id = self.graph[idx].id;
            self.id_index.insert(id, idx);
        }
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_SIZE)
    }
}
