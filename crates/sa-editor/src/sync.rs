//! Sync engine: scene graph ↔ JSON document text.
//!
//! The engine owns the authoritative `SceneGraph` and keeps a JSON text view
//! of it:
//!
//! - **Editor → Text**: user actions arrive as [`EditMutation`]s. The engine
//!   applies them through the reparent engine, clamps whatever was moved,
//!   and marks the text dirty. The text is re-emitted lazily.
//!
//! - **Text → Editor**: a replacement document is reconciled into the graph
//!   (identity-keyed diff). Malformed text is rejected without touching the
//!   scene.
//!
//! Gestures (drag, rotate, scale) apply their intermediate transforms live
//! without clamping; the single clamp happens when the gesture ends.

use crate::config::EditorConfig;
use glam::Vec3;
use sa_core::bounds::{clamp, drop_to_floor, fit_to_max_height, snap_uniform_scale, translate_world};
use sa_core::pick::{pick_point, resolve_pick};
use sa_core::reparent::{self, EditError};
use sa_core::{
    AssetCache, AssetError, AssetSource, DocumentError, NodeId, NodeIndex, ReconcileReport,
    SceneGraph, Transform, reconcile_text, serialize_to_string,
};
use smallvec::SmallVec;

/// Current selection. Usually one node.
pub type Selection = SmallVec<[NodeId; 4]>;

/// Notifications for the host UI, queued and drained by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Renamed { id: NodeId, name: String },
    SelectionChanged(Vec<NodeId>),
    GraphChanged,
}

/// What kind of interactive edit a gesture is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Move,
    Rotate,
    /// Scale is forced uniform and snapped on every update.
    Scale,
}

#[derive(Debug, Clone, Copy)]
struct Gesture {
    id: NodeId,
    kind: GestureKind,
}

/// A user action on the scene.
#[derive(Debug, Clone)]
pub enum EditMutation {
    /// Replace a node's local transform.
    SetTransform { id: NodeId, transform: Transform },
    /// Move a node by a world-space offset.
    Translate { id: NodeId, delta: Vec3 },
    Reparent {
        id: NodeId,
        parent: NodeId,
        index: Option<usize>,
    },
    Group { ids: Vec<NodeId> },
    Ungroup { id: NodeId },
    Detach { id: NodeId },
    /// Duplicate with `offset`, or the configured offset when `None`.
    Duplicate { id: NodeId, offset: Option<Vec3> },
    Delete { id: NodeId },
    Rename { id: NodeId, name: String },
    /// Restore the transform the node had when it was placed.
    ResetTransform { id: NodeId },
    DropToFloor { id: NodeId },
    SnapScale { id: NodeId },
    SetVolumeSize { size: f32 },
}

impl EditMutation {
    /// The node whose local transform this mutation sets, if that is all it does.
    pub fn transform_target(&self) -> Option<NodeId> {
        match self {
            EditMutation::SetTransform { id, .. }
            | EditMutation::Translate { id, .. }
            | EditMutation::ResetTransform { id }
            | EditMutation::DropToFloor { id }
            | EditMutation::SnapScale { id } => Some(*id),
            _ => None,
        }
    }
}

/// The sync engine holds the authoritative scene graph and keeps the JSON
/// text view in sync with it.
pub struct SyncEngine<S> {
    /// The current scene graph (single source of truth).
    pub graph: SceneGraph,

    pub config: EditorConfig,

    assets: AssetCache<S>,

    /// The current text representation (re-emitted when dirty).
    text: String,

    /// Set when the graph changed and the text needs re-emitting.
    text_dirty: bool,

    selection: Selection,
    clipboard: Option<NodeId>,
    gesture: Option<Gesture>,
    events: Vec<EditorEvent>,
}

impl<S: AssetSource> SyncEngine<S> {
    /// Create an empty scene.
    pub fn new(config: EditorConfig, source: S) -> Self {
        let graph = SceneGraph::new(config.volume_size);
        Self {
            graph,
            config,
            assets: AssetCache::new(source),
            text: String::new(),
            text_dirty: true,
            selection: Selection::new(),
            clipboard: None,
            gesture: None,
            events: Vec::new(),
        }
    }

    /// Create a scene from document text.
    pub async fn from_text(config: EditorConfig, source: S, text: &str) -> Result<Self, DocumentError> {
        let mut engine = Self::new(config, source);
        engine.set_text(text).await?;
        engine.events.clear();
        Ok(engine)
    }

    pub fn assets(&self) -> &AssetCache<S> {
        &self.assets
    }

    fn lookup(&self, id: NodeId) -> Result<NodeIndex, EditError> {
        self.graph.index_of(id).ok_or(EditError::UnknownNode(id))
    }

    /// A node the user may transform directly.
    fn editable(&self, id: NodeId) -> Result<NodeIndex, EditError> {
        let idx = self.lookup(id)?;
        let node = &self.graph.graph[idx];
        if node.is_root() {
            return Err(EditError::RootImmutable);
        }
        if !node.selectable {
            return Err(EditError::AssetInternal(id));
        }
        Ok(idx)
    }

    /// Clamp after a committed transform, unless a gesture on this node is
    /// still in progress.
    fn commit_transform(&mut self, idx: NodeIndex) {
        let id = self.graph.graph[idx].id;
        if self.gesture.is_some_and(|g| g.id == id) {
            return;
        }
        clamp(&mut self.graph, idx);
    }

    // ─── Editor → Text direction ─────────────────────────────────────────

    /// Apply a user action. Returns the node it created, if any (group,
    /// duplicate). A refused action leaves the scene unchanged.
    pub fn apply_mutation(&mut self, mutation: EditMutation) -> Result<Option<NodeId>, EditError> {
        let mut created = None;
        match mutation {
            EditMutation::SetTransform { id, transform } => {
                let idx = self.editable(id)?;
                self.graph.graph[idx].transform = transform;
                if self.gesture.is_some_and(|g| g.id == id && g.kind == GestureKind::Scale) {
                    snap_uniform_scale(&mut self.graph, idx, self.config.snap_step);
                }
                self.commit_transform(idx);
            }
            EditMutation::Translate { id, delta } => {
                let idx = self.editable(id)?;
                translate_world(&mut self.graph, idx, delta);
                self.commit_transform(idx);
            }
            // Structural edits can dissolve groups; drop handles to them.
            EditMutation::Reparent { id, parent, index } => {
                reparent::reparent(&mut self.graph, id, parent, index)?;
                self.prune_dangling();
            }
            EditMutation::Group { ids } => {
                let group = reparent::group(&mut self.graph, &ids)?;
                self.prune_dangling();
                self.set_selection([group]);
                created = Some(group);
            }
            EditMutation::Ungroup { id } => {
                let released = reparent::ungroup(&mut self.graph, id)?;
                self.prune_dangling();
                self.set_selection(released);
            }
            EditMutation::Detach { id } => {
                reparent::detach(&mut self.graph, id)?;
                self.prune_dangling();
            }
            EditMutation::Duplicate { id, offset } => {
                let offset = offset.unwrap_or(self.config.duplicate_offset);
                let copy = reparent::duplicate(&mut self.graph, id, offset)?;
                let idx = self.lookup(copy)?;
                clamp(&mut self.graph, idx);
                self.set_selection([copy]);
                created = Some(copy);
            }
            EditMutation::Delete { id } => {
                reparent::delete(&mut self.graph, id)?;
                self.prune_dangling();
            }
            EditMutation::Rename { id, name } => {
                let idx = self.editable(id)?;
                let node = &mut self.graph.graph[idx];
                if node.name == name {
                    return Ok(None);
                }
                node.name.clone_from(&name);
                self.events.push(EditorEvent::Renamed { id, name });
            }
            EditMutation::ResetTransform { id } => {
                let idx = self.editable(id)?;
                let node = &mut self.graph.graph[idx];
                node.transform = node.initial_transform;
                self.commit_transform(idx);
            }
            EditMutation::DropToFloor { id } => {
                let idx = self.editable(id)?;
                drop_to_floor(&mut self.graph, idx);
                self.commit_transform(idx);
            }
            EditMutation::SnapScale { id } => {
                let idx = self.editable(id)?;
                snap_uniform_scale(&mut self.graph, idx, self.config.snap_step);
                self.commit_transform(idx);
            }
            EditMutation::SetVolumeSize { size } => {
                if !size.is_finite() || size <= 0.0 {
                    return Err(EditError::InvalidVolume(size));
                }
                self.graph.set_volume_size(size);
            }
        }
        self.mark_changed();
        Ok(created)
    }

    /// Put a node back to an exact earlier transform, without clamping.
    /// Used by undo/redo.
    pub fn restore_transform(&mut self, id: NodeId, transform: Transform) -> bool {
        let Some(node) = self.graph.get_by_id_mut(id) else {
            return false;
        };
        node.transform = transform;
        self.mark_changed();
        true
    }

    pub fn transform_of(&self, id: NodeId) -> Option<Transform> {
        self.graph.get_by_id(id).map(|n| n.transform)
    }

    fn mark_changed(&mut self) {
        self.text_dirty = true;
        if self.events.last() != Some(&EditorEvent::GraphChanged) {
            self.events.push(EditorEvent::GraphChanged);
        }
    }

    // ─── Gestures ────────────────────────────────────────────────────────

    /// Start an interactive edit of one node. Intermediate transforms are
    /// applied without clamping until [`Self::end_gesture`].
    pub fn begin_gesture(&mut self, id: NodeId, kind: GestureKind) -> Result<(), EditError> {
        self.editable(id)?;
        if let Some(previous) = self.gesture.replace(Gesture { id, kind }) {
            log::warn!("gesture on {} replaced before it ended", previous.id);
        }
        Ok(())
    }

    /// Finish the gesture and clamp its node once. Returns the node and the
    /// correction applied.
    pub fn end_gesture(&mut self) -> Option<(NodeId, Vec3)> {
        let gesture = self.gesture.take()?;
        let idx = self.graph.index_of(gesture.id)?;
        let correction = clamp(&mut self.graph, idx);
        if correction != Vec3::ZERO {
            self.mark_changed();
        }
        Some((gesture.id, correction))
    }

    pub fn gesture_target(&self) -> Option<NodeId> {
        self.gesture.map(|g| g.id)
    }

    // ─── Assets ──────────────────────────────────────────────────────────

    /// Load an asset and place it at the origin: fitted to the import height,
    /// resting on the floor, clamped, and selected.
    pub async fn place_asset(&mut self, reference: &str) -> Result<NodeId, AssetError> {
        let asset = self.assets.resolve(reference).await?;
        let root = self.graph.root;
        let name = asset.root.name.clone();
        let idx = sa_core::asset::spawn_asset(&mut self.graph, root, None, &name, reference, &asset);

        if self.config.fit_imports {
            fit_to_max_height(&mut self.graph, idx, self.config.max_import_height);
        }
        if self.config.drop_imports {
            drop_to_floor(&mut self.graph, idx);
        }
        clamp(&mut self.graph, idx);
        let node = &mut self.graph.graph[idx];
        node.initial_transform = node.transform;

        let id = node.id;
        log::debug!("placed {reference} as {id}");
        self.set_selection([id]);
        self.mark_changed();
        Ok(id)
    }

    // ─── Selection & clipboard ───────────────────────────────────────────

    pub fn selection(&self) -> &[NodeId] {
        &self.selection
    }

    /// Replace the selection. Unknown ids are dropped.
    pub fn set_selection(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        let next: Selection = ids
            .into_iter()
            .filter(|id| self.graph.get_by_id(*id).is_some())
            .collect();
        if next != self.selection {
            self.selection = next;
            self.events
                .push(EditorEvent::SelectionChanged(self.selection.to_vec()));
        }
    }

    /// Select whatever is under a world-space point (nearest selectable
    /// owner), or clear the selection on empty space.
    pub fn pick(&mut self, point: Vec3) -> Option<NodeId> {
        let hit = pick_point(&self.graph, point);
        self.set_selection(hit);
        hit
    }

    /// Select the selectable owner of a picked leaf.
    pub fn pick_leaf(&mut self, leaf: NodeId) -> Option<NodeId> {
        let hit = resolve_pick(&self.graph, leaf);
        self.set_selection(hit);
        hit
    }

    /// Whether the transform tools may act on `selection`: a single node, or
    /// several nodes that are all children of the same group.
    pub fn is_editing_allowed(&self, selection: &[NodeId]) -> bool {
        let mut parents = selection.iter().map(|&id| {
            self.graph
                .index_of(id)
                .filter(|&idx| idx != self.graph.root)
                .map(|idx| self.graph.parent(idx))
        });
        match selection.len() {
            0 => false,
            1 => parents.all(|p| p.is_some()),
            _ => {
                let Some(Some(Some(first))) = parents.next() else {
                    return false;
                };
                self.graph.graph[first].is_group() && parents.all(|p| p == Some(Some(first)))
            }
        }
    }

    pub fn copy(&mut self, id: NodeId) -> Result<(), EditError> {
        self.editable(id)?;
        self.clipboard = Some(id);
        Ok(())
    }

    /// Duplicate the copied node with the configured offset and clamp it.
    pub fn paste(&mut self) -> Result<Option<NodeId>, EditError> {
        let Some(id) = self.clipboard else {
            return Ok(None);
        };
        self.apply_mutation(EditMutation::Duplicate { id, offset: None })
    }

    fn prune_dangling(&mut self) {
        if let Some(id) = self.clipboard
            && self.graph.get_by_id(id).is_none()
        {
            self.clipboard = None;
        }
        if let Some(g) = self.gesture
            && self.graph.get_by_id(g.id).is_none()
        {
            self.gesture = None;
        }
        let kept: Selection = self.selection.clone();
        self.set_selection(kept);
    }

    /// Take all queued notifications.
    pub fn drain_events(&mut self) -> Vec<EditorEvent> {
        std::mem::take(&mut self.events)
    }

    // ─── Text → Editor direction ─────────────────────────────────────────

    /// Reconcile a replacement document into the scene. Malformed text is
    /// rejected and the scene left untouched.
    pub async fn set_text(&mut self, text: &str) -> Result<ReconcileReport, DocumentError> {
        let report = reconcile_text(&mut self.graph, &self.assets, text).await?;
        self.gesture = None;
        self.prune_dangling();
        if !report.is_noop() {
            self.mark_changed();
        }
        Ok(report)
    }

    /// Re-emit the text if the graph changed since the last flush.
    pub fn flush_to_text(&mut self) -> Result<(), DocumentError> {
        if self.text_dirty {
            self.text = serialize_to_string(&self.graph)?;
            self.text_dirty = false;
        }
        Ok(())
    }

    /// Current document text.
    pub fn current_text(&mut self) -> Result<&str, DocumentError> {
        self.flush_to_text()?;
        Ok(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_core::MemoryAssetSource;
    use sa_core::bounds::world_bounds;
    use sa_core::math::{Aabb, EPSILON};
    use sa_core::SceneNode;

    fn engine() -> SyncEngine<MemoryAssetSource> {
        let source = MemoryAssetSource::new()
            .with_box("crate.glb", "Crate", Vec3::new(1.0, 1.0, 1.0))
            .with_box("tower.glb", "Tower", Vec3::new(1.0, 3.5, 1.0));
        SyncEngine::new(EditorConfig::default(), source)
    }

    fn add_box(engine: &mut SyncEngine<MemoryAssetSource>, name: &str, x: f32) -> NodeId {
        let node = SceneNode::mesh(name, Some(Aabb::from_center_size(Vec3::Y * 0.5, Vec3::ONE)))
            .with_resource(format!("{name}.glb"))
            .with_transform(Transform::from_translation(Vec3::new(x, 0.0, 0.0)));
        let id = node.id;
        let root = engine.graph.root;
        engine.graph.add_node(root, node);
        id
    }

    #[tokio::test]
    async fn placed_asset_is_fitted_and_grounded() {
        let mut engine = engine();
        let id = engine.place_asset("tower.glb").await.unwrap();
        let idx = engine.graph.index_of(id).unwrap();
        let b = world_bounds(&engine.graph, idx).unwrap();
        assert!((b.size().y - 1.75).abs() < 1e-4, "height {}", b.size().y);
        assert!(b.min.y.abs() < 1e-4);
        assert_eq!(engine.selection(), &[id]);
        assert_eq!(engine.graph.graph[idx].initial_transform, engine.graph.graph[idx].transform);
    }

    #[tokio::test]
    async fn missing_asset_is_an_error() {
        let mut engine = engine();
        assert!(matches!(
            engine.place_asset("nope.glb").await,
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn translate_commits_with_clamp() {
        let mut engine = engine();
        let id = add_box(&mut engine, "a", 0.0);
        engine
            .apply_mutation(EditMutation::Translate {
                id,
                delta: Vec3::new(50.0, 0.0, 0.0),
            })
            .unwrap();
        let x = engine.transform_of(id).unwrap().translation.x;
        assert!((x - 9.5).abs() < EPSILON, "x = {x}");
    }

    #[test]
    fn rotation_gesture_clamps_once_at_end() {
        let mut engine = engine();
        let id = add_box(&mut engine, "a", 9.5);
        engine.begin_gesture(id, GestureKind::Rotate).unwrap();

        let mut t = engine.transform_of(id).unwrap();
        t.rotation = glam::Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        engine
            .apply_mutation(EditMutation::SetTransform { id, transform: t })
            .unwrap();
        // the rotated corners poke out past x = 10, but nothing moves yet
        assert_eq!(engine.transform_of(id).unwrap().translation.x, 9.5);

        let (ended, correction) = engine.end_gesture().unwrap();
        assert_eq!(ended, id);
        assert!(correction.x < 0.0);
        let idx = engine.graph.index_of(id).unwrap();
        let right = world_bounds(&engine.graph, idx).unwrap().max.x;
        assert!((right - 10.0).abs() < 1e-4, "right face at {right}");
    }

    #[test]
    fn scale_gesture_snaps_uniformly() {
        let mut engine = engine();
        let id = add_box(&mut engine, "a", 0.0);
        engine.begin_gesture(id, GestureKind::Scale).unwrap();
        let mut t = engine.transform_of(id).unwrap();
        t.scale = Vec3::new(2.2, 1.0, 0.5);
        engine
            .apply_mutation(EditMutation::SetTransform { id, transform: t })
            .unwrap();
        let scale = engine.transform_of(id).unwrap().scale;
        assert!(scale.abs_diff_eq(Vec3::splat(2.0), 1e-4), "{scale:?}");
        engine.end_gesture();
    }

    #[test]
    fn paste_duplicates_with_offset() {
        let mut engine = engine();
        let id = add_box(&mut engine, "a", 0.0);
        engine.copy(id).unwrap();
        let copy = engine.paste().unwrap().unwrap();

        let node = engine.graph.get_by_id(copy).unwrap();
        assert_eq!(node.name, "a Copy");
        assert_eq!(node.transform.translation, Vec3::new(0.5, 0.0, 0.5));
        assert_eq!(engine.selection(), &[copy]);
    }

    #[test]
    fn rename_emits_event() {
        let mut engine = engine();
        let id = add_box(&mut engine, "a", 0.0);
        engine.drain_events();
        engine
            .apply_mutation(EditMutation::Rename {
                id,
                name: "Crate".into(),
            })
            .unwrap();
        assert_eq!(
            engine.drain_events(),
            vec![
                EditorEvent::Renamed {
                    id,
                    name: "Crate".into()
                },
                EditorEvent::GraphChanged
            ]
        );
    }

    #[test]
    fn editing_allowed_for_single_or_group_siblings() {
        let mut engine = engine();
        let a = add_box(&mut engine, "a", 0.0);
        let b = add_box(&mut engine, "b", 2.0);
        let c = add_box(&mut engine, "c", 4.0);
        assert!(engine.is_editing_allowed(&[a]));
        assert!(!engine.is_editing_allowed(&[]));
        assert!(!engine.is_editing_allowed(&[a, b]));

        engine
            .apply_mutation(EditMutation::Group { ids: vec![a, b, c] })
            .unwrap();
        assert!(engine.is_editing_allowed(&[b, c]));
        assert!(!engine.is_editing_allowed(&[engine.graph.graph[engine.graph.root].id]));
    }

    #[test]
    fn delete_clears_selection_and_clipboard() {
        let mut engine = engine();
        let a = add_box(&mut engine, "a", 0.0);
        engine.set_selection([a]);
        engine.copy(a).unwrap();
        engine.apply_mutation(EditMutation::Delete { id: a }).unwrap();
        assert!(engine.selection().is_empty());
        assert_eq!(engine.paste(), Ok(None));
    }

    #[test]
    fn dissolving_a_group_clears_handles_to_it() {
        let mut engine = engine();
        let a = add_box(&mut engine, "a", 0.0);
        let b = add_box(&mut engine, "b", 2.0);
        let group = engine
            .apply_mutation(EditMutation::Group { ids: vec![a, b] })
            .unwrap()
            .unwrap();
        engine.copy(group).unwrap();
        assert_eq!(engine.selection(), &[group]);

        // moving b out leaves only the basis, so the group dissolves into a
        let root = engine.graph.graph[engine.graph.root].id;
        engine
            .apply_mutation(EditMutation::Reparent {
                id: b,
                parent: root,
                index: None,
            })
            .unwrap();
        assert!(engine.graph.get_by_id(group).is_none());
        assert!(engine.selection().is_empty());
        assert_eq!(engine.paste(), Ok(None));
    }

    #[tokio::test]
    async fn malformed_text_leaves_scene_alone() {
        let mut engine = engine();
        add_box(&mut engine, "a", 0.0);
        let before = engine.current_text().unwrap().to_string();
        assert!(engine.set_text("{ not json").await.is_err());
        assert_eq!(engine.current_text().unwrap(), before);
    }

    #[test]
    fn invalid_volume_is_refused() {
        let mut engine = engine();
        assert_eq!(
            engine.apply_mutation(EditMutation::SetVolumeSize { size: -1.0 }),
            Err(EditError::InvalidVolume(-1.0))
        );
    }
}
