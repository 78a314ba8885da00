//! Document → scene graph, diff-based.
//!
//! Existing nodes are matched to document entries by identity key
//! `(name, reference, internal id)` and updated in place; unmatched entries
//! are created from assets and unmatched nodes are deleted. The pass runs
//! in three phases:
//!
//! 1. **Plan**: a pure walk that pairs every entry with a live node or marks
//!    it for creation.
//! 2. **Load**: every asset the plan needs is resolved concurrently. Nothing
//!    has been touched yet.
//! 3. **Apply**: the plan is applied to a copy of the graph which then
//!    replaces the live one, so observers see the scene entirely before or
//!    entirely after the pass.

use crate::asset::{Asset, AssetCache, AssetError, AssetSource, spawn_asset, spawn_placeholder};
use crate::bounds::bound_size;
use crate::document::{DocumentError, SceneDocument, SceneEntry, parse_document};
use crate::id::{InternalId, NodeId};
use crate::math::{EPSILON, Transform};
use crate::model::{NodeKind, SceneGraph, SceneNode};
use crate::reparent::cleanup_all_empty_groups;
use glam::Vec3;
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Bounds read back from JSON are compared with a looser tolerance.
const BOUND_TOLERANCE: f32 = 1e-3;

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub created: Vec<NodeId>,
    pub updated: Vec<NodeId>,
    pub deleted: Vec<NodeId>,
    /// Created nodes whose asset failed to load.
    pub placeholders: Vec<NodeId>,
    pub volume_changed: bool,
}

impl ReconcileReport {
    /// True when the pass left the scene exactly as it found it.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && !self.volume_changed
    }

    fn mark_updated(&mut self, id: NodeId) {
        if !self.updated.contains(&id) && !self.created.contains(&id) {
            self.updated.push(id);
        }
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted",
            self.created.len(),
            self.updated.len(),
            self.deleted.len()
        )?;
        if !self.placeholders.is_empty() {
            write!(f, " ({} placeholders)", self.placeholders.len())?;
        }
        Ok(())
    }
}

// ─── Identity index ──────────────────────────────────────────────────────

type Key = (String, String);

/// Live nodes by `(name, reference)`, each bucket in depth-first graph order.
/// Matching removes the candidate, so whatever is left at the end was not
/// visited.
struct MatchIndex {
    buckets: HashMap<Key, Vec<(NodeIndex, InternalId)>>,
}

impl MatchIndex {
    /// Index every node a document can address: selectable, not the root,
    /// and not a group's basis.
    fn build(graph: &SceneGraph) -> Self {
        let mut buckets: HashMap<Key, Vec<(NodeIndex, InternalId)>> = HashMap::new();
        for idx in graph.walk_ordered(graph.root) {
            let node = &graph.graph[idx];
            if node.is_root() || !node.selectable || graph.is_basis(idx) {
                continue;
            }
            let Some(reference) = graph.resolved_reference(idx) else {
                continue;
            };
            buckets
                .entry((node.name.clone(), reference))
                .or_default()
                .push((idx, node.internal_id));
        }
        Self { buckets }
    }

    /// First unvisited candidate. With an id, only an exact id match counts.
    fn take(&mut self, name: &str, reference: &str, id: Option<InternalId>) -> Option<NodeIndex> {
        let bucket = self
            .buckets
            .get_mut(&(name.to_string(), reference.to_string()))?;
        let pos = match id {
            Some(id) => bucket.iter().position(|(_, candidate)| *candidate == id)?,
            None if bucket.is_empty() => return None,
            None => 0,
        };
        Some(bucket.remove(pos).0)
    }

    /// Unvisited nodes in depth-first graph order.
    fn remaining(self, graph: &SceneGraph) -> Vec<NodeIndex> {
        let left: HashSet<NodeIndex> = self
            .buckets
            .into_values()
            .flatten()
            .map(|(idx, _)| idx)
            .collect();
        graph
            .walk_ordered(graph.root)
            .into_iter()
            .filter(|idx| left.contains(idx))
            .collect()
    }
}

// ─── Plan ────────────────────────────────────────────────────────────────

enum Target {
    Existing(NodeIndex),
    Create,
}

struct PlanNode<'d> {
    entry: &'d SceneEntry,
    target: Target,
    children: Vec<PlanNode<'d>>,
}

fn plan<'d>(entries: &'d [SceneEntry], index: &mut MatchIndex) -> Vec<PlanNode<'d>> {
    entries
        .iter()
        .map(|entry| {
            let resource = &entry.resource;
            let reference = resource.reference.as_deref().unwrap_or_default();
            let target = match index.take(&resource.name, reference, resource.id) {
                Some(idx) => Target::Existing(idx),
                None => Target::Create,
            };
            PlanNode {
                entry,
                target,
                children: plan(&entry.children, index),
            }
        })
        .collect()
}

fn collect_creates<'d>(nodes: &[PlanNode<'d>], out: &mut Vec<&'d str>) {
    for node in nodes {
        if matches!(node.target, Target::Create)
            && let Some(reference) = node.entry.resource.reference.as_deref()
        {
            out.push(reference);
        }
        collect_creates(&node.children, out);
    }
}

// ─── Apply ───────────────────────────────────────────────────────────────

type Loaded = HashMap<String, Result<Arc<Asset>, AssetError>>;

struct Applier<'a> {
    graph: SceneGraph,
    assets: &'a Loaded,
    report: ReconcileReport,
    /// Applied `(node, entry)` pairs, children before parents.
    placed: Vec<(NodeIndex, &'a SceneEntry)>,
    /// Unvisited nodes, removed once the plan is applied. Slots are counted
    /// as if they were already gone.
    doomed: HashSet<NodeIndex>,
}

impl<'a> Applier<'a> {
    /// Position of `idx` among the siblings that survive this pass.
    fn live_position(&self, idx: NodeIndex) -> Option<usize> {
        let parent = self.graph.parent(idx)?;
        self.graph
            .children(parent)
            .iter()
            .filter(|c| !self.doomed.contains(c))
            .position(|&c| c == idx)
    }

    /// Child-list index in front of the `live`-th surviving child of
    /// `parent`; `None` appends.
    fn raw_slot(&self, parent: NodeIndex, live: usize) -> Option<usize> {
        self.graph
            .children(parent)
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.doomed.contains(c))
            .nth(live)
            .map(|(i, _)| i)
    }

    fn apply_all(&mut self, nodes: &[PlanNode<'a>], parent: NodeIndex, first_slot: usize) {
        for (k, node) in nodes.iter().enumerate() {
            self.apply(node, parent, first_slot + k);
        }
    }

    fn apply(&mut self, node: &PlanNode<'a>, parent: NodeIndex, slot: usize) {
        let entry = node.entry;
        let transform = entry.transform.to_transform();

        let idx = match node.target {
            Target::Existing(idx) => {
                self.update_existing(idx, entry, transform, parent, slot);
                idx
            }
            Target::Create => self.create(entry, transform, parent, slot),
        };

        let idx = if !entry.children.is_empty() && !self.graph.graph[idx].is_group() {
            let basis_id = self.graph.graph[idx].id;
            let group = wrap_in_group(&mut self.graph, idx);
            let group_id = self.graph.graph[group].id;
            if matches!(node.target, Target::Create) {
                self.report.created.retain(|id| *id != basis_id);
                self.report.created.push(group_id);
            } else {
                self.report.mark_updated(group_id);
            }
            group
        } else {
            idx
        };

        let first_slot = usize::from(self.graph.graph[idx].is_group());
        self.apply_all(&node.children, idx, first_slot);
        self.placed.push((idx, entry));
    }

    fn update_existing(
        &mut self,
        idx: NodeIndex,
        entry: &SceneEntry,
        transform: Transform,
        parent: NodeIndex,
        slot: usize,
    ) {
        let mut changed = false;
        if self.graph.parent(idx) != Some(parent) || self.live_position(idx) != Some(slot) {
            self.graph.unlink(idx);
            let raw = self.raw_slot(parent, slot);
            self.graph.link(idx, parent, raw);
            changed = true;
        }

        let node = &mut self.graph.graph[idx];
        if !node.transform.approx_eq(&transform, EPSILON) {
            node.transform = transform;
            changed = true;
        }
        if node.name != entry.resource.name {
            node.name.clone_from(&entry.resource.name);
            changed = true;
        }
        if changed {
            let id = node.id;
            self.report.mark_updated(id);
        }
    }

    fn create(
        &mut self,
        entry: &SceneEntry,
        transform: Transform,
        parent: NodeIndex,
        slot: usize,
    ) -> NodeIndex {
        let name = entry.resource.name.as_str();
        let reference = entry.resource.reference.as_deref().unwrap_or_default();
        let raw = self.raw_slot(parent, slot);

        let idx = match self.assets.get(reference) {
            Some(Ok(asset)) => spawn_asset(&mut self.graph, parent, raw, name, reference, asset),
            failure => {
                if let Some(Err(e)) = failure {
                    log::warn!("placeholder for {name}: {e}");
                }
                let idx = spawn_placeholder(
                    &mut self.graph,
                    parent,
                    raw,
                    name,
                    reference,
                    entry.bound_vec().unwrap_or(Vec3::ONE),
                );
                self.report.placeholders.push(self.graph.graph[idx].id);
                idx
            }
        };

        let node = &mut self.graph.graph[idx];
        node.transform = transform;
        node.initial_transform = transform;
        node.internal_id = entry.resource.id.unwrap_or_else(InternalId::fresh);
        self.report.created.push(node.id);
        idx
    }

    /// Declared bounds differing from the computed extent become explicit
    /// overrides. Runs after structure settles, children first. Group
    /// bounds always follow their children.
    fn apply_bounds(&mut self) {
        for &(idx, entry) in &self.placed {
            if !self.graph.contains(idx) {
                continue;
            }
            let node = &self.graph.graph[idx];
            if node.is_group() || self.report.created.contains(&node.id) {
                continue;
            }
            let Some(declared) = entry.bound_vec() else {
                continue;
            };
            if !bound_size(&self.graph, idx).abs_diff_eq(declared, BOUND_TOLERANCE) {
                let node = &mut self.graph.graph[idx];
                node.explicit_bound = Some(declared);
                let id = node.id;
                self.report.mark_updated(id);
            }
        }
    }
}

/// Turn a mesh into the basis of a new group that takes over its slot,
/// local transform, name and identity.
fn wrap_in_group(graph: &mut SceneGraph, idx: NodeIndex) -> NodeIndex {
    let node = &graph.graph[idx];
    let mut group = SceneNode::group(node.name.clone()).with_transform(node.transform);
    group.internal_id = node.internal_id;

    let parent = graph.parent(idx).unwrap_or(graph.root);
    let slot = graph.child_position(idx);
    graph.unlink(idx);
    let group_idx = graph.insert_node(parent, slot, group);
    graph.link(idx, group_idx, Some(0));

    let basis = &mut graph.graph[idx];
    basis.transform = Transform::IDENTITY;
    basis.initial_transform = Transform::IDENTITY;
    basis.internal_id = InternalId::fresh();
    group_idx
}

// ─── Entry points ────────────────────────────────────────────────────────

/// Reconcile the scene against a validated document.
pub async fn reconcile<S: AssetSource>(
    graph: &mut SceneGraph,
    cache: &AssetCache<S>,
    doc: &SceneDocument,
) -> ReconcileReport {
    let mut index = MatchIndex::build(graph);
    let plan = plan(&doc.entries, &mut index);
    let unvisited = index.remaining(graph);

    let mut wanted = Vec::new();
    collect_creates(&plan, &mut wanted);
    let assets = cache.resolve_all(wanted).await;

    let mut applier = Applier {
        graph: graph.clone(),
        assets: &assets,
        report: ReconcileReport::default(),
        placed: Vec::new(),
        doomed: unvisited.iter().copied().collect(),
    };
    let root = applier.graph.root;
    applier.apply_all(&plan, root, 0);

    applier.report.deleted = unvisited
        .iter()
        .map(|&idx| applier.graph.graph[idx].id)
        .collect();
    for idx in unvisited {
        applier.graph.remove_subtree(idx);
    }
    cleanup_all_empty_groups(&mut applier.graph);
    applier.apply_bounds();

    if let Some(size) = doc.volume_size()
        && (applier.graph.volume_size() - size).abs() > EPSILON
    {
        applier.graph.set_volume_size(size);
        applier.report.volume_changed = true;
    }

    let Applier {
        graph: mut next,
        report,
        ..
    } = applier;
    tag_imports(&mut next, &report);
    *graph = next;

    if report.is_noop() {
        log::debug!("reconcile: no changes");
    } else {
        log::info!("reconcile: {report}");
    }
    report
}

/// Parse, validate and reconcile. A malformed document leaves the scene
/// untouched.
pub async fn reconcile_text<S: AssetSource>(
    graph: &mut SceneGraph,
    cache: &AssetCache<S>,
    text: &str,
) -> Result<ReconcileReport, DocumentError> {
    let doc = parse_document(text)?;
    Ok(reconcile(graph, cache, &doc).await)
}

fn tag_imports(graph: &mut SceneGraph, report: &ReconcileReport) {
    let touched: Vec<NodeId> = report
        .created
        .iter()
        .chain(&report.updated)
        .copied()
        .collect();
    for idx in graph.graph.node_indices().collect::<Vec<_>>() {
        let node = &mut graph.graph[idx];
        node.import_tag = touched.contains(&node.id);
    }
}

/// Whether a node is a stand-in for an asset that failed to load.
pub fn is_placeholder(graph: &SceneGraph, idx: NodeIndex) -> bool {
    matches!(
        graph.graph[idx].kind,
        NodeKind::Mesh {
            placeholder: true,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemoryAssetSource;
    use crate::serialize::serialize;
    use pretty_assertions::assert_eq;

    fn cache() -> AssetCache<MemoryAssetSource> {
        AssetCache::new(
            MemoryAssetSource::new()
                .with_box("chair.glb", "Chair", Vec3::new(1.0, 1.0, 1.0))
                .with_box("desk.glb", "Desk", Vec3::new(2.0, 1.0, 1.0)),
        )
    }

    const TWO_CHAIRS: &str = r#"[
        { "resource": { "name": "Canvas" }, "bound": [10, 10, 10] },
        { "resource": { "name": "Chair", "reference": "chair.glb" },
          "transform": { "position": [1,0,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
          "bound": [1, 1, 1] },
        { "resource": { "name": "Chair", "reference": "chair.glb" },
          "transform": { "position": [3,0,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
          "bound": [1, 1, 1] }
    ]"#;

    #[tokio::test]
    async fn creates_into_empty_scene() {
        let mut sg = SceneGraph::default();
        let report = reconcile_text(&mut sg, &cache(), TWO_CHAIRS).await.unwrap();

        assert_eq!(report.created.len(), 2);
        assert!(report.deleted.is_empty());
        assert!(report.volume_changed);
        assert_eq!(sg.volume_size(), 10.0);

        let xs: Vec<f32> = sg
            .children(sg.root)
            .iter()
            .map(|&c| sg.graph[c].transform.translation.x)
            .collect();
        assert_eq!(xs, vec![1.0, 3.0]);
        assert!(sg.children(sg.root).iter().all(|&c| sg.graph[c].import_tag));
    }

    #[tokio::test]
    async fn keyless_duplicates_match_in_order() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        reconcile_text(&mut sg, &cache, TWO_CHAIRS).await.unwrap();
        let before: Vec<NodeId> = sg.children(sg.root).iter().map(|&c| sg.graph[c].id).collect();

        let moved = TWO_CHAIRS.replace("[3,0,0]", "[4,0,0]");
        let report = reconcile_text(&mut sg, &cache, &moved).await.unwrap();
        assert!(report.created.is_empty());
        assert!(report.deleted.is_empty());
        assert_eq!(report.updated, vec![before[1]]);
        assert!(!sg.graph[sg.children(sg.root)[0]].import_tag);
    }

    #[tokio::test]
    async fn unvisited_nodes_are_deleted() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        reconcile_text(&mut sg, &cache, TWO_CHAIRS).await.unwrap();

        let one = r#"[{ "resource": { "name": "Chair", "reference": "chair.glb" },
                        "transform": { "position": [1,0,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
                        "bound": [1, 1, 1] }]"#;
        let report = reconcile_text(&mut sg, &cache, one).await.unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(sg.children(sg.root).len(), 1);
        // no canvas entry: the volume is left alone
        assert_eq!(sg.volume_size(), 10.0);
    }

    #[tokio::test]
    async fn deleting_an_entry_leaves_later_siblings_alone() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        reconcile_text(&mut sg, &cache, TWO_CHAIRS).await.unwrap();
        let second = sg.children(sg.root)[1];

        let mut doc = serialize(&sg);
        doc.entries.remove(0);
        let report = reconcile(&mut sg, &cache, &doc).await;

        assert_eq!(report.deleted.len(), 1);
        assert!(report.updated.is_empty(), "{report}");
        assert_eq!(sg.children(sg.root), &[second]);
        assert!(!sg.graph[second].import_tag);
    }

    #[tokio::test]
    async fn entries_land_in_document_order_around_deletions() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        reconcile_text(&mut sg, &cache, TWO_CHAIRS).await.unwrap();
        let second = sg.children(sg.root)[1];

        // drop the first chair, keep the second, add a desk after it
        let mut doc = serialize(&sg);
        doc.entries.remove(0);
        let mut desk = doc.entries[0].clone();
        desk.resource.name = "Desk".into();
        desk.resource.reference = Some("desk.glb".into());
        desk.resource.id = None;
        doc.entries.push(desk);
        let report = reconcile(&mut sg, &cache, &doc).await;

        assert_eq!(report.created.len(), 1);
        assert!(report.updated.is_empty(), "{report}");
        let names: Vec<&str> = sg
            .children(sg.root)
            .iter()
            .map(|&c| sg.graph[c].name.as_str())
            .collect();
        assert_eq!(names, vec!["Chair", "Desk"]);
        assert_eq!(sg.children(sg.root)[0], second);
    }

    #[tokio::test]
    async fn deletions_are_reported_in_tree_order() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        let entries: Vec<String> = ["Ash", "Birch", "Cedar", "Elm", "Fir", "Oak"]
            .iter()
            .map(|name| format!(r#"{{ "resource": {{ "name": "{name}", "reference": "chair.glb" }} }}"#))
            .collect();
        reconcile_text(&mut sg, &cache, &format!("[{}]", entries.join(",")))
            .await
            .unwrap();
        let in_tree: Vec<NodeId> = sg.children(sg.root).iter().map(|&c| sg.graph[c].id).collect();

        let report = reconcile_text(&mut sg, &cache, "[]").await.unwrap();
        assert_eq!(report.deleted, in_tree);
        assert!(sg.children(sg.root).is_empty());
    }

    #[tokio::test]
    async fn canvas_without_bound_keeps_the_volume() {
        let mut sg = SceneGraph::new(7.0);
        let doc = r#"[{ "resource": { "name": "Canvas" } },
                      { "resource": { "name": "Chair", "reference": "chair.glb" } }]"#;
        let report = reconcile_text(&mut sg, &cache(), doc).await.unwrap();
        assert!(!report.volume_changed);
        assert_eq!(sg.volume_size(), 7.0);
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn id_mismatch_does_not_fall_back_to_name() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        reconcile_text(&mut sg, &cache, TWO_CHAIRS).await.unwrap();

        let doc = r#"[{ "resource": { "name": "Chair", "reference": "chair.glb", "id": 999999 },
                        "bound": [1, 1, 1] }]"#;
        let report = reconcile_text(&mut sg, &cache, doc).await.unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.deleted.len(), 2);
    }

    #[tokio::test]
    async fn missing_asset_becomes_placeholder() {
        let mut sg = SceneGraph::default();
        let doc = r#"[{ "resource": { "name": "Sofa", "reference": "sofa.glb" },
                        "bound": [3, 1, 1] }]"#;
        let report = reconcile_text(&mut sg, &cache(), doc).await.unwrap();
        assert_eq!(report.placeholders.len(), 1);

        let idx = sg.children(sg.root)[0];
        assert!(is_placeholder(&sg, idx));
        assert!(bound_size(&sg, idx).abs_diff_eq(Vec3::new(3.0, 1.0, 1.0), 1e-5));
    }

    #[tokio::test]
    async fn malformed_document_changes_nothing() {
        let mut sg = SceneGraph::default();
        let cache = cache();
        reconcile_text(&mut sg, &cache, TWO_CHAIRS).await.unwrap();
        let before = serialize(&sg);

        let bad = r#"[{ "resource": { "name": "Chair", "reference": "chair.glb" },
                        "transform": { "position": [1,0], "rotation": [0,0,0,1], "scale": [1,1,1] } }]"#;
        assert!(reconcile_text(&mut sg, &cache, bad).await.is_err());
        assert_eq!(serialize(&sg), before);
    }

    #[tokio::test]
    async fn children_wrap_the_node_into_a_group() {
        let mut sg = SceneGraph::default();
        let doc = r#"[{ "resource": { "name": "Desk", "reference": "desk.glb", "id": 41 },
                        "transform": { "position": [2,0,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
                        "bound": [2, 1, 1],
                        "children": [
                          { "resource": { "name": "Chair", "reference": "chair.glb" },
                            "transform": { "position": [0,0,1.5], "rotation": [0,0,0,1], "scale": [1,1,1] },
                            "bound": [1, 1, 1] } ] }]"#;
        reconcile_text(&mut sg, &cache(), doc).await.unwrap();

        let group = sg.children(sg.root)[0];
        assert!(sg.graph[group].is_group());
        assert_eq!(sg.graph[group].internal_id.get(), 41);
        assert_eq!(sg.graph[group].transform.translation, Vec3::new(2.0, 0.0, 0.0));

        let children = sg.children(group);
        assert_eq!(children.len(), 2);
        assert!(sg.graph[children[0]].transform.is_identity());
        assert_eq!(sg.graph[children[0]].resource.as_deref(), Some("desk.glb"));
        assert_eq!(sg.graph[children[1]].name, "Chair");
    }
}
