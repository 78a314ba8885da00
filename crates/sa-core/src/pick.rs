//! Hit testing: world point → node lookup.
//!
//! Reverse-walks the scene tree (last child first) testing each mesh's own
//! geometry box in world space, then resolves the hit leaf to the nearest
//! selectable ancestor so picks never land inside an asset.

use crate::id::NodeId;
use crate::math::Aabb;
use crate::model::{NodeKind, SceneGraph};
use petgraph::graph::NodeIndex;

/// The node a pick on `leaf` selects: `leaf` itself or its nearest
/// selectable ancestor. `None` for the canvas.
pub fn resolve_pick(graph: &SceneGraph, leaf: NodeId) -> Option<NodeId> {
    let idx = graph.index_of(leaf)?;
    graph
        .selectable_ancestor(idx)
        .map(|i| graph.graph[i].id)
}

/// Topmost node whose geometry contains `point`, resolved to its
/// selectable ancestor. Returns `None` on empty space.
pub fn pick_point(graph: &SceneGraph, point: glam::Vec3) -> Option<NodeId> {
    let leaf = pick_leaf(graph, graph.root, point)?;
    graph
        .selectable_ancestor(leaf)
        .map(|i| graph.graph[i].id)
}

fn pick_leaf(graph: &SceneGraph, idx: NodeIndex, point: glam::Vec3) -> Option<NodeIndex> {
    for &child in graph.children(idx).iter().rev() {
        if let Some(hit) = pick_leaf(graph, child, point) {
            return Some(hit);
        }
    }

    if let Some(b) = own_world_box(graph, idx)
        && b.contains_point(point)
    {
        return Some(idx);
    }
    None
}

fn own_world_box(graph: &SceneGraph, idx: NodeIndex) -> Option<Aabb> {
    match graph.graph[idx].kind {
        NodeKind::Mesh {
            geometry: Some(geometry),
            ..
        } => Some(geometry.transformed(&graph.world_matrix(idx))),
        _ => None,
    }
}

/// All selectable nodes with geometry intersecting `region`, deduplicated,
/// in tree order. Used for box selection.
pub fn pick_region(graph: &SceneGraph, region: &Aabb) -> Vec<NodeId> {
    let mut out = Vec::new();
    for idx in graph.walk_ordered(graph.root) {
        let hit = own_world_box(graph, idx).is_some_and(|b| b.intersects(region));
        if !hit {
            continue;
        }
        if let Some(sel) = graph.selectable_ancestor(idx) {
            let id = graph.graph[sel].id;
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    out
}
