//! Scene graph → document.
//!
//! Walks the tree depth-first from the canvas root. A group's basis is not
//! written: its identity transform is folded into the group and its
//! reference is the group's reference. Asset-internal nodes are not written
//! either; they come back from the asset on import.

use crate::bounds::bound_size;
use crate::document::{DocumentError, ResourceRecord, SceneDocument, SceneEntry, emit_document};
use crate::math::Transform;
use crate::model::SceneGraph;
use petgraph::graph::NodeIndex;

/// Build the document for the current scene.
pub fn serialize(graph: &SceneGraph) -> SceneDocument {
    let root = graph.root;
    let canvas = SceneEntry {
        resource: ResourceRecord {
            name: graph.graph[root].name.clone(),
            reference: None,
            id: None,
        },
        transform: Transform::IDENTITY.into(),
        bound: Some(bound_size(graph, root).to_array()),
        children: Vec::new(),
    };
    SceneDocument {
        canvas: Some(canvas),
        entries: persisted_children(graph, root)
            .map(|c| entry_for(graph, c))
            .collect(),
    }
}

/// Serialize and render as pretty-printed JSON.
pub fn serialize_to_string(graph: &SceneGraph) -> Result<String, DocumentError> {
    emit_document(&serialize(graph))
}

/// Children that appear in the document, in order.
pub(crate) fn persisted_children(
    graph: &SceneGraph,
    idx: NodeIndex,
) -> impl Iterator<Item = NodeIndex> + '_ {
    let skip_basis = graph.graph[idx].is_group();
    graph
        .children(idx)
        .iter()
        .enumerate()
        .filter(move |(i, _)| !(skip_basis && *i == 0))
        .map(|(_, c)| *c)
        .filter(move |c| graph.graph[*c].selectable)
}

fn entry_for(graph: &SceneGraph, idx: NodeIndex) -> SceneEntry {
    let node = &graph.graph[idx];
    SceneEntry {
        resource: ResourceRecord {
            name: node.name.clone(),
            reference: graph.resolved_reference(idx),
            id: Some(node.internal_id),
        },
        transform: node.transform.into(),
        bound: Some(bound_size(graph, idx).to_array()),
        children: persisted_children(graph, idx)
            .map(|c| entry_for(graph, c))
            .collect(),
    }
}
