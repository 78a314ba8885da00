//! World-transform-preserving structural edits.
//!
//! Every operation here validates its inputs first and only then mutates, so
//! a failed call leaves the graph untouched. The primitive is
//! [`reparent`]: capture the node's world matrix, relink it, then recompute
//! the local transform against the new parent's *current* world matrix.

use crate::id::{InternalId, NodeId};
use crate::math::Transform;
use crate::model::{NodeKind, SceneGraph, SceneNode};
use glam::Vec3;
use petgraph::graph::NodeIndex;
use std::collections::HashSet;

/// Why a structural edit was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("the canvas root cannot be moved, grouped, duplicated or deleted")]
    RootImmutable,

    #[error("cannot move {node} under {target}: the target is the node itself or one of its descendants")]
    Cycle { node: NodeId, target: NodeId },

    #[error("{0} cannot hold editor children (only groups and the canvas can)")]
    InvalidParent(NodeId),

    #[error("{0} is part of a loaded asset and cannot be edited on its own")]
    AssetInternal(NodeId),

    #[error("{0} is the basis of its group; ungroup or delete the group instead")]
    BasisLocked(NodeId),

    #[error("{0} is a group and cannot be the basis of a new group; select a mesh first")]
    GroupAsBasis(NodeId),

    #[error("grouping needs at least two nodes, got {0}")]
    TooFewToGroup(usize),

    #[error("invalid grouping selection: {0}")]
    InvalidSelection(String),

    #[error("{0} is not a group")]
    NotAGroup(NodeId),

    #[error("{0} is not inside a group")]
    NotInGroup(NodeId),

    #[error("detaching {child} would leave {group} with only its basis; ungroup it instead")]
    WouldEmptyGroup { child: NodeId, group: NodeId },

    #[error("volume size must be positive, got {0}")]
    InvalidVolume(f32),
}

fn lookup(graph: &SceneGraph, id: NodeId) -> Result<NodeIndex, EditError> {
    graph.index_of(id).ok_or(EditError::UnknownNode(id))
}

/// A node the user may move around: not the root, not inside an asset.
fn editable(graph: &SceneGraph, id: NodeId) -> Result<NodeIndex, EditError> {
    let idx = lookup(graph, id)?;
    let node = &graph.graph[idx];
    if node.is_root() {
        return Err(EditError::RootImmutable);
    }
    if !node.selectable {
        return Err(EditError::AssetInternal(id));
    }
    Ok(idx)
}

// ─── Reparent ────────────────────────────────────────────────────────────

/// Move `node` under `new_parent`, keeping its world transform.
///
/// `index` is the position among `new_parent`'s children after the node has
/// been unlinked from its old place; `None` appends. Moving a node out of a
/// group that is then left with only its basis dissolves that group.
pub fn reparent(
    graph: &mut SceneGraph,
    node: NodeId,
    new_parent: NodeId,
    index: Option<usize>,
) -> Result<(), EditError> {
    let idx = editable(graph, node)?;
    let parent_idx = lookup(graph, new_parent)?;

    if parent_idx == idx || graph.is_ancestor_of(idx, parent_idx) {
        return Err(EditError::Cycle {
            node,
            target: new_parent,
        });
    }
    let target = &graph.graph[parent_idx];
    if !(target.is_group() || target.is_root()) || graph.is_basis(parent_idx) {
        return Err(EditError::InvalidParent(new_parent));
    }
    if graph.is_basis(idx) {
        return Err(EditError::BasisLocked(node));
    }
    // Slot 0 of a group belongs to its basis.
    let index = if target.is_group() {
        index.map(|i| i.max(1))
    } else {
        index
    };

    let old_parent = graph.parent(idx);
    reparent_unchecked(graph, idx, parent_idx, index);
    log::debug!("reparent {node} → {new_parent}");

    if let Some(old) = old_parent
        && old != parent_idx
    {
        cleanup_empty_groups(graph, old);
    }
    Ok(())
}

/// The reparent primitive, without validation.
pub(crate) fn reparent_unchecked(
    graph: &mut SceneGraph,
    idx: NodeIndex,
    new_parent: NodeIndex,
    index: Option<usize>,
) {
    let world_before = graph.world_matrix(idx);
    graph.unlink(idx);
    graph.link(idx, new_parent, index);

    // Read the parent's world matrix only after relinking, from the live chain.
    let parent_world = graph.world_matrix(new_parent);
    let local = parent_world.inverse() * world_before;
    graph.graph[idx].transform = Transform::from_matrix(local);
}

// ─── Group / Ungroup / Detach ────────────────────────────────────────────

/// Group the selection. The first node becomes the basis: the new group
/// takes its local transform and its slot, and the basis is reset to
/// identity underneath it. Returns the new group's handle.
pub fn group(graph: &mut SceneGraph, selection: &[NodeId]) -> Result<NodeId, EditError> {
    if selection.len() < 2 {
        return Err(EditError::TooFewToGroup(selection.len()));
    }
    let mut seen = HashSet::new();
    let mut indices = Vec::with_capacity(selection.len());
    for &id in selection {
        if !seen.insert(id) {
            return Err(EditError::InvalidSelection(format!("{id} selected twice")));
        }
        indices.push(editable(graph, id)?);
    }
    for (a, &ia) in selection.iter().zip(&indices) {
        for (b, &ib) in selection.iter().zip(&indices) {
            if graph.is_ancestor_of(ia, ib) {
                return Err(EditError::InvalidSelection(format!(
                    "{a} contains {b}"
                )));
            }
        }
    }
    // A basis is always a mesh, so the export can fold it into its group.
    for (&id, &idx) in selection.iter().zip(&indices) {
        if graph.is_basis(idx) {
            return Err(EditError::BasisLocked(id));
        }
    }
    if graph.graph[indices[0]].is_group() {
        return Err(EditError::GroupAsBasis(selection[0]));
    }

    let basis = indices[0];
    let Some(parent) = graph.parent(basis) else {
        return Err(EditError::RootImmutable);
    };
    let slot = graph.child_position(basis);
    let old_parents: Vec<NodeIndex> = indices[1..]
        .iter()
        .filter_map(|&i| graph.parent(i))
        .collect();

    let basis_node = &graph.graph[basis];
    let group_node = SceneNode::group(basis_node.name.clone()).with_transform(basis_node.transform);
    let group_id = group_node.id;

    graph.unlink(basis);
    let group_idx = graph.insert_node(parent, slot, group_node);
    graph.link(basis, group_idx, Some(0));
    let basis_node = &mut graph.graph[basis];
    basis_node.transform = Transform::IDENTITY;
    basis_node.initial_transform = Transform::IDENTITY;

    for &other in &indices[1..] {
        reparent_unchecked(graph, other, group_idx, None);
    }
    for old in old_parents {
        cleanup_empty_groups(graph, old);
    }

    log::debug!("group {group_id} from {} nodes", selection.len());
    Ok(group_id)
}

/// Dissolve a group: every child, basis included, moves to the group's
/// parent at the group's slot, keeping its world transform.
pub fn ungroup(graph: &mut SceneGraph, group: NodeId) -> Result<Vec<NodeId>, EditError> {
    let idx = lookup(graph, group)?;
    if !graph.graph[idx].is_group() {
        return Err(EditError::NotAGroup(group));
    }
    let parent = graph.parent(idx).ok_or(EditError::RootImmutable)?;
    let slot = graph.child_position(idx).unwrap_or(0);

    let children: Vec<NodeIndex> = graph.children(idx).to_vec();
    let mut released = Vec::with_capacity(children.len());
    for (k, child) in children.into_iter().enumerate() {
        reparent_unchecked(graph, child, parent, Some(slot + k));
        released.push(graph.graph[child].id);
    }
    graph.remove_subtree(idx);

    log::debug!("ungroup {group} released {} nodes", released.len());
    Ok(released)
}

/// Take a non-basis child out of its group, placing it right after the
/// group. Refused when the group would be left with only its basis.
pub fn detach(graph: &mut SceneGraph, child: NodeId) -> Result<(), EditError> {
    let idx = editable(graph, child)?;
    let group_idx = graph
        .parent(idx)
        .filter(|&p| graph.graph[p].is_group())
        .ok_or(EditError::NotInGroup(child))?;
    if graph.is_basis(idx) {
        return Err(EditError::BasisLocked(child));
    }
    if graph.children(group_idx).len() < 3 {
        return Err(EditError::WouldEmptyGroup {
            child,
            group: graph.graph[group_idx].id,
        });
    }
    let parent = graph.parent(group_idx).ok_or(EditError::RootImmutable)?;
    let slot = graph.child_position(group_idx).map(|p| p + 1);
    reparent_unchecked(graph, idx, parent, slot);
    Ok(())
}

// ─── Duplicate ───────────────────────────────────────────────────────────

/// First free name among `"<base> Copy"`, `"<base> Copy 2"`, `"<base> Copy 3"`, …
pub fn unique_copy_name(graph: &SceneGraph, base: &str) -> String {
    let names = graph.names();
    let first = format!("{base} Copy");
    if !names.contains(first.as_str()) {
        return first;
    }
    (2..)
        .map(|n| format!("{base} Copy {n}"))
        .find(|candidate| !names.contains(candidate.as_str()))
        .unwrap_or(first)
}

/// Deep-clone the subtree at `node` next to the original. Only the top clone
/// is renamed, given a fresh internal id, and shifted by `offset`.
pub fn duplicate(graph: &mut SceneGraph, node: NodeId, offset: Vec3) -> Result<NodeId, EditError> {
    let idx = editable(graph, node)?;
    let parent = graph.parent(idx).ok_or(EditError::RootImmutable)?;
    let slot = graph.child_position(idx).map(|p| p + 1);
    let name = unique_copy_name(graph, &graph.graph[idx].name);

    let copy = clone_subtree(graph, idx, parent, slot);
    let top = &mut graph.graph[copy];
    top.name = name;
    top.internal_id = InternalId::fresh();
    top.transform.translation += offset;
    top.initial_transform = top.transform;

    log::debug!("duplicate {node} → {} ({})", top.id, top.name);
    Ok(top.id)
}

fn clone_subtree(
    graph: &mut SceneGraph,
    src: NodeIndex,
    parent: NodeIndex,
    index: Option<usize>,
) -> NodeIndex {
    let mut node = graph.graph[src].clone();
    node.id = NodeId::with_prefix(match node.kind {
        NodeKind::Group => "group",
        _ => "mesh",
    });
    node.import_tag = false;
    let copy = graph.insert_node(parent, index, node);

    let children: Vec<NodeIndex> = graph.children(src).to_vec();
    for child in children {
        clone_subtree(graph, child, copy, None);
    }
    copy
}

// ─── Delete & cleanup ────────────────────────────────────────────────────

/// Delete a node and its subtree, then dissolve any group left empty.
/// Returns the number of nodes removed.
pub fn delete(graph: &mut SceneGraph, node: NodeId) -> Result<usize, EditError> {
    let idx = editable(graph, node)?;
    if graph.is_basis(idx) {
        return Err(EditError::BasisLocked(node));
    }
    let parent = graph.parent(idx);
    let removed = graph.remove_subtree(idx).len();
    if let Some(parent) = parent {
        cleanup_empty_groups(graph, parent);
    }
    Ok(removed)
}

/// Dissolve `start` if it is a group holding only its basis, then walk up
/// the ancestor chain doing the same. The basis takes the group's slot,
/// name and internal id, and keeps its world transform. Returns the number
/// of groups dissolved.
pub fn cleanup_empty_groups(graph: &mut SceneGraph, start: NodeIndex) -> usize {
    let mut dissolved = 0;
    let mut current = Some(start);
    while let Some(g) = current {
        if !graph.contains(g) || !graph.graph[g].is_group() {
            break;
        }
        let Some(parent) = graph.parent(g) else {
            break;
        };
        let children = graph.children(g).to_vec();
        match children.as_slice() {
            [] => {
                graph.remove_subtree(g);
            }
            [basis] => {
                let basis = *basis;
                let slot = graph.child_position(g);
                reparent_unchecked(graph, basis, parent, slot);
                // The basis carries on as the group's logical object.
                let (name, internal_id) = {
                    let group = &graph.graph[g];
                    (group.name.clone(), group.internal_id)
                };
                let survivor = &mut graph.graph[basis];
                survivor.name = name;
                survivor.internal_id = internal_id;
                log::debug!(
                    "dissolve empty group {} into {}",
                    graph.graph[g].id,
                    graph.graph[basis].id
                );
                graph.remove_subtree(g);
            }
            _ => break,
        }
        dissolved += 1;
        current = Some(parent);
    }
    dissolved
}

/// Run [`cleanup_empty_groups`] over every group in the graph, deepest first.
pub fn cleanup_all_empty_groups(graph: &mut SceneGraph) -> usize {
    let mut groups: Vec<NodeIndex> = graph
        .walk_ordered(graph.root)
        .into_iter()
        .filter(|&i| graph.graph[i].is_group())
        .collect();
    groups.reverse();
    groups
        .into_iter()
        .map(|g| cleanup_empty_groups(graph, g))
        .sum()
}
