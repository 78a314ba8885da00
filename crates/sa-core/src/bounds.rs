//! Bounding boxes and containment clamping against the placement volume.
//!
//! The volume is an axis-aligned box owned by the canvas root: X and Z span
//! `[-size/2, +size/2]`, Y spans `[0, size]`. Clamping only ever moves the
//! node it is called on; descendants follow rigidly.

use crate::math::{Aabb, union_opt};
use crate::model::{NodeKind, SceneGraph};
use glam::Vec3;
use petgraph::graph::NodeIndex;

/// Corrections smaller than this are treated as already contained.
const CLAMP_TOLERANCE: f32 = 1e-5;

/// The placement volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume {
    pub size: f32,
}

impl Volume {
    pub fn new(size: f32) -> Self {
        Self { size }
    }

    pub fn of(graph: &SceneGraph) -> Self {
        Self::new(graph.volume_size())
    }

    pub fn min(&self) -> Vec3 {
        Vec3::new(-self.size / 2.0, 0.0, -self.size / 2.0)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::new(self.size / 2.0, self.size, self.size / 2.0)
    }

    /// World-space translation that brings `bbox` inside the volume.
    ///
    /// Horizontal axes sum the corrections for both faces. A box wider than
    /// the volume is centred instead, which keeps the pass idempotent.
    /// Vertically only a box dipping below the floor is pushed up.
    pub fn correction(&self, bbox: &Aabb) -> Vec3 {
        let lo = self.min();
        let hi = self.max();
        let x = axis_correction(bbox.min.x, bbox.max.x, lo.x, hi.x);
        let z = axis_correction(bbox.min.z, bbox.max.z, lo.z, hi.z);
        let y = if bbox.min.y < lo.y { lo.y - bbox.min.y } else { 0.0 };
        Vec3::new(x, y, z).map(|d| if d.abs() < CLAMP_TOLERANCE { 0.0 } else { d })
    }
}

fn axis_correction(min: f32, max: f32, lo: f32, hi: f32) -> f32 {
    if max - min > hi - lo + CLAMP_TOLERANCE {
        return (lo + hi) / 2.0 - (min + max) / 2.0;
    }
    let mut d = 0.0;
    if min < lo {
        d += lo - min;
    }
    if max > hi {
        d -= max - hi;
    }
    d
}

// ─── Bounding boxes ──────────────────────────────────────────────────────

/// Box of a node's content in its own frame (own transform not applied):
/// its mesh geometry united with every descendant's box. An explicit bound
/// replaces the size and keeps the computed centre (origin when empty).
pub fn local_bounds(graph: &SceneGraph, idx: NodeIndex) -> Option<Aabb> {
    let node = &graph.graph[idx];
    let mut content = match node.kind {
        NodeKind::Mesh { geometry, .. } => geometry,
        _ => None,
    };
    for &child in graph.children(idx) {
        if let Some(b) = local_bounds(graph, child) {
            let m = graph.graph[child].transform.to_matrix();
            content = union_opt(content, b.transformed(&m));
        }
    }
    match node.explicit_bound {
        Some(size) => Some(Aabb::from_center_size(
            content.map_or(Vec3::ZERO, |b| b.center()),
            size,
        )),
        None => content,
    }
}

/// World-space box of a node and its descendants.
pub fn world_bounds(graph: &SceneGraph, idx: NodeIndex) -> Option<Aabb> {
    let local = local_bounds(graph, idx)?;
    Some(local.transformed(&graph.world_matrix(idx)))
}

/// Size reported for a node in exported documents: its extent expressed in
/// its own frame. The canvas root reports the volume size on every axis.
pub fn bound_size(graph: &SceneGraph, idx: NodeIndex) -> Vec3 {
    if idx == graph.root {
        return Vec3::splat(graph.volume_size());
    }
    local_bounds(graph, idx).map_or(Vec3::ZERO, |b| b.size())
}

// ─── Placement passes ────────────────────────────────────────────────────

/// Move a node by a world-space offset, expressed in its parent's frame.
pub fn translate_world(graph: &mut SceneGraph, idx: NodeIndex, delta: Vec3) {
    if delta == Vec3::ZERO || idx == graph.root {
        return;
    }
    let parent_world = graph
        .parent(idx)
        .map_or(glam::Mat4::IDENTITY, |p| graph.world_matrix(p));
    let local_delta = parent_world.inverse().transform_vector3(delta);
    graph.graph[idx].transform.translation += local_delta;
}

/// Push a node back inside the placement volume. Returns the world-space
/// correction that was applied (zero when already contained).
pub fn clamp(graph: &mut SceneGraph, idx: NodeIndex) -> Vec3 {
    if idx == graph.root {
        return Vec3::ZERO;
    }
    let Some(bbox) = world_bounds(graph, idx) else {
        return Vec3::ZERO;
    };
    let correction = Volume::of(graph).correction(&bbox);
    if correction != Vec3::ZERO {
        log::debug!(
            "clamp {} by ({:.3}, {:.3}, {:.3})",
            graph.graph[idx].id,
            correction.x,
            correction.y,
            correction.z
        );
        translate_world(graph, idx, correction);
    }
    correction
}

/// Rest a node on the floor: its lowest point ends at Y = 0.
pub fn drop_to_floor(graph: &mut SceneGraph, idx: NodeIndex) {
    if let Some(bbox) = world_bounds(graph, idx) {
        translate_world(graph, idx, Vec3::new(0.0, -bbox.min.y, 0.0));
    }
}

/// Force uniform scale and snap the largest world dimension to a multiple
/// of `step` (never below `step`).
pub fn snap_uniform_scale(graph: &mut SceneGraph, idx: NodeIndex, step: f32) {
    if idx == graph.root || step <= 0.0 {
        return;
    }
    let s = graph.graph[idx].transform.scale.x;
    graph.graph[idx].transform.scale = Vec3::splat(s);

    let Some(bbox) = world_bounds(graph, idx) else {
        return;
    };
    let max_dim = bbox.size().max_element();
    if max_dim <= 0.0 {
        return;
    }
    let snapped = ((max_dim / step).round() * step).max(step);
    graph.graph[idx].transform.scale *= snapped / max_dim;
}

/// Uniformly shrink a node whose world height exceeds `max_height`.
pub fn fit_to_max_height(graph: &mut SceneGraph, idx: NodeIndex, max_height: f32) {
    let Some(bbox) = world_bounds(graph, idx) else {
        return;
    };
    let height = bbox.size().y;
    if height > max_height && height > 0.0 {
        graph.graph[idx].transform.scale *= max_height / height;
    }
}
