//! Integration tests: document → reconcile → serialize → reconcile.
//!
//! Exercises the full `sa-core` import/export pipeline against an in-memory
//! asset source.

use glam::{Quat, Vec3};
use pretty_assertions::assert_eq;
use sa_core::document::SceneEntry;
use sa_core::reparent::{EditError, duplicate, group};
use sa_core::{
    AssetCache, MemoryAssetSource, NodeId, SceneGraph, reconcile, reconcile_text, serialize,
};

const SHOWROOM: &str = include_str!("fixtures/showroom.json");

// ─── Helpers ─────────────────────────────────────────────────────────────

fn source() -> MemoryAssetSource {
    MemoryAssetSource::new()
        .with_box("desk.glb", "Desk", Vec3::new(2.0, 1.0, 1.0))
        .with_box("lamp.glb", "Lamp", Vec3::new(0.4, 0.9, 0.4))
        .with_box("chair.glb", "Chair", Vec3::new(0.6, 1.0, 0.6))
}

fn assets() -> AssetCache<MemoryAssetSource> {
    AssetCache::new(source())
}

async fn showroom(cache: &AssetCache<MemoryAssetSource>) -> SceneGraph {
    let mut sg = SceneGraph::default();
    reconcile_text(&mut sg, cache, SHOWROOM)
        .await
        .expect("fixture should parse");
    sg
}

/// Structural and numeric equality of two entry forests.
fn assert_forest_eq(a: &[SceneEntry], b: &[SceneEntry], path: &str) {
    assert_eq!(a.len(), b.len(), "child count differs at {path}");
    for (x, y) in a.iter().zip(b) {
        let here = format!("{path}/{}", x.resource.name);
        assert_eq!(x.resource, y.resource, "resource differs at {here}");

        let (tx, ty) = (x.transform.to_transform(), y.transform.to_transform());
        assert!(tx.approx_eq(&ty, 1e-4), "transform differs at {here}: {tx:?} vs {ty:?}");
        assert!(
            x.bound_vec().unwrap().abs_diff_eq(y.bound_vec().unwrap(), 1e-3),
            "bound differs at {here}: {:?} vs {:?}",
            x.bound,
            y.bound
        );
        assert_forest_eq(&x.children, &y.children, &here);
    }
}

// ─── Import ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn fixture_imports_with_one_placeholder() {
    let cache = assets();
    let mut sg = SceneGraph::default();
    let report = reconcile_text(&mut sg, &cache, SHOWROOM).await.unwrap();

    // desk group, lamp, two chairs, shelf
    assert_eq!(report.created.len(), 5, "{report}");
    assert_eq!(report.placeholders.len(), 1);
    assert!(report.deleted.is_empty());

    let top: Vec<&str> = sg
        .children(sg.root)
        .iter()
        .map(|&c| sg.graph[c].name.as_str())
        .collect();
    assert_eq!(top, vec!["Desk", "Chair", "Chair", "Shelf"]);

    let desk = sg.children(sg.root)[0];
    assert!(sg.graph[desk].is_group());
    assert_eq!(sg.graph[desk].internal_id.get(), 100);
    let rotation = sg.graph[desk].transform.rotation;
    assert!(rotation.angle_between(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4)) < 1e-4);
}

#[tokio::test]
async fn group_bound_matches_declared_union() {
    let cache = assets();
    let sg = showroom(&cache).await;
    let doc = serialize(&sg);
    let desk = &doc.entries[0];
    assert!(
        desk.bound_vec().unwrap().abs_diff_eq(Vec3::new(2.0, 1.2, 1.0), 1e-4),
        "{:?}",
        desk.bound
    );
}

// ─── Idempotence ─────────────────────────────────────────────────────────

#[tokio::test]
async fn reconciling_own_export_changes_nothing() {
    let cache = assets();
    let mut sg = showroom(&cache).await;

    let exported = serialize(&sg);
    let report = reconcile(&mut sg, &cache, &exported).await;
    assert!(report.is_noop(), "expected no-op, got {report}");
}

#[tokio::test]
async fn edited_scene_export_is_still_idempotent() {
    let cache = assets();
    let mut sg = showroom(&cache).await;

    let chairs: Vec<_> = sg
        .children(sg.root)
        .iter()
        .filter(|&&c| sg.graph[c].name == "Chair")
        .map(|&c| sg.graph[c].id)
        .collect();
    let desk = sg.graph[sg.children(sg.root)[0]].id;
    duplicate(&mut sg, desk, Vec3::new(0.5, 0.0, 0.5)).unwrap();
    group(&mut sg, &chairs).unwrap();

    let exported = serialize(&sg);
    let report = reconcile(&mut sg, &cache, &exported).await;
    assert!(report.is_noop(), "expected no-op, got {report}");
}

#[tokio::test]
async fn nested_groups_round_trip_without_loss() {
    let cache = AssetCache::new(source().with_box("shelf.glb", "Shelf", Vec3::new(1.5, 2.0, 0.4)));
    let mut sg = showroom(&cache).await;
    let top: Vec<NodeId> = sg
        .children(sg.root)
        .iter()
        .map(|&c| sg.graph[c].id)
        .collect();
    let (desk, shelf) = (top[0], top[3]);

    let chairs = group(&mut sg, &[top[1], top[2]]).unwrap();
    assert_eq!(group(&mut sg, &[desk, shelf]), Err(EditError::GroupAsBasis(desk)));
    group(&mut sg, &[shelf, chairs, desk]).unwrap();
    let nodes = sg.node_count();

    // shelf group > (chair group > chair, desk group > lamp)
    let exported = serialize(&sg);
    assert_eq!(exported.entry_count(), 5);

    let report = reconcile(&mut sg, &cache, &exported).await;
    assert!(report.is_noop(), "expected no-op, got {report}");
    assert_eq!(sg.node_count(), nodes);

    let mut fresh = SceneGraph::default();
    reconcile(&mut fresh, &cache, &exported).await;
    assert_eq!(fresh.node_count(), nodes);
    assert_forest_eq(&exported.entries, &serialize(&fresh).entries, "");
}

#[tokio::test]
async fn reconcile_into_empty_scene_rebuilds_the_tree() {
    let cache = assets();
    let mut sg = showroom(&cache).await;
    let desk = sg.graph[sg.children(sg.root)[0]].id;
    duplicate(&mut sg, desk, Vec3::X).unwrap();
    let exported = serialize(&sg);

    let mut fresh = SceneGraph::new(5.0);
    let report = reconcile(&mut fresh, &cache, &exported).await;
    assert!(report.volume_changed);
    assert_eq!(fresh.volume_size(), sg.volume_size());

    let rebuilt = serialize(&fresh);
    assert_forest_eq(&exported.entries, &rebuilt.entries, "");
}

// ─── Diffing ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn moved_entry_updates_in_place() {
    let cache = assets();
    let mut sg = showroom(&cache).await;
    let shelf_before = sg.children(sg.root)[3];
    let shelf_id = sg.graph[shelf_before].id;

    let mut doc = serialize(&sg);
    doc.entries[3].transform.position = [5.0, 0.0, 5.0];
    let report = reconcile(&mut sg, &cache, &doc).await;

    assert_eq!(report.updated, vec![shelf_id]);
    assert!(report.created.is_empty() && report.deleted.is_empty());
    let shelf = sg.get_by_id(shelf_id).unwrap();
    assert_eq!(shelf.transform.translation, Vec3::new(5.0, 0.0, 5.0));
    assert!(shelf.import_tag);
}

#[tokio::test]
async fn entry_moved_under_group_is_reparented_not_recreated() {
    let cache = assets();
    let mut sg = showroom(&cache).await;
    let chair_idx = sg.children(sg.root)[2];
    let chair_id = sg.graph[chair_idx].id;

    let mut doc = serialize(&sg);
    let chair = doc.entries.remove(2);
    doc.entries[0].children.push(chair);
    let report = reconcile(&mut sg, &cache, &doc).await;

    assert!(report.created.is_empty(), "{report}");
    assert!(report.deleted.is_empty(), "{report}");
    let desk = sg.children(sg.root)[0];
    assert_eq!(sg.parent(chair_idx), Some(desk));
    assert_eq!(sg.children(desk).last(), Some(&chair_idx));
    assert!(report.updated.contains(&chair_id));
}

#[tokio::test]
async fn removed_child_dissolves_its_group() {
    let cache = assets();
    let mut sg = showroom(&cache).await;
    let desk_group = sg.children(sg.root)[0];
    let desk_world = sg.world_matrix(desk_group);

    let mut doc = serialize(&sg);
    doc.entries[0].children.clear();
    let report = reconcile(&mut sg, &cache, &doc).await;
    assert_eq!(report.deleted.len(), 1);

    let desk = sg.children(sg.root)[0];
    assert!(!sg.graph[desk].is_group());
    assert_eq!(sg.graph[desk].name, "Desk");
    assert_eq!(sg.graph[desk].internal_id.get(), 100);
    assert!(sa_core::math::matrices_approx_eq(
        desk_world,
        sg.world_matrix(desk),
        1e-4
    ));
}
