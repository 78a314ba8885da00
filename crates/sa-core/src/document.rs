//! The persisted scene document: a JSON array of entries.
//!
//! ```json
//! [
//!   { "resource": { "name": "Canvas" }, "transform": { ... }, "bound": [20, 20, 20] },
//!   { "resource": { "name": "Chair", "reference": "chair.glb", "id": 7 },
//!     "transform": { "position": [1, 0, 2], "rotation": [0, 0, 0, 1], "scale": [1, 1, 1] },
//!     "bound": [0.6, 0.9, 0.6],
//!     "children": [ ... ] }
//! ]
//! ```
//!
//! The canvas entry is the one top-level entry without a `reference`; its
//! `bound[0]` carries the placement-volume size.

use crate::id::InternalId;
use crate::math::Transform;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Errors raised while reading or writing a scene document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("malformed scene document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid entry {path}: {reason}")]
    Invalid { path: String, reason: String },

    #[error("document has {0} canvas entries; at most one top-level entry may omit `reference`")]
    MultipleCanvases(usize),
}

/// Identity and asset of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<InternalId>,
}

/// Local transform in array form. Rotation is a quaternion in `x, y, z, w` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl TransformRecord {
    pub fn to_transform(&self) -> Transform {
        Transform::new(
            Vec3::from_array(self.position),
            Quat::from_array(self.rotation).normalize(),
            Vec3::from_array(self.scale),
        )
    }
}

impl From<Transform> for TransformRecord {
    fn from(t: Transform) -> Self {
        Self {
            position: t.translation.to_array(),
            rotation: t.rotation.to_array(),
            scale: t.scale.to_array(),
        }
    }
}

impl Default for TransformRecord {
    fn default() -> Self {
        Transform::IDENTITY.into()
    }
}

/// One node of the persisted forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntry {
    pub resource: ResourceRecord,
    #[serde(default)]
    pub transform: TransformRecord,
    /// Bounding-box size in the entry's own frame. Optional on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SceneEntry>,
}

impl SceneEntry {
    pub fn is_canvas(&self) -> bool {
        self.resource.reference.is_none()
    }

    pub fn bound_vec(&self) -> Option<Vec3> {
        self.bound.map(Vec3::from_array)
    }
}

/// A validated document, split into the canvas entry and the scene entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneDocument {
    pub canvas: Option<SceneEntry>,
    pub entries: Vec<SceneEntry>,
}

impl SceneDocument {
    /// Volume size declared by the canvas entry, if it declares one.
    pub fn volume_size(&self) -> Option<f32> {
        self.canvas.as_ref().and_then(|c| c.bound).map(|b| b[0])
    }

    /// Flatten back into the on-disk array, canvas first.
    pub fn to_entries(&self) -> Vec<SceneEntry> {
        self.canvas
            .iter()
            .chain(self.entries.iter())
            .cloned()
            .collect()
    }

    /// Total number of scene entries, nested ones included.
    pub fn entry_count(&self) -> usize {
        fn count(entries: &[SceneEntry]) -> usize {
            entries.iter().map(|e| 1 + count(&e.children)).sum()
        }
        count(&self.entries)
    }
}

// ─── Parse & validate ────────────────────────────────────────────────────

/// Parse and validate a document. Nothing is returned unless every entry
/// passes, so callers can reject a bad document before touching the scene.
pub fn parse_document(text: &str) -> Result<SceneDocument, DocumentError> {
    let entries: Vec<SceneEntry> = serde_json::from_str(text)?;

    let canvases = entries.iter().filter(|e| e.is_canvas()).count();
    if canvases > 1 {
        return Err(DocumentError::MultipleCanvases(canvases));
    }

    let mut doc = SceneDocument::default();
    for (i, entry) in entries.into_iter().enumerate() {
        let path = format!("[{i}] {:?}", entry.resource.name);
        if entry.is_canvas() {
            validate_canvas(&entry, &path)?;
            doc.canvas = Some(entry);
        } else {
            validate_entry(&entry, &path)?;
            doc.entries.push(entry);
        }
    }
    Ok(doc)
}

fn invalid(path: &str, reason: impl Into<String>) -> DocumentError {
    DocumentError::Invalid {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn validate_canvas(entry: &SceneEntry, path: &str) -> Result<(), DocumentError> {
    if let Some([size, ..]) = entry.bound
        && (!size.is_finite() || size <= 0.0)
    {
        return Err(invalid(path, format!("volume size must be positive, got {size}")));
    }
    if !entry.children.is_empty() {
        return Err(invalid(path, "the canvas entry cannot have children"));
    }
    Ok(())
}

fn validate_entry(entry: &SceneEntry, path: &str) -> Result<(), DocumentError> {
    if entry.resource.name.is_empty() {
        return Err(invalid(path, "empty name"));
    }
    match &entry.resource.reference {
        Some(r) if r.is_empty() => return Err(invalid(path, "empty reference")),
        None => return Err(invalid(path, "missing reference")),
        _ => {}
    }

    let t = &entry.transform;
    let all_finite = t
        .position
        .iter()
        .chain(&t.rotation)
        .chain(&t.scale)
        .chain(entry.bound.iter().flatten())
        .all(|v| v.is_finite());
    if !all_finite {
        return Err(invalid(path, "non-finite number"));
    }
    if Quat::from_array(t.rotation).length_squared() < 1e-8 {
        return Err(invalid(path, "zero-length rotation"));
    }
    if t.scale.iter().any(|s| s.abs() < 1e-8) {
        return Err(invalid(path, "zero scale"));
    }
    if entry.bound.iter().flatten().any(|b| *b < 0.0) {
        return Err(invalid(path, "negative bound"));
    }

    for (i, child) in entry.children.iter().enumerate() {
        let child_path = format!("{path}.children[{i}] {:?}", child.resource.name);
        validate_entry(child, &child_path)?;
    }
    Ok(())
}

/// Pretty-printed JSON text for a document.
pub fn emit_document(doc: &SceneDocument) -> Result<String, DocumentError> {
    Ok(serde_json::to_string_pretty(&doc.to_entries())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"[
        { "resource": { "name": "Canvas" },
          "transform": { "position": [0,0,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
          "bound": [12, 12, 12] },
        { "resource": { "name": "Desk", "reference": "desk.glb", "id": 3 },
          "transform": { "position": [1,0,2], "rotation": [0,0,0,1], "scale": [1,1,1] },
          "bound": [2, 1, 1],
          "children": [
            { "resource": { "name": "Lamp", "reference": "lamp.glb" },
              "transform": { "position": [0,1,0], "rotation": [0,0,0,1], "scale": [1,1,1] },
              "bound": [0.3, 0.5, 0.3] }
          ] }
    ]"#;

    #[test]
    fn parses_canvas_and_entries() {
        let doc = parse_document(SAMPLE).unwrap();
        assert_eq!(doc.volume_size(), Some(12.0));
        assert_eq!(doc.entries.len(), 1);
        assert_eq!(doc.entry_count(), 2);

        let desk = &doc.entries[0];
        assert_eq!(desk.resource.id.map(|id| id.get()), Some(3));
        assert_eq!(desk.children[0].resource.id, None);
        assert_eq!(desk.transform.to_transform().translation, Vec3::new(1.0, 0.0, 2.0));
    }

    #[test]
    fn canvas_without_bound_keeps_volume() {
        let doc = parse_document(r#"[{ "resource": { "name": "Canvas" } }]"#).unwrap();
        assert!(doc.canvas.is_some());
        assert_eq!(doc.volume_size(), None);
        assert!(doc.entries.is_empty());
    }

    #[test]
    fn canvas_with_zero_bound_is_rejected() {
        let text = r#"[{ "resource": { "name": "Canvas" }, "bound": [0, 0, 0] }]"#;
        assert!(matches!(
            parse_document(text),
            Err(DocumentError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_syntax_errors() {
        let err = parse_document("[{").unwrap_err();
        assert!(matches!(err, DocumentError::Json(_)));
    }

    #[test]
    fn rejects_nested_entry_without_reference() {
        let text = r#"[{ "resource": { "name": "A", "reference": "a.glb" },
                        "children": [ { "resource": { "name": "B" } } ] }]"#;
        let err = parse_document(text).unwrap_err();
        match err {
            DocumentError::Invalid { path, reason } => {
                assert!(path.contains("children[0]"), "{path}");
                assert_eq!(reason, "missing reference");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_two_canvases() {
        let text = r#"[{ "resource": { "name": "A" }, "bound": [5,5,5] },
                       { "resource": { "name": "B" }, "bound": [5,5,5] }]"#;
        assert!(matches!(
            parse_document(text),
            Err(DocumentError::MultipleCanvases(2))
        ));
    }

    #[test]
    fn rejects_zero_scale() {
        let text = r#"[{ "resource": { "name": "A", "reference": "a.glb" },
                        "transform": { "position": [0,0,0], "rotation": [0,0,0,1], "scale": [1,0,1] } }]"#;
        assert!(matches!(
            parse_document(text),
            Err(DocumentError::Invalid { .. })
        ));
    }

    #[test]
    fn emit_omits_empty_children_and_missing_fields() {
        let doc = SceneDocument {
            canvas: None,
            entries: vec![SceneEntry {
                resource: ResourceRecord {
                    name: "Chair".into(),
                    reference: Some("chair.glb".into()),
                    id: None,
                },
                transform: TransformRecord::default(),
                bound: Some([1.0, 1.0, 1.0]),
                children: Vec::new(),
            }],
        };
        let text = emit_document(&doc).unwrap();
        assert!(!text.contains("children"));
        assert!(!text.contains("\"id\""));
        assert_eq!(parse_document(&text).unwrap(), doc);
    }
}
