//! Transform and bounding-box math shared by the reparent engine,
//! the clamp pass, and the serializer.
//!
//! Transforms are stored decomposed (translation, rotation, scale) on every
//! node. Matrices are derived on demand and never cached.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing transforms and bounds.
pub const EPSILON: f32 = 1e-4;

/// A local transform: translation, rotation quaternion, non-uniform scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Decompose an affine matrix. Shear introduced by non-uniform scale under
    /// rotation cannot be represented and is dropped.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation: rotation.normalize(),
            scale,
        }
    }

    /// Component-wise comparison within `eps`. Quaternions `q` and `-q`
    /// describe the same rotation and compare equal.
    pub fn approx_eq(&self, other: &Transform, eps: f32) -> bool {
        self.translation.abs_diff_eq(other.translation, eps)
            && self.scale.abs_diff_eq(other.scale, eps)
            && self.rotation.dot(other.rotation).abs() >= 1.0 - eps
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Self::IDENTITY, EPSILON)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Compare two world matrices through their decomposed form.
pub fn matrices_approx_eq(a: Mat4, b: Mat4, eps: f32) -> bool {
    Transform::from_matrix(a).approx_eq(&Transform::from_matrix(b), eps)
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(point1: Vec3, point2: Vec3) -> Aabb {
        Aabb {
            min: point1.min(point2),
            max: point1.max(point2),
        }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Aabb {
        let half = size.abs() * 0.5;
        Aabb {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ]
    }

    /// Bounding box of this box's corners after transforming them by `matrix`.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        let corners = self.corners().map(|c| matrix.transform_point3(c));
        let mut out = Aabb {
            min: corners[0],
            max: corners[0],
        };
        for corner in &corners[1..] {
            out.min = out.min.min(*corner);
            out.max = out.max.max(*corner);
        }
        out
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }
}

/// Union an optional accumulator with a box.
pub fn union_opt(acc: Option<Aabb>, other: Aabb) -> Option<Aabb> {
    Some(match acc {
        Some(a) => a.union(&other),
        None => other,
    })
}
