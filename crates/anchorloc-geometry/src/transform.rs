//! Rigid-body transforms.
//!
//! A [`Transform3D`] is a translation plus a unit-quaternion rotation, backed
//! by `nalgebra`.  It is the currency of the whole pipeline: device poses,
//! localizer results, map offsets and space corrections are all expressed
//! with it.
//!
//! # Example
//!
//! ```rust
//! use anchorloc_geometry::transform::Transform3D;
//! use nalgebra::{UnitQuaternion, Vector3};
//!
//! // map origin is 1 m along +X of the space.
//! let space_from_map = Transform3D::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
//! // camera is 0.5 m along +X of the map.
//! let map_from_camera = Transform3D::new(Vector3::new(0.5, 0.0, 0.0), UnitQuaternion::identity());
//!
//! let t = space_from_map.compose(map_from_camera);
//! assert!((t.translation.x - 1.5).abs() < 1e-9);
//! ```

use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }

    /// Build a transform from a position array and an `[x, y, z, w]`
    /// quaternion.  The quaternion is normalised.
    pub fn from_position_xyzw(position: [f64; 3], rotation: [f64; 4]) -> Self {
        let [x, y, z, w] = rotation;
        Self::new(
            Vector3::from(position),
            UnitQuaternion::new_normalize(nalgebra::Quaternion::new(w, x, y, z)),
        )
    }

    /// Build a transform from the three rows of a rigid 3×4 matrix
    /// `[R | t]`.
    ///
    /// The 3×3 block is projected onto the closest rotation, so small
    /// numerical noise in a server response does not produce a non-unit
    /// quaternion.
    pub fn from_rigid_rows(rows: &[[f64; 4]; 3]) -> Self {
        #[rustfmt::skip]
        let r = Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2],
            rows[1][0], rows[1][1], rows[1][2],
            rows[2][0], rows[2][1], rows[2][2],
        );
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&r));
        Self::new(Vector3::new(rows[0][3], rows[1][3], rows[2][3]), rotation)
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation + self.rotation * other.translation;
        Self::new(translated, self.rotation * other.rotation)
    }

    /// The inverse transform: if `self` = T_A_B the result is T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.inverse();
        Self::new(-(rotation * self.translation), rotation)
    }

    /// Map a point expressed in the child frame into the parent frame.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.translation + self.rotation * point
    }

    /// Homogeneous 4×4 form; column 3 holds the translation.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        self.to_isometry().to_homogeneous()
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self::new(iso.translation.vector, iso.rotation)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
