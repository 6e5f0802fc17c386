//! Localizer → tracking-space coordinate convention.
//!
//! The localizer reports camera poses in a left-handed frame whose camera
//! looks down its own +Z with +Y pointing down the image.  The tracking space
//! is the mirror image of that along X.  Every raw pose therefore goes
//! through one fixed correction before it is fused:
//!
//! 1. right-multiply the rotation by a 180° turn about the camera's local Z
//!    axis ([`camera_roll_180`]);
//! 2. mirror the X axis: `x → -x` on the position, and the matching
//!    conjugation `D·R·D` (`D = diag(-1, 1, 1)`) on the rotation, which for a
//!    quaternion `(w, x, y, z)` is `(w, x, -y, -z)`.
//!
//! ```text
//! world = mirror_x(solver.rotation * Rz(180°)),  mirror_x(solver.position)
//! ```
//!
//! This pair was taken from observed behavior of the localizer and is pinned
//! by the tests below.  Do not change it without a ground-truth capture.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::transform::Transform3D;

/// 180° rotation about the camera's local Z axis.
pub fn camera_roll_180() -> UnitQuaternion<f64> {
    UnitQuaternion::new_unchecked(Quaternion::new(0.0, 0.0, 0.0, 1.0))
}

/// Mirror a position across the YZ plane.
pub fn mirror_x_position(p: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(-p.x, p.y, p.z)
}

/// Mirror a rotation across the YZ plane (`D·R·D`, `D = diag(-1, 1, 1)`).
pub fn mirror_x_rotation(q: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let q = q.quaternion();
    UnitQuaternion::new_unchecked(Quaternion::new(q.w, q.i, -q.j, -q.k))
}

/// Convert a raw localizer pose (map space, localizer convention) into the
/// tracking-space convention.
pub fn solver_to_world(pose: Transform3D) -> Transform3D {
    Transform3D::new(
        mirror_x_position(&pose.translation),
        mirror_x_rotation(&(pose.rotation * camera_roll_180())),
    )
}

/// Exact inverse of [`solver_to_world`].
pub fn world_to_solver(pose: Transform3D) -> Transform3D {
    Transform3D::new(
        mirror_x_position(&pose.translation),
        mirror_x_rotation(&pose.rotation) * camera_roll_180().inverse(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn roll_is_half_turn_about_z() {
        let roll = camera_roll_180();
        assert!((roll.angle() - PI).abs() < 1e-12);
        let v = roll * Vector3::new(1.0, 2.0, 3.0);
        assert!((v - Vector3::new(-1.0, -2.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn mirror_is_an_involution() {
        let q = UnitQuaternion::from_euler_angles(0.3, -1.1, 2.0);
        let back = mirror_x_rotation(&mirror_x_rotation(&q));
        assert!(back.angle_to(&q) < 1e-12);
        let p = Vector3::new(1.0, -2.0, 3.0);
        assert_eq!(mirror_x_position(&mirror_x_position(&p)), p);
    }

    #[test]
    fn mirrored_rotation_matches_matrix_conjugation() {
        let q = UnitQuaternion::from_euler_angles(0.2, 0.5, -0.8);
        let d = nalgebra::Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, 1.0));
        let expected = d * q.to_rotation_matrix().matrix() * d;
        let got = mirror_x_rotation(&q).to_rotation_matrix();
        assert!((got.matrix() - expected).norm() < 1e-12);
    }

    #[test]
    fn mirror_flips_yaw_direction() {
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2);
        let mirrored = mirror_x_rotation(&yaw);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2);
        assert!(mirrored.angle_to(&expected) < 1e-12);
    }

    #[test]
    fn convention_roundtrip_reproduces_pose() {
        let raw = Transform3D::new(
            Vector3::new(1.5, -0.25, 4.0),
            UnitQuaternion::from_euler_angles(0.4, 1.2, -2.5),
        );
        let back = world_to_solver(solver_to_world(raw));
        assert!((back.translation - raw.translation).norm() < 1e-12);
        assert!(back.rotation.angle_to(&raw.rotation) < 1e-9);

        let world = solver_to_world(raw);
        let again = solver_to_world(world_to_solver(world));
        assert!((again.translation - world.translation).norm() < 1e-12);
        assert!(again.rotation.angle_to(&world.rotation) < 1e-9);
    }

    #[test]
    fn identity_rotation_becomes_half_turn() {
        let world = solver_to_world(Transform3D::new(
            Vector3::new(1.0, 0.0, 0.0),
            UnitQuaternion::identity(),
        ));
        assert_eq!(world.translation, Vector3::new(-1.0, 0.0, 0.0));
        assert!(world.rotation.angle_to(&camera_roll_180()) < 1e-12);
    }
}
