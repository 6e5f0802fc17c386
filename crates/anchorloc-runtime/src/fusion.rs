//! Pose fusion – turns a candidate camera pose into a space correction.
//!
//! Given the camera pose the localizer found inside a map and the pose the
//! device tracker reports for the same frame, the correction `m` is the
//! transform that carries map-space content onto tracking space:
//!
//! ```text
//! cloud_space   = offset_without_scale · rigid(candidate.position ⊙ scale, candidate.rotation)
//! tracker_space = device_pose
//! m             = tracker_space · cloud_space⁻¹
//! ```
//!
//! With filtering on, `m` goes through the space's [`PoseFilter`] and the
//! estimate is applied; otherwise `m` is applied unchanged.
//!
//! [`PoseFilter`]: anchorloc_geometry::PoseFilter

use anchorloc_geometry::Transform3D;
use tracing::trace;

use crate::registry::{MapOffset, MapSpace};

/// What one fusion step computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fused {
    /// Camera pose placed inside the map's space.
    pub cloud_space: Transform3D,
    /// Unfiltered correction `tracker_space · cloud_space⁻¹`.
    pub correction: Transform3D,
    /// The transform written to the space.
    pub applied: Transform3D,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoseFusion;

impl PoseFusion {
    /// Place `candidate` inside the map's space.
    pub fn cloud_space(offset: &MapOffset, candidate: &Transform3D) -> Transform3D {
        let scaled = candidate.translation.component_mul(&offset.scale);
        offset
            .without_scale()
            .compose(Transform3D::new(scaled, candidate.rotation))
    }

    pub fn correction(cloud_space: Transform3D, device_pose: Transform3D) -> Transform3D {
        device_pose.compose(cloud_space.inverse())
    }

    /// Compute and apply the correction for `space`.  The entry stays locked
    /// for the whole read-modify-write.
    pub fn fuse(
        &self,
        space: &MapSpace,
        candidate: Transform3D,
        device_pose: Transform3D,
        use_filtering: bool,
    ) -> Fused {
        let mut entry = space.lock();
        let cloud_space = Self::cloud_space(entry.offset(), &candidate);
        let correction = Self::correction(cloud_space, device_pose);
        let applied = if use_filtering {
            entry.refine(correction)
        } else {
            entry.update(correction.translation, correction.rotation);
            correction
        };
        trace!(map_id = %entry.map_id(), use_filtering, "space updated");
        Fused {
            cloud_space,
            correction,
            applied,
        }
    }
}
