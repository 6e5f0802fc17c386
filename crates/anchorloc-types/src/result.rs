//! Localization results, from the raw solver answer to the fused pose that is
//! reported to subscribers.

use std::time::Duration;

use anchorloc_geometry::{MapToEcef, Transform3D};
use chrono::{DateTime, Utc};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BackendKind, FailureReason, MapId};

/// A geodetic pose returned by the geo flavor of the remote localizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPose {
    pub latitude: f64,
    pub longitude: f64,
    pub ellipsoid_height: f64,
    /// Camera orientation in the local East-North-Up frame.
    pub orientation: UnitQuaternion<f64>,
    /// `latitude/longitude/ellipsoid_height` lifted to ECEF metres.
    pub ecef: Vector3<f64>,
}

/// The pose a solver reports, before any convention correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RawPose {
    /// Camera pose in the map's own coordinate space (local and server flavors).
    MapSpace(Transform3D),
    /// Geodetic camera pose (geo flavor); needs the map's ECEF reference.
    Geodetic(GeoPose),
}

/// A positive solver answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub map_id: MapId,
    pub raw: RawPose,
    pub elapsed: Duration,
}

/// What a single solver invocation produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Solved {
    Match(SolveResult),
    NoMatch { elapsed: Duration },
}

/// The final pose of a successful attempt, as delivered to `PoseFound`
/// subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedPose {
    pub attempt_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub backend: BackendKind,
    pub map_id: MapId,
    /// Camera pose in map space, tracking-space convention.
    pub pose: Transform3D,
    /// Inverse of the space correction, `cloud_space * inverse(tracker_space)`:
    /// carries tracking-space content back into the map's space.
    pub correction: Transform3D,
    /// ECEF reference of the map, for remote flavors when the map has one.
    pub map_to_ecef: Option<MapToEcef>,
    pub elapsed: Duration,
}

/// The typed result of one localization attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalizeOutcome {
    Localized(LocalizedPose),
    Failed(FailureReason),
}

impl LocalizeOutcome {
    pub fn is_localized(&self) -> bool {
        matches!(self, Self::Localized(_))
    }

    pub fn pose(&self) -> Option<&LocalizedPose> {
        match self {
            Self::Localized(p) => Some(p),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Localized(_) => None,
            Self::Failed(r) => Some(r),
        }
    }
}

/// Read-only view of a localizer's running counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
}
