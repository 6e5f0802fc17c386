//! Shared vocabulary of the anchorloc workspace: map identifiers, captured
//! frames, localization results, events and the error taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod frame;
pub mod result;

pub use frame::{
    CaptureInfo, CompressedFrame, Distortion, FrameSnapshot, ImageView, Intrinsics, PixelBuffer,
};
pub use result::{
    GeoPose, LocalizeOutcome, LocalizedPose, RawPose, SolveResult, Solved, StatsSnapshot,
};

/// Stable, registry-visible map identifier.  Values ≤ 0 mean "no map".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub i32);

impl MapId {
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend-internal, per-session map handle.  Negative means "no match".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapHandle(pub i32);

/// The three solver flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process native image localization.
    Local,
    /// Server round trip returning a rigid transform.
    RemoteServer,
    /// Server round trip returning a geodetic pose.
    RemoteGeo,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::RemoteServer => write!(f, "server"),
            BackendKind::RemoteGeo => write!(f, "geo"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Failures and errors
// ────────────────────────────────────────────────────────────────────────────

/// Why an attempt ended without a pose.  None of these are errors: they are
/// ordinary negative outcomes and leave the localizer idle.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The provider had no fresh frame.  Not counted as an attempt.
    #[error("no frame available")]
    NoFrameAvailable,
    /// The camera has not delivered calibrated intrinsics yet.  Not counted as
    /// an attempt.
    #[error("camera intrinsics not calibrated yet")]
    UncalibratedIntrinsics,
    /// The solver ran and found no map.
    #[error("solver found no match")]
    SolverNoMatch,
    /// The solver matched a map that is not registered in the scene.
    #[error("map {0} is not registered")]
    UnknownMapId(MapId),
    /// A geodetic result matched a map without an ECEF reference.
    #[error("map {0} has no ECEF reference")]
    MissingGeoReference(MapId),
}

impl FailureReason {
    /// `true` when the solver was never invoked.
    pub fn is_no_attempt(&self) -> bool {
        matches!(self, Self::NoFrameAvailable | Self::UncalibratedIntrinsics)
    }
}

/// Errors that terminate a localization attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalizeError {
    /// The native call or network job failed.
    #[error("localization backend error: {0}")]
    Transport(String),

    /// The blocking worker running the solver did not complete.
    #[error("localization worker failed: {0}")]
    WorkerFailed(String),

    /// Another attempt is already in flight on this localizer.
    #[error("a localization attempt is already in flight")]
    AttemptInFlight,

    /// The requested backend flavor was not configured.
    #[error("no {0} backend configured")]
    BackendUnavailable(BackendKind),
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Notification emitted by a localizer after a state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizerEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Name of the emitting localizer, e.g. `"anchorloc::server"`.
    pub source: String,
    pub payload: EventPayload,
}

/// Event variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A successful attempt produced a fused pose.
    PoseFound(LocalizedPose),
    /// The localized map differs from the previously remembered one.
    MapChanged(MapId),
    /// Remembered map and filter histories were cleared.
    Reset,
}
