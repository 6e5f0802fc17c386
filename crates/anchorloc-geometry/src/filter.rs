//! Temporal filtering of space corrections.
//!
//! Each registered map space owns a [`PoseFilter`].  Every successful
//! localization produces a candidate correction transform; when filtering is
//! enabled the candidate is fed through the filter and the smoothed result is
//! what actually moves the space.
//!
//! The default [`SmoothingFilter`] keeps a sliding window of recent
//! candidates and averages them:
//!
//! ```text
//! t̄ = (1/n) Σ tᵢ
//! q̄ = normalize(Σ sign(q₀·qᵢ) qᵢ)
//! ```
//!
//! A candidate whose translation lands further than `jump_threshold` from the
//! current estimate is treated as an outlier and ignored, unless
//! `max_consecutive_outliers` of them arrive in a row, in which case the space
//! is assumed to have genuinely moved and the window restarts from the new
//! candidate.
//!
//! # Example
//!
//! ```rust
//! use anchorloc_geometry::filter::{PoseFilter, SmoothingFilter};
//! use anchorloc_geometry::transform::Transform3D;
//! use nalgebra::{UnitQuaternion, Vector3};
//!
//! let mut filter = SmoothingFilter::default();
//! let at = |x: f64| Transform3D::new(Vector3::new(x, 0.0, 0.0), UnitQuaternion::identity());
//!
//! filter.refine(at(1.0));
//! let smoothed = filter.refine(at(1.2));
//! assert!((smoothed.translation.x - 1.1).abs() < 1e-9);
//! ```

use std::collections::VecDeque;

use nalgebra::{Quaternion, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transform::Transform3D;

// ────────────────────────────────────────────────────────────────────────────
// PoseFilter trait
// ────────────────────────────────────────────────────────────────────────────

/// Smooths a stream of candidate rigid transforms.
pub trait PoseFilter: Send {
    /// Feed a new candidate and return the transform that should be applied.
    fn refine(&mut self, candidate: Transform3D) -> Transform3D;

    /// Forget all accumulated history.  Called whenever device tracking is
    /// lost or the localizer is reset.
    fn invalidate_history(&mut self);
}

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Tuning for [`SmoothingFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Number of candidates averaged (clamped to at least 1).
    #[serde(default = "default_window")]
    pub window: usize,
    /// Translation distance (metres) beyond which a candidate is an outlier.
    #[serde(default = "default_jump_threshold", rename = "jump_threshold_m")]
    pub jump_threshold: f64,
    /// Consecutive outliers after which the history restarts.
    #[serde(default = "default_max_outliers")]
    pub max_consecutive_outliers: usize,
}

fn default_window() -> usize {
    8
}
fn default_jump_threshold() -> f64 {
    2.0
}
fn default_max_outliers() -> usize {
    3
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            jump_threshold: default_jump_threshold(),
            max_consecutive_outliers: default_max_outliers(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SmoothingFilter
// ────────────────────────────────────────────────────────────────────────────

/// Sliding-window averaging filter with outlier rejection.
#[derive(Debug)]
pub struct SmoothingFilter {
    settings: FilterSettings,
    history: VecDeque<Transform3D>,
    consecutive_outliers: usize,
}

impl SmoothingFilter {
    pub fn new(settings: FilterSettings) -> Self {
        let settings = FilterSettings {
            window: settings.window.max(1),
            ..settings
        };
        Self {
            settings,
            history: VecDeque::with_capacity(settings.window),
            consecutive_outliers: 0,
        }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Number of candidates currently in the window.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The current smoothed estimate, or `None` with an empty window.
    pub fn estimate(&self) -> Option<Transform3D> {
        let first = self.history.front()?;
        let n = self.history.len() as f64;

        let translation = self
            .history
            .iter()
            .fold(Vector3::zeros(), |acc, t| acc + t.translation)
            / n;

        // Quaternions q and -q are the same rotation; align every sample with
        // the first one before summing.
        let reference = first.rotation.coords;
        let sum = self.history.iter().fold(Vector4::zeros(), |acc, t| {
            let c = t.rotation.coords;
            if c.dot(&reference) < 0.0 { acc - c } else { acc + c }
        });
        let rotation = UnitQuaternion::new_normalize(Quaternion::from(sum));

        Some(Transform3D::new(translation, rotation))
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::new(FilterSettings::default())
    }
}

impl PoseFilter for SmoothingFilter {
    fn refine(&mut self, candidate: Transform3D) -> Transform3D {
        if let Some(current) = self.estimate() {
            let jump = (candidate.translation - current.translation).norm();
            if jump > self.settings.jump_threshold {
                self.consecutive_outliers += 1;
                if self.consecutive_outliers < self.settings.max_consecutive_outliers {
                    debug!(jump, outliers = self.consecutive_outliers, "rejecting space correction jump");
                    return current;
                }
                debug!(jump, "correction jump persisted; restarting filter history");
                self.history.clear();
            }
        }

        self.consecutive_outliers = 0;
        self.history.push_back(candidate);
        while self.history.len() > self.settings.window {
            self.history.pop_front();
        }
        self.estimate().unwrap_or(candidate)
    }

    fn invalidate_history(&mut self) {
        self.history.clear();
        self.consecutive_outliers = 0;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
