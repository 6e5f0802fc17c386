//! Captured frame records handed from a camera data provider to a localizer.

use anchorloc_geometry::Transform3D;
use serde::{Deserialize, Serialize};

use crate::FailureReason;

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Intrinsics {
    pub principal_x: f64,
    pub principal_y: f64,
    pub focal_x: f64,
    pub focal_y: f64,
}

impl Intrinsics {
    pub fn new(principal_x: f64, principal_y: f64, focal_x: f64, focal_y: f64) -> Self {
        Self {
            principal_x,
            principal_y,
            focal_x,
            focal_y,
        }
    }

    /// `true` once a calibrated frame has delivered real values.
    pub fn is_calibrated(&self) -> bool {
        [self.principal_x, self.principal_y, self.focal_x, self.focal_y]
            .iter()
            .all(|v| v.is_finite())
            && self.focal_x > 0.0
            && self.focal_y > 0.0
    }
}

/// Number of lens distortion coefficients carried with a frame.
pub const DISTORTION_COEFFICIENTS: usize = 5;

/// Lens distortion coefficients.  Carried along for completeness; nothing
/// downstream consumes them yet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Distortion(pub [f64; DISTORTION_COEFFICIENTS]);

/// Calibration and device pose recorded at the instant a frame was captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    pub intrinsics: Intrinsics,
    #[serde(default)]
    pub distortion: Distortion,
    /// Device (camera) pose in tracking space at capture time.
    pub device_pose: Transform3D,
}

impl CaptureInfo {
    /// Check the dimension and calibration invariants.
    pub fn validate(&self) -> Result<(), FailureReason> {
        if self.width == 0 || self.height == 0 {
            return Err(FailureReason::NoFrameAvailable);
        }
        if !self.intrinsics.is_calibrated() {
            return Err(FailureReason::UncalibratedIntrinsics);
        }
        Ok(())
    }

    /// Pixel count of a tightly packed single-channel frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pixel storage
// ────────────────────────────────────────────────────────────────────────────

/// Owned, reusable single-channel pixel storage.
///
/// A provider keeps one of these around and refills it for every capture; it
/// is lent out inside a [`FrameSnapshot`] for a single attempt and handed back
/// afterwards so the allocation survives across frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Resize to exactly `len` bytes (reusing the allocation when possible)
    /// and return the writable contents.
    pub fn prepare(&mut self, len: usize) -> &mut [u8] {
        self.data.resize(len, 0);
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

/// Borrowed, read-only view of a frame's pixels, valid for one solver call.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

/// A single raw frame plus its calibration and device pose, valid for one
/// localization attempt.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub info: CaptureInfo,
    pub pixels: PixelBuffer,
}

impl FrameSnapshot {
    /// Check that the snapshot can be handed to a solver.
    pub fn validate(&self) -> Result<(), FailureReason> {
        if self.pixels.is_empty() || self.pixels.len() < self.info.pixel_count() {
            return Err(FailureReason::NoFrameAvailable);
        }
        self.info.validate()
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.info.width,
            height: self.info.height,
            pixels: self.pixels.as_slice(),
        }
    }
}

/// An encoded (e.g. PNG greyscale) frame for remote localization.
#[derive(Debug, Clone)]
pub struct CompressedFrame {
    pub info: CaptureInfo,
    pub encoded: Vec<u8>,
}

impl CompressedFrame {
    pub fn validate(&self) -> Result<(), FailureReason> {
        if self.encoded.is_empty() {
            return Err(FailureReason::NoFrameAvailable);
        }
        self.info.validate()
    }
}
