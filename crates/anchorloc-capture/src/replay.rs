//! [`ReplayProvider`] – in-memory camera data provider.
//!
//! Fed with pre-recorded luma planes or already-encoded images, it behaves
//! like a live camera from the localizer's point of view: only the most
//! recent submission is kept, each submission is delivered at most once, and
//! the pixel buffer lent out with a snapshot is recycled when it comes back
//! through [`CameraDataProvider::release`].

use anchorloc_types::{CaptureInfo, CompressedFrame, FrameSnapshot, PixelBuffer};
use tracing::{debug, warn};

use crate::plane::{LumaPlane, copy_unpadded};
use crate::provider::CameraDataProvider;

struct RawFrame {
    info: CaptureInfo,
    data: Vec<u8>,
    stride: u32,
}

/// Camera data provider backed by submitted frames.
#[derive(Default)]
pub struct ReplayProvider {
    raw: Option<RawFrame>,
    encoded: Option<CompressedFrame>,
    spare: Option<PixelBuffer>,
    invert_vertically: bool,
    allocations: usize,
}

impl ReplayProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip rows when copying planes (for drivers that deliver bottom-up
    /// images).
    pub fn with_vertical_flip(mut self, invert: bool) -> Self {
        self.invert_vertically = invert;
        self
    }

    /// Replace the latest raw frame.  `stride` is the row pitch of `data`.
    pub fn submit_plane(&mut self, info: CaptureInfo, data: Vec<u8>, stride: u32) {
        self.raw = Some(RawFrame { info, data, stride });
    }

    /// Replace the latest encoded frame.
    pub fn submit_encoded(&mut self, info: CaptureInfo, encoded: Vec<u8>) {
        self.encoded = Some(CompressedFrame { info, encoded });
    }

    /// Number of pixel buffers allocated so far.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    fn take_buffer(&mut self, len: usize) -> PixelBuffer {
        match self.spare.take() {
            Some(buffer) => buffer,
            None => {
                self.allocations += 1;
                debug!(len, "allocating pixel buffer");
                PixelBuffer::with_capacity(len)
            }
        }
    }
}

impl CameraDataProvider for ReplayProvider {
    fn try_acquire_latest_frame(&mut self) -> Option<FrameSnapshot> {
        let frame = self.raw.take()?;
        let mut pixels = self.take_buffer(frame.info.pixel_count());
        let plane = LumaPlane {
            data: &frame.data,
            width: frame.info.width,
            height: frame.info.height,
            stride: frame.stride,
        };
        if let Err(e) = copy_unpadded(&plane, self.invert_vertically, &mut pixels) {
            warn!(error = %e, "dropping malformed frame");
            self.spare = Some(pixels);
            return None;
        }
        Some(FrameSnapshot {
            info: frame.info,
            pixels,
        })
    }

    fn try_acquire_compressed_frame(&mut self) -> Option<CompressedFrame> {
        self.encoded.take()
    }

    fn release(&mut self, pixels: PixelBuffer) {
        self.spare = Some(pixels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorloc_geometry::Transform3D;
    use anchorloc_types::{Distortion, Intrinsics};

    fn info(width: u32, height: u32) -> CaptureInfo {
        CaptureInfo {
            width,
            height,
            intrinsics: Intrinsics::new(1.0, 1.0, 2.0, 2.0),
            distortion: Distortion::default(),
            device_pose: Transform3D::identity(),
        }
    }

    #[test]
    fn empty_provider_returns_none() {
        let mut p = ReplayProvider::new();
        assert!(p.try_acquire_latest_frame().is_none());
        assert!(p.try_acquire_compressed_frame().is_none());
    }

    #[test]
    fn frame_is_delivered_once() {
        let mut p = ReplayProvider::new();
        p.submit_plane(info(2, 2), vec![1, 2, 0, 3, 4], 3);
        let snap = p.try_acquire_latest_frame().expect("fresh frame");
        assert_eq!(snap.pixels.as_slice(), &[1, 2, 3, 4]);
        assert!(p.try_acquire_latest_frame().is_none(), "frame must not be replayed");
    }

    #[test]
    fn newer_submission_replaces_older() {
        let mut p = ReplayProvider::new();
        p.submit_plane(info(1, 1), vec![1], 1);
        p.submit_plane(info(1, 1), vec![9], 1);
        let snap = p.try_acquire_latest_frame().unwrap();
        assert_eq!(snap.pixels.as_slice(), &[9]);
    }

    #[test]
    fn released_buffer_is_reused() {
        let mut p = ReplayProvider::new();
        p.submit_plane(info(2, 1), vec![1, 2], 2);
        let first = p.try_acquire_latest_frame().unwrap();
        p.release(first.pixels);

        p.submit_plane(info(2, 1), vec![3, 4], 2);
        let second = p.try_acquire_latest_frame().unwrap();
        assert_eq!(second.pixels.as_slice(), &[3, 4]);
        assert_eq!(p.allocations(), 1);
    }

    #[test]
    fn unreleased_buffer_forces_allocation() {
        let mut p = ReplayProvider::new();
        p.submit_plane(info(1, 1), vec![1], 1);
        let _held = p.try_acquire_latest_frame().unwrap();
        p.submit_plane(info(1, 1), vec![2], 1);
        let _second = p.try_acquire_latest_frame().unwrap();
        assert_eq!(p.allocations(), 2);
    }

    #[test]
    fn vertical_flip_is_applied() {
        let mut p = ReplayProvider::new().with_vertical_flip(true);
        p.submit_plane(info(1, 3), vec![1, 2, 3], 1);
        let snap = p.try_acquire_latest_frame().unwrap();
        assert_eq!(snap.pixels.as_slice(), &[3, 2, 1]);
    }

    #[test]
    fn malformed_plane_is_dropped() {
        let mut p = ReplayProvider::new();
        p.submit_plane(info(4, 4), vec![0; 3], 4);
        assert!(p.try_acquire_latest_frame().is_none());
    }

    #[test]
    fn encoded_frame_is_delivered_once() {
        let mut p = ReplayProvider::new();
        p.submit_encoded(info(2, 2), vec![0x89, b'P', b'N', b'G']);
        let frame = p.try_acquire_compressed_frame().unwrap();
        assert_eq!(frame.encoded.len(), 4);
        assert!(p.try_acquire_compressed_frame().is_none());
    }
}
