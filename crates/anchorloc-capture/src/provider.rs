//! Generic `CameraDataProvider` trait for frame sources.

use anchorloc_types::{CompressedFrame, FrameSnapshot, PixelBuffer};

/// Delivers the single most recent captured frame to a localizer.
///
/// Both acquisition methods are non-blocking and return `None` rather than
/// an error when nothing fresh is available.  A provider exposes only its
/// latest frame, so a localizer never runs two attempts against the same
/// provider at once.
pub trait CameraDataProvider: Send {
    /// Take the latest raw frame, with its pixels copied into a buffer owned
    /// by the returned snapshot.
    fn try_acquire_latest_frame(&mut self) -> Option<FrameSnapshot>;

    /// Take the latest frame as encoded image bytes (greyscale PNG for the
    /// remote localizers).
    fn try_acquire_compressed_frame(&mut self) -> Option<CompressedFrame>;

    /// Hand a pixel buffer back once the solver is done with it, so the
    /// allocation can be reused for the next capture.
    fn release(&mut self, pixels: PixelBuffer) {
        drop(pixels);
    }
}

impl<P: CameraDataProvider + ?Sized> CameraDataProvider for Box<P> {
    fn try_acquire_latest_frame(&mut self) -> Option<FrameSnapshot> {
        (**self).try_acquire_latest_frame()
    }

    fn try_acquire_compressed_frame(&mut self) -> Option<CompressedFrame> {
        (**self).try_acquire_compressed_frame()
    }

    fn release(&mut self, pixels: PixelBuffer) {
        (**self).release(pixels)
    }
}
