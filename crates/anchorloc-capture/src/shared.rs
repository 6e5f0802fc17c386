//! Clonable provider handle.

use std::sync::Arc;

use anchorloc_types::{CompressedFrame, FrameSnapshot, PixelBuffer};
use parking_lot::{Mutex, MutexGuard};

use crate::provider::CameraDataProvider;

/// A provider behind `Arc<Mutex<_>>`.  One clone goes to the localizer, the
/// others stay with whatever feeds frames in.
pub struct SharedProvider<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> Clone for SharedProvider<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: CameraDataProvider> SharedProvider<P> {
    pub fn new(provider: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(provider)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.inner.lock()
    }
}

impl<P: CameraDataProvider> CameraDataProvider for SharedProvider<P> {
    fn try_acquire_latest_frame(&mut self) -> Option<FrameSnapshot> {
        self.inner.lock().try_acquire_latest_frame()
    }

    fn try_acquire_compressed_frame(&mut self) -> Option<CompressedFrame> {
        self.inner.lock().try_acquire_compressed_frame()
    }

    fn release(&mut self, pixels: PixelBuffer) {
        self.inner.lock().release(pixels)
    }
}
