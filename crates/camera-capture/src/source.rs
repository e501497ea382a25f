//! Frame source capability

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CameraError, Frame};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity stamped on every frame a source lends out.
///
/// Not `Clone`: only the source holding it can mint frames that it will
/// later accept back.
#[derive(Debug)]
pub struct SourceId(u64);

impl SourceId {
    pub fn new() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

/// A camera driver that lends out frame buffers.
///
/// `acquire` transfers ownership of one buffer to the caller. The caller must
/// hand it back through `release` exactly once; since `release` takes the
/// frame by value, a second release or a use after release does not compile.
pub trait FrameSource: Send + Sync {
    /// Take the next filled buffer, or `CameraError::Busy` if none is free
    fn acquire(&self) -> Result<Frame, CameraError>;

    /// Return a buffer to the driver
    fn release(&self, frame: Frame);
}

impl<T: FrameSource + ?Sized> FrameSource for std::sync::Arc<T> {
    fn acquire(&self) -> Result<Frame, CameraError> {
        (**self).acquire()
    }

    fn release(&self, frame: Frame) {
        (**self).release(frame)
    }
}
