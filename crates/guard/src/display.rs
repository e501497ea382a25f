//! Display capability

use std::sync::atomic::{AtomicU64, Ordering};

use camera_capture::Frame;
use tracing::debug;

/// Renders frames. Expected to return quickly; the caller owns the frame.
pub trait FrameDisplay: Send + Sync {
    fn render(&self, frame: &Frame);
}

/// Display stand-in that counts rendered frames
#[derive(Debug, Default)]
pub struct LoggingDisplay {
    rendered: AtomicU64,
}

impl LoggingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::SeqCst)
    }
}

impl FrameDisplay for LoggingDisplay {
    fn render(&self, frame: &Frame) {
        let n = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
        if n % 100 == 0 {
            debug!(
                "Rendered {} frames (latest #{} {}x{})",
                n,
                frame.sequence(),
                frame.width(),
                frame.height()
            );
        }
    }
}
