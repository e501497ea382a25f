//! Pipeline counters
//!
//! Every frame the capture stage acquires ends in exactly one release, via
//! the display, a closed channel, or the shutdown drain; `released` is
//! counted at each of those points.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

#[derive(Debug, Default)]
pub struct PipelineStats {
    captured: AtomicU64,
    busy: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    diverted: AtomicU64,
    rendered: AtomicU64,
    discarded: AtomicU64,
    released: AtomicU64,
}

/// Copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub busy: u64,
    /// Frames run through the detector
    pub processed: u64,
    /// Frames forwarded untouched by the frame-skip policy
    pub skipped: u64,
    /// Frames forwarded untouched while detection was paused
    pub diverted: u64,
    pub rendered: u64,
    /// Frames dropped by the display gate without rendering
    pub discarded: u64,
    pub released: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::SeqCst),
            busy: self.busy.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            diverted: self.diverted.load(Ordering::SeqCst),
            rendered: self.rendered.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn captured(&self) {
        self.captured.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_captured_total").increment(1);
    }

    pub(crate) fn busy(&self) {
        self.busy.fetch_add(1, Ordering::SeqCst);
        counter!("guard_source_busy_total").increment(1);
    }

    pub(crate) fn processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_processed_total").increment(1);
    }

    pub(crate) fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_skipped_total").increment(1);
    }

    pub(crate) fn diverted(&self) {
        self.diverted.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_diverted_total").increment(1);
    }

    pub(crate) fn rendered(&self) {
        self.rendered.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_rendered_total").increment(1);
    }

    pub(crate) fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_discarded_total").increment(1);
    }

    pub(crate) fn released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        counter!("guard_frames_released_total").increment(1);
    }
}
