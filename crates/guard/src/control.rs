//! Control loop
//!
//! Drives the mode manager and the display. Each pass applies pending
//! distance edges, ticks the manager and waits a bounded time for a frame
//! from channel B. Every frame received here is released exactly once,
//! rendered or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camera_capture::{Frame, FrameSource};
use photo_upload::PhotoUploader;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

use crate::display::FrameDisplay;
use crate::liveness::{LivenessMonitor, Stage};
use crate::manager::{DistanceEvent, ModeManager, ModeSnapshot};
use crate::stats::PipelineStats;

pub struct ControlLoop<U: PhotoUploader> {
    pub(crate) manager: ModeManager<U>,
    pub(crate) frames: mpsc::Receiver<Frame>,
    pub(crate) events: mpsc::Receiver<DistanceEvent>,
    pub(crate) display: Arc<dyn FrameDisplay>,
    pub(crate) source: Arc<dyn FrameSource>,
    pub(crate) liveness: Arc<dyn LivenessMonitor>,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) display_wait: Duration,
}

impl<U: PhotoUploader> ControlLoop<U> {
    /// Run until shutdown; returns the manager's final state
    pub async fn run(mut self) -> ModeSnapshot {
        info!("Control loop started");
        self.liveness.register(Stage::Control);

        while !self.shutdown.load(Ordering::SeqCst) {
            self.liveness.heartbeat(Stage::Control);

            while let Ok(event) = self.events.try_recv() {
                self.manager.handle_event(event, Instant::now());
            }
            self.manager.tick(Instant::now()).await;

            match tokio::time::timeout(self.display_wait, self.frames.recv()).await {
                Ok(Some(frame)) => self.show(frame),
                Ok(None) => break,
                Err(_) => {}
            }
        }

        self.events.close();
        self.frames.close();
        while let Some(frame) = self.frames.recv().await {
            self.source.release(frame);
            self.stats.released();
        }

        self.manager.silence();
        self.liveness.deregister(Stage::Control);
        info!("Control loop stopped");
        self.manager.snapshot()
    }

    fn show(&self, frame: Frame) {
        if self.manager.mode().display_allowed() {
            self.display.render(&frame);
            self.stats.rendered();
        } else {
            self.stats.discarded();
        }
        self.source.release(frame);
        self.stats.released();
    }
}
