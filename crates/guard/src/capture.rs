//! Capture stage
//!
//! Pulls frames from the source into channel A while the gate is open.
//! While it is closed the source is not touched at all, so the mode manager
//! can take the photo frame itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camera_capture::{CameraError, Frame, FrameSource};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::liveness::{LivenessMonitor, Stage};
use crate::mode::ModeWatch;
use crate::stats::PipelineStats;

pub struct CaptureStage {
    pub(crate) source: Arc<dyn FrameSource>,
    pub(crate) tx: mpsc::Sender<Frame>,
    pub(crate) gate: ModeWatch,
    pub(crate) liveness: Arc<dyn LivenessMonitor>,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) frame_interval: Duration,
    pub(crate) gate_poll: Duration,
    pub(crate) busy_backoff: Duration,
}

impl CaptureStage {
    pub async fn run(mut self) {
        info!("Capture stage started");
        self.liveness.register(Stage::Capture);
        let mut registered = true;

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.shutdown.load(Ordering::SeqCst) {
            if !self.gate.detection_allowed() {
                if registered {
                    self.liveness.deregister(Stage::Capture);
                    registered = false;
                    debug!("Capture paused");
                }
                self.gate.wait_for_detection(self.gate_poll).await;
                continue;
            }
            if !registered {
                self.liveness.register(Stage::Capture);
                registered = true;
                debug!("Capture resumed");
            }
            self.liveness.heartbeat(Stage::Capture);

            ticker.tick().await;
            if !self.gate.detection_allowed() {
                continue;
            }
            match self.source.acquire() {
                Ok(frame) => {
                    self.stats.captured();
                    if let Err(mpsc::error::SendError(frame)) = self.tx.send(frame).await {
                        // Inference is gone; nothing will consume further frames
                        self.source.release(frame);
                        self.stats.released();
                        break;
                    }
                }
                Err(CameraError::Busy) => {
                    self.stats.busy();
                    tokio::time::sleep(self.busy_backoff).await;
                }
                Err(e) => {
                    warn!("Frame acquisition failed: {}", e);
                    tokio::time::sleep(self.busy_backoff).await;
                }
            }
        }

        self.liveness.deregister(Stage::Capture);
        info!("Capture stage stopped");
    }
}
