//! Pipeline assembly
//!
//! Wires capture, inference and control over two bounded frame channels,
//! starts the watchdog and hands back a [`PipelineHandle`] for commands and
//! orderly shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alerting::{AlarmManager, AlarmOutput};
use camera_capture::FrameSource;
use face_distance::{DistanceEstimator, FaceDetector};
use photo_upload::{PhotoUploader, TieredAllocator};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::capture::CaptureStage;
use crate::config::GuardConfig;
use crate::control::ControlLoop;
use crate::display::FrameDisplay;
use crate::inference::{EdgeTracker, EstimatorCommand, FrameSkipper, InferenceStage};
use crate::liveness::{spawn_watchdog, LivenessMonitor, Stage, Watchdog};
use crate::manager::{ManagerParts, ModeManager, ModeSnapshot};
use crate::mode::{ModeWatch, SystemMode};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::GuardError;

/// Hardware and model capabilities the pipeline runs on
pub struct PipelineParts<U> {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn FaceDetector>,
    pub estimator: DistanceEstimator,
    pub uploader: U,
    pub alarm: Arc<dyn AlarmOutput>,
    pub display: Arc<dyn FrameDisplay>,
}

/// Final state after shutdown
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub mode: ModeSnapshot,
    pub stats: StatsSnapshot,
    /// Stage that tripped the watchdog, if any
    pub stalled: Option<Stage>,
}

pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
    watchdog: Arc<Watchdog>,
    stats: Arc<PipelineStats>,
    gate: ModeWatch,
    commands: mpsc::Sender<EstimatorCommand>,
    capture: JoinHandle<()>,
    inference: JoinHandle<()>,
    control: JoinHandle<ModeSnapshot>,
    watchdog_task: JoinHandle<()>,
}

/// Spawn every stage on the current runtime
pub fn spawn_pipeline<U>(parts: PipelineParts<U>, config: &GuardConfig) -> PipelineHandle
where
    U: PhotoUploader + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(Notify::new());
    let stats = Arc::new(PipelineStats::new());
    let watchdog = Arc::new(Watchdog::new(&config.liveness));
    let liveness: Arc<dyn LivenessMonitor> = watchdog.clone();
    let p = &config.pipeline;

    let (tx_a, rx_a) = mpsc::channel(p.channel_capacity);
    let (tx_b, rx_b) = mpsc::channel(p.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(p.event_capacity);
    let (command_tx, command_rx) = mpsc::channel(8);

    let allocator = Arc::new(TieredAllocator::new(
        config.photo.external_budget_bytes,
        config.photo.internal_budget_bytes,
    ));
    let manager = ModeManager::new(
        ManagerParts {
            source: parts.source.clone(),
            allocator,
            uploader: parts.uploader,
            alarm: AlarmManager::new(&config.alarm, parts.alarm),
            liveness: liveness.clone(),
        },
        &config.mode,
        config.photo.clone(),
    );
    let gate = manager.subscribe();

    let capture = CaptureStage {
        source: parts.source.clone(),
        tx: tx_a,
        gate: gate.clone(),
        liveness: liveness.clone(),
        stats: stats.clone(),
        shutdown: shutdown.clone(),
        frame_interval: Duration::from_millis(1000 / u64::from(config.camera.fps.max(1))),
        gate_poll: Duration::from_millis(p.gate_poll_ms),
        busy_backoff: Duration::from_millis(p.busy_backoff_ms),
    };

    let inference = InferenceStage {
        rx: rx_a,
        tx: tx_b,
        events: event_tx,
        commands: command_rx,
        detector: parts.detector,
        estimator: parts.estimator,
        source: parts.source.clone(),
        gate: gate.clone(),
        liveness: liveness.clone(),
        stats: stats.clone(),
        shutdown: shutdown.clone(),
        skipper: FrameSkipper::new(p.frame_skip),
        edges: EdgeTracker::new(),
        divert_poll: Duration::from_millis(p.divert_poll_ms),
        recv_wait: Duration::from_millis(p.inference_wait_ms),
    };

    let control = ControlLoop {
        manager,
        frames: rx_b,
        events: event_rx,
        display: parts.display,
        source: parts.source,
        liveness,
        stats: stats.clone(),
        shutdown: shutdown.clone(),
        display_wait: Duration::from_millis(p.display_wait_ms),
    };

    info!(
        "Starting pipeline: {}x{} @ {} fps, channel capacity {}, detecting every {} frame(s)",
        config.camera.width, config.camera.height, config.camera.fps, p.channel_capacity, p.frame_skip
    );

    PipelineHandle {
        capture: tokio::spawn(capture.run()),
        inference: tokio::spawn(inference.run()),
        control: tokio::spawn(control.run()),
        watchdog_task: spawn_watchdog(
            watchdog.clone(),
            &config.liveness,
            shutdown.clone(),
            stop.clone(),
        ),
        shutdown,
        stop,
        watchdog,
        stats,
        gate,
        commands: command_tx,
    }
}

impl PipelineHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn mode(&self) -> SystemMode {
        self.gate.current()
    }

    /// Read-only view of the mode for outside observers
    pub fn gate(&self) -> ModeWatch {
        self.gate.clone()
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Queue a request for the inference stage
    pub async fn send_command(&self, command: EstimatorCommand) -> Result<(), GuardError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GuardError::Task("inference stage has stopped".to_string()))
    }

    /// Resolve once the watchdog has requested shutdown
    pub async fn stopped(&self) {
        let notified = self.stop.notified();
        if self.is_stopping() {
            return;
        }
        notified.await;
    }

    /// Stop every stage, release all in-flight frames and report
    pub async fn shutdown(self) -> Result<PipelineReport, GuardError> {
        info!("Shutting down pipeline");
        self.shutdown.store(true, Ordering::SeqCst);

        let join = |name: &str, e: tokio::task::JoinError| {
            GuardError::Task(format!("{} task failed: {}", name, e))
        };
        self.capture.await.map_err(|e| join("capture", e))?;
        self.inference.await.map_err(|e| join("inference", e))?;
        let mode = self.control.await.map_err(|e| join("control", e))?;
        self.watchdog_task.await.map_err(|e| join("watchdog", e))?;

        let report = PipelineReport {
            mode,
            stats: self.stats.snapshot(),
            stalled: self.watchdog.reason(),
        };
        info!(
            "Pipeline stopped: captured={} released={} uploads={}",
            report.stats.captured, report.stats.released, report.mode.completed_uploads
        );
        Ok(report)
    }
}
