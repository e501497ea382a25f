//! Resource arbitration state machine
//!
//! The single writer of [`SystemMode`]. Capture and inference read the mode
//! through [`ModeWatch`] and keep away from the camera while it is not
//! `FaceDetection`; this manager then takes exactly one frame itself,
//! copies it into a [`SegmentedPhoto`], releases it and uploads the copy.

use std::sync::Arc;
use std::time::Duration;

use alerting::AlarmManager;
use camera_capture::FrameSource;
use metrics::{counter, gauge};
use photo_upload::{ChunkAllocator, PhotoConfig, PhotoUploader, SegmentedPhoto, UploadOutcome};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::ModeConfig;
use crate::liveness::{LivenessMonitor, Stage};
use crate::mode::{ModeWatch, SystemMode};

/// Edge reported by the inference stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceEvent {
    /// Smoothed distance crossed below the enter threshold
    TooClose { distance_cm: f32 },
    /// Smoothed distance rose above the exit threshold
    Safe { distance_cm: f32 },
    /// The face disappeared while the last edge was `TooClose`
    FaceLost,
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSnapshot {
    pub mode: SystemMode,
    pub upload_requested: bool,
    pub upload_in_progress: bool,
    pub photo_held: bool,
    pub alarm_active: bool,
    pub completed_uploads: u64,
    pub aborted_captures: u64,
    pub forced_resets: u64,
    pub last_outcome: Option<UploadOutcome>,
}

/// Collaborators the manager drives
pub struct ManagerParts<U> {
    pub source: Arc<dyn FrameSource>,
    pub allocator: Arc<dyn ChunkAllocator>,
    pub uploader: U,
    pub alarm: AlarmManager,
    pub liveness: Arc<dyn LivenessMonitor>,
}

pub struct ModeManager<U: PhotoUploader> {
    mode_tx: watch::Sender<SystemMode>,
    upload_requested: bool,
    upload_in_progress: bool,
    transition_at: Option<Instant>,
    captured_photo: Option<SegmentedPhoto>,
    alarm: AlarmManager,
    uploader: U,
    source: Arc<dyn FrameSource>,
    allocator: Arc<dyn ChunkAllocator>,
    liveness: Arc<dyn LivenessMonitor>,
    photo_config: PhotoConfig,
    settle_delay: Duration,
    status_interval: Duration,
    last_status_log: Option<Instant>,
    completed_uploads: u64,
    aborted_captures: u64,
    forced_resets: u64,
    last_outcome: Option<UploadOutcome>,
}

impl<U: PhotoUploader> ModeManager<U> {
    pub fn new(parts: ManagerParts<U>, config: &ModeConfig, photo_config: PhotoConfig) -> Self {
        let (mode_tx, _) = watch::channel(SystemMode::FaceDetection);
        gauge!("guard_mode").set(SystemMode::FaceDetection.code() as f64);
        Self {
            mode_tx,
            upload_requested: false,
            upload_in_progress: false,
            transition_at: None,
            captured_photo: None,
            alarm: parts.alarm,
            uploader: parts.uploader,
            source: parts.source,
            allocator: parts.allocator,
            liveness: parts.liveness,
            photo_config,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            status_interval: Duration::from_millis(config.status_log_interval_ms),
            last_status_log: None,
            completed_uploads: 0,
            aborted_captures: 0,
            forced_resets: 0,
            last_outcome: None,
        }
    }

    /// New read-only view of the mode
    pub fn subscribe(&self) -> ModeWatch {
        ModeWatch::new(self.mode_tx.subscribe())
    }

    pub fn mode(&self) -> SystemMode {
        *self.mode_tx.borrow()
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        ModeSnapshot {
            mode: self.mode(),
            upload_requested: self.upload_requested,
            upload_in_progress: self.upload_in_progress,
            photo_held: self.captured_photo.is_some(),
            alarm_active: self.alarm.is_active(),
            completed_uploads: self.completed_uploads,
            aborted_captures: self.aborted_captures,
            forced_resets: self.forced_resets,
            last_outcome: self.last_outcome.clone(),
        }
    }

    fn set_mode(&mut self, mode: SystemMode) {
        let previous = self.mode_tx.send_replace(mode);
        if previous != mode {
            info!("Mode {:?} -> {:?}", previous, mode);
            counter!("guard_mode_transitions_total", "to" => mode.label()).increment(1);
            gauge!("guard_mode").set(mode.code() as f64);
        }
    }

    /// React to a distance edge from the inference stage
    pub fn handle_event(&mut self, event: DistanceEvent, now: Instant) {
        match event {
            DistanceEvent::TooClose { distance_cm } => {
                warn!("Face too close: {:.1} cm", distance_cm);
                self.alarm.raise(now);
                self.request_photo_upload(now);
            }
            DistanceEvent::Safe { distance_cm } => {
                info!("Face back at safe distance: {:.1} cm", distance_cm);
                self.alarm.clear();
            }
            DistanceEvent::FaceLost => {
                info!("Face lost while too close; silencing alarm");
                self.alarm.clear();
            }
        }
    }

    /// Start a photo cycle unless one is already requested or running.
    /// Returns whether a new cycle was started.
    pub fn request_photo_upload(&mut self, now: Instant) -> bool {
        if self.upload_requested || self.upload_in_progress || self.mode() != SystemMode::FaceDetection
        {
            info!(
                "Photo upload already in flight ({:?}); request ignored",
                self.mode()
            );
            return false;
        }
        self.upload_requested = true;
        self.transition_at = Some(now);
        self.set_mode(SystemMode::Transitioning);
        info!("Photo upload requested; pausing face detection");
        true
    }

    /// Advance the state machine. Only blocks while an upload runs.
    pub async fn tick(&mut self, now: Instant) {
        self.alarm.poll(now);

        if let Some(problem) = self.inconsistency() {
            self.force_reset(problem);
            return;
        }

        match self.mode() {
            SystemMode::FaceDetection => {}
            SystemMode::Transitioning => {
                let settled = self
                    .transition_at
                    .map(|at| now.saturating_duration_since(at) >= self.settle_delay)
                    .unwrap_or(false);
                if settled {
                    self.capture_photo();
                }
            }
            SystemMode::PhotoUpload => self.run_upload().await,
        }

        self.log_status(now);
    }

    fn inconsistency(&self) -> Option<&'static str> {
        match self.mode() {
            SystemMode::FaceDetection
                if self.upload_in_progress || self.captured_photo.is_some() =>
            {
                Some("upload state left over in FaceDetection")
            }
            SystemMode::Transitioning if !self.upload_requested || self.transition_at.is_none() => {
                Some("Transitioning without a pending request")
            }
            SystemMode::PhotoUpload
                if !self.upload_in_progress || self.captured_photo.is_none() =>
            {
                Some("PhotoUpload without a captured photo")
            }
            _ => None,
        }
    }

    /// Return to the safe default after corrupt bookkeeping
    fn force_reset(&mut self, problem: &str) {
        error!("Inconsistent mode state: {}; forcing FaceDetection", problem);
        if let Some(photo) = self.captured_photo.take() {
            photo.release();
        }
        self.upload_requested = false;
        self.upload_in_progress = false;
        self.transition_at = None;
        self.forced_resets += 1;
        counter!("guard_forced_resets_total").increment(1);
        self.set_mode(SystemMode::FaceDetection);
    }

    /// Take one frame straight from the source and keep only a copy
    fn capture_photo(&mut self) {
        let frame = match self.source.acquire() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Photo capture failed: {}; resuming detection", e);
                self.abort_cycle();
                return;
            }
        };

        let photo = SegmentedPhoto::create(&frame, self.allocator.as_ref(), &self.photo_config);
        self.source.release(frame);

        match photo {
            Ok(photo) => {
                self.captured_photo = Some(photo);
                self.upload_in_progress = true;
                self.upload_requested = false;
                self.set_mode(SystemMode::PhotoUpload);
            }
            Err(e) => {
                warn!("Photo buffer creation failed: {}; resuming detection", e);
                self.abort_cycle();
            }
        }
    }

    fn abort_cycle(&mut self) {
        self.upload_requested = false;
        self.upload_in_progress = false;
        self.transition_at = None;
        self.aborted_captures += 1;
        counter!("guard_photo_captures_aborted_total").increment(1);
        self.set_mode(SystemMode::FaceDetection);
    }

    async fn run_upload(&mut self) {
        let Some(photo) = self.captured_photo.take() else {
            self.force_reset("PhotoUpload without a captured photo");
            return;
        };

        self.liveness.deregister(Stage::Control);
        let outcome = {
            // Keep servicing the alarm deadline while the upload runs
            let upload = self.uploader.upload(&photo);
            tokio::pin!(upload);
            loop {
                let deadline = self.alarm.timer().deadline();
                tokio::select! {
                    outcome = &mut upload => break outcome,
                    _ = sleep_until(deadline) => {
                        self.alarm.poll(Instant::now());
                    }
                }
            }
        };
        self.liveness.register(Stage::Control);

        photo.release();
        self.upload_in_progress = false;
        self.upload_requested = false;
        self.transition_at = None;
        self.alarm.clear();
        self.completed_uploads += 1;

        let label = match &outcome {
            UploadOutcome::Delivered { .. } => "delivered",
            UploadOutcome::Rejected { .. } => "rejected",
            UploadOutcome::Failed(_) => "failed",
        };
        counter!("guard_uploads_total", "outcome" => label).increment(1);
        info!("Photo upload cycle finished: {}", label);
        self.last_outcome = Some(outcome);

        self.set_mode(SystemMode::FaceDetection);
    }

    fn log_status(&mut self, now: Instant) {
        let mode = self.mode();
        if mode == SystemMode::FaceDetection {
            self.last_status_log = None;
            return;
        }
        let due = self
            .last_status_log
            .map(|at| now.saturating_duration_since(at) >= self.status_interval)
            .unwrap_or(true);
        if due {
            info!(
                "Status: mode={:?} upload_requested={} upload_in_progress={} detection_paused={}",
                mode,
                self.upload_requested,
                self.upload_in_progress,
                mode.is_paused()
            );
            self.last_status_log = Some(now);
        }
    }

    /// Silence the alarm without touching the mode (shutdown path)
    pub fn silence(&mut self) {
        self.alarm.clear();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
