//! Inference stage
//!
//! Moves frames from channel A to channel B. While detection is allowed it
//! runs the detector and the distance estimator on one frame in every
//! `frame_skip`; while paused it forwards frames untouched so none of them
//! leaks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camera_capture::{Frame, FrameSource};
use face_distance::{DistanceEstimator, DistanceState, EstimatorStatus, Face, FaceDetector};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::liveness::{LivenessMonitor, Stage};
use crate::manager::DistanceEvent;
use crate::mode::ModeWatch;
use crate::stats::PipelineStats;

/// Runtime requests for the estimator, which the inference stage owns
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimatorCommand {
    StartCalibration,
    ResetCalibration,
    SetThresholds { enter_cm: f32, exit_cm: f32 },
}

/// Lets one frame in every `every` through to the detector
#[derive(Debug, Clone)]
pub struct FrameSkipper {
    every: u32,
    position: u32,
}

impl FrameSkipper {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            position: 0,
        }
    }

    pub fn should_process(&mut self) -> bool {
        let process = self.position == 0;
        self.position = (self.position + 1) % self.every;
        process
    }
}

/// Turns per-frame states into edges for the mode manager
#[derive(Debug, Clone, Default)]
pub struct EdgeTracker {
    last: DistanceState,
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> DistanceState {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = DistanceState::Safe;
    }

    /// Adopt the estimator's state without reporting an edge
    pub fn sync(&mut self, state: DistanceState) {
        self.last = state;
    }

    pub fn observe(&mut self, status: &EstimatorStatus) -> Option<DistanceEvent> {
        match status {
            EstimatorStatus::Measured(reading) if reading.state != self.last => {
                self.last = reading.state;
                Some(match reading.state {
                    DistanceState::TooClose => DistanceEvent::TooClose {
                        distance_cm: reading.smoothed_cm,
                    },
                    DistanceState::Safe => DistanceEvent::Safe {
                        distance_cm: reading.smoothed_cm,
                    },
                })
            }
            EstimatorStatus::NoFace if self.last == DistanceState::TooClose => {
                self.last = DistanceState::Safe;
                Some(DistanceEvent::FaceLost)
            }
            _ => None,
        }
    }
}

pub struct InferenceStage {
    pub(crate) rx: mpsc::Receiver<Frame>,
    pub(crate) tx: mpsc::Sender<Frame>,
    pub(crate) events: mpsc::Sender<DistanceEvent>,
    pub(crate) commands: mpsc::Receiver<EstimatorCommand>,
    pub(crate) detector: Arc<dyn FaceDetector>,
    pub(crate) estimator: DistanceEstimator,
    pub(crate) source: Arc<dyn FrameSource>,
    pub(crate) gate: ModeWatch,
    pub(crate) liveness: Arc<dyn LivenessMonitor>,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) skipper: FrameSkipper,
    pub(crate) edges: EdgeTracker,
    pub(crate) divert_poll: Duration,
    pub(crate) recv_wait: Duration,
}

impl InferenceStage {
    pub async fn run(mut self) {
        info!("Inference stage started");
        self.liveness.register(Stage::Inference);
        let mut registered = true;

        while !self.shutdown.load(Ordering::SeqCst) {
            self.apply_commands();

            if !self.gate.detection_allowed() {
                if registered {
                    self.liveness.deregister(Stage::Inference);
                    registered = false;
                    debug!("Inference paused; diverting frames");
                }
                match tokio::time::timeout(self.divert_poll, self.rx.recv()).await {
                    Ok(Some(frame)) => {
                        self.stats.diverted();
                        if !self.forward(frame).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {}
                }
                continue;
            }

            if !registered {
                self.liveness.register(Stage::Inference);
                registered = true;
                debug!("Inference resumed");
            }
            self.liveness.heartbeat(Stage::Inference);

            let frame = match tokio::time::timeout(self.recv_wait, self.rx.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => continue,
            };

            let frame = if self.skipper.should_process() {
                let Some((frame, faces)) = self.detect(frame).await else {
                    continue;
                };
                if let Some(faces) = faces {
                    self.process(&faces);
                }
                self.stats.processed();
                frame
            } else {
                self.stats.skipped();
                frame
            };

            if !self.forward(frame).await {
                break;
            }
        }

        self.drain().await;
        self.liveness.deregister(Stage::Inference);
        info!("Inference stage stopped");
    }

    /// Hand a frame to the display channel; release it if nobody listens
    async fn forward(&self, frame: Frame) -> bool {
        match self.tx.send(frame).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(frame)) => {
                self.source.release(frame);
                self.stats.released();
                false
            }
        }
    }

    async fn drain(&mut self) {
        self.rx.close();
        while let Some(frame) = self.rx.recv().await {
            self.source.release(frame);
            self.stats.released();
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EstimatorCommand::StartCalibration => self.estimator.start_calibration(),
                EstimatorCommand::ResetCalibration => {
                    if let Err(e) = self.estimator.reset_calibration() {
                        warn!("Calibration reset failed: {}", e);
                    }
                }
                EstimatorCommand::SetThresholds { enter_cm, exit_cm } => {
                    if let Err(e) = self.estimator.set_thresholds(enter_cm, exit_cm) {
                        warn!("Threshold update rejected: {}", e);
                    }
                }
            }
            // Only a measured transition is an edge
            self.edges.sync(self.estimator.current_state());
        }
    }

    /// Run the detector on the blocking pool. The frame comes back with the
    /// faces, or with `None` if detection failed.
    async fn detect(&self, frame: Frame) -> Option<(Frame, Option<Vec<Face>>)> {
        let detector = self.detector.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&frame)));
            (frame, result)
        });

        match task.await {
            Ok((frame, Ok(Ok(faces)))) => Some((frame, Some(faces))),
            Ok((frame, Ok(Err(e)))) => {
                warn!("Face detection failed on frame #{}: {}", frame.sequence(), e);
                Some((frame, None))
            }
            Ok((frame, Err(_))) => {
                error!("Face detector panicked on frame #{}", frame.sequence());
                Some((frame, None))
            }
            Err(e) => {
                error!("Detection task lost its frame: {}", e);
                None
            }
        }
    }

    fn process(&mut self, faces: &[Face]) {
        if self.estimator.is_calibrating() {
            self.calibrate(faces);
            return;
        }

        let status = self.estimator.process_faces(faces);
        if let Some(event) = self.edges.observe(&status) {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!("Event queue full; dropping {:?}", event);
                }
                Err(mpsc::error::TrySendError::Closed(event)) => {
                    debug!("Control loop gone; dropping {:?}", event);
                }
            }
        }
    }

    fn calibrate(&mut self, faces: &[Face]) {
        let Some(keypoints) = faces.first().and_then(|f| f.keypoints.as_ref()) else {
            return;
        };
        if !self.estimator.add_calibration_frame(keypoints) {
            return;
        }
        match self.estimator.finish_calibration() {
            Ok(k) => {
                info!("Calibration finished (k={:.2}); distance monitoring active", k);
                self.edges.reset();
            }
            Err(e) => warn!("Calibration could not be saved: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use face_distance::{DistanceReading, EstimatorStatus};

    fn measured(state: DistanceState, smoothed_cm: f32) -> EstimatorStatus {
        EstimatorStatus::Measured(DistanceReading {
            state,
            smoothed_cm,
            raw_cm: smoothed_cm,
            eye_distance_px: 50.0,
            yaw_ratio: 1.0,
            correction: 1.0,
        })
    }

    #[test]
    fn test_skipper_processes_one_in_four() {
        let mut skipper = FrameSkipper::new(4);
        let pattern: Vec<bool> = (0..8).map(|_| skipper.should_process()).collect();
        assert_eq!(
            pattern,
            vec![true, false, false, false, true, false, false, false]
        );
        let mut every = FrameSkipper::new(1);
        assert!((0..5).all(|_| every.should_process()));
    }

    #[test]
    fn test_edges_fire_on_change_only() {
        let mut edges = EdgeTracker::new();
        assert_eq!(edges.observe(&measured(DistanceState::Safe, 50.0)), None);
        assert_eq!(
            edges.observe(&measured(DistanceState::TooClose, 44.0)),
            Some(DistanceEvent::TooClose { distance_cm: 44.0 })
        );
        assert_eq!(edges.observe(&measured(DistanceState::TooClose, 43.0)), None);
        assert_eq!(
            edges.observe(&measured(DistanceState::Safe, 49.0)),
            Some(DistanceEvent::Safe { distance_cm: 49.0 })
        );
    }

    #[test]
    fn test_face_lost_only_after_too_close() {
        let mut edges = EdgeTracker::new();
        assert_eq!(edges.observe(&EstimatorStatus::NoFace), None);

        edges.observe(&measured(DistanceState::TooClose, 40.0));
        assert_eq!(
            edges.observe(&EstimatorStatus::NoFace),
            Some(DistanceEvent::FaceLost)
        );
        assert_eq!(edges.last(), DistanceState::Safe);

        // Still too close when the face comes back: a fresh edge
        assert_eq!(
            edges.observe(&measured(DistanceState::TooClose, 40.0)),
            Some(DistanceEvent::TooClose { distance_cm: 40.0 })
        );
    }

    #[test]
    fn test_sync_suppresses_repeat_edge() {
        let mut edges = EdgeTracker::new();
        edges.observe(&measured(DistanceState::TooClose, 43.0));

        // Thresholds changed while the face stays too close
        edges.sync(DistanceState::TooClose);
        assert_eq!(edges.observe(&measured(DistanceState::TooClose, 43.0)), None);

        // A reset estimator reports Safe; the tracker follows silently
        edges.sync(DistanceState::Safe);
        assert_eq!(
            edges.observe(&measured(DistanceState::TooClose, 43.0)),
            Some(DistanceEvent::TooClose { distance_cm: 43.0 })
        );
    }

    #[test]
    fn test_skipped_and_uncalibrated_hold() {
        let mut edges = EdgeTracker::new();
        edges.observe(&measured(DistanceState::TooClose, 40.0));
        assert_eq!(
            edges.observe(&EstimatorStatus::Skipped {
                state: DistanceState::TooClose
            }),
            None
        );
        assert_eq!(edges.observe(&EstimatorStatus::NotCalibrated), None);
        assert_eq!(edges.last(), DistanceState::TooClose);
    }
}
