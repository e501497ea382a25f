//! Distance estimator
//!
//! Owns the calibration record, the smoothing window and the hysteresis
//! state. Nothing else reads or writes them.

use storage::{CalibrationRecord, CalibrationStore};
use tracing::{debug, info, warn};

use crate::geometry::pose_correction;
use crate::{
    CalibrationSession, DistanceError, DistanceFilter, DistanceState, EstimatorConfig, Face,
    FaceGeometry, Keypoints, Thresholds,
};

/// Result of one successful distance update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceReading {
    pub state: DistanceState,
    pub smoothed_cm: f32,
    pub raw_cm: f32,
    pub eye_distance_px: f32,
    pub yaw_ratio: f32,
    pub correction: f32,
}

/// Outcome of feeding one frame's detections to the estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EstimatorStatus {
    /// No calibration yet; the state stays at its default
    NotCalibrated,
    /// Detector found no face
    NoFace,
    /// Face present but unusable (missing keypoints, degenerate geometry)
    Skipped { state: DistanceState },
    Measured(DistanceReading),
}

impl EstimatorStatus {
    /// Distance state to report for this frame
    pub fn state(&self) -> DistanceState {
        match self {
            EstimatorStatus::NotCalibrated | EstimatorStatus::NoFace => DistanceState::Safe,
            EstimatorStatus::Skipped { state } => *state,
            EstimatorStatus::Measured(reading) => reading.state,
        }
    }
}

pub struct DistanceEstimator {
    config: EstimatorConfig,
    thresholds: Thresholds,
    store: Box<dyn CalibrationStore>,
    k_constant: f32,
    calibrated: bool,
    filter: DistanceFilter,
    state: DistanceState,
    smoothed_cm: Option<f32>,
    session: Option<CalibrationSession>,
}

impl DistanceEstimator {
    /// Create an estimator and restore any persisted calibration.
    ///
    /// An unreadable store is logged and treated as "not calibrated".
    pub fn new(
        config: EstimatorConfig,
        store: Box<dyn CalibrationStore>,
    ) -> Result<Self, DistanceError> {
        config.validate()?;
        let thresholds = Thresholds::new(config.enter_threshold_cm, config.exit_threshold_cm)?;

        let mut estimator = Self {
            filter: DistanceFilter::new(config.filter_window),
            thresholds,
            store,
            k_constant: 0.0,
            calibrated: false,
            state: DistanceState::Safe,
            smoothed_cm: None,
            session: None,
            config,
        };

        match estimator.store.load() {
            Ok(Some(record)) if record.is_calibrated => {
                estimator.k_constant = record.k_constant;
                estimator.calibrated = true;
                info!("Loaded calibration: k={:.2}", record.k_constant);
            }
            Ok(_) => info!("No calibration stored; calibration required"),
            Err(e) => warn!("Failed to load calibration, starting uncalibrated: {}", e),
        }

        Ok(estimator)
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn k_constant(&self) -> f32 {
        self.k_constant
    }

    pub fn current_state(&self) -> DistanceState {
        self.state
    }

    /// Latest smoothed distance, `None` before the first measurement
    pub fn current_distance(&self) -> Option<f32> {
        self.smoothed_cm
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn set_thresholds(&mut self, enter_cm: f32, exit_cm: f32) -> Result<(), DistanceError> {
        self.thresholds = Thresholds::new(enter_cm, exit_cm)?;
        self.config.enter_threshold_cm = enter_cm;
        self.config.exit_threshold_cm = exit_cm;
        info!("Thresholds set: enter {:.1} cm, exit {:.1} cm", enter_cm, exit_cm);
        Ok(())
    }

    // ---- calibration -------------------------------------------------

    /// Begin a fresh calibration session, discarding any previous one
    pub fn start_calibration(&mut self) {
        info!(
            "Calibration started: hold face at {:.0} cm for {} frames",
            self.config.known_distance_cm, self.config.calibration_samples
        );
        self.session = Some(CalibrationSession::new(self.config.calibration_samples));
    }

    pub fn is_calibrating(&self) -> bool {
        self.session.is_some()
    }

    /// `(collected, required)` for the running session
    pub fn calibration_progress(&self) -> Option<(usize, usize)> {
        self.session.as_ref().map(|s| (s.collected(), s.required()))
    }

    /// Feed one frame's keypoints. Returns `true` once enough samples exist.
    pub fn add_calibration_frame(&mut self, keypoints: &Keypoints) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                let done = session.add_keypoints(keypoints);
                debug!(
                    "Calibration sample {}/{}",
                    session.collected(),
                    session.required()
                );
                done
            }
            None => false,
        }
    }

    /// Compute and persist the scale constant.
    ///
    /// The estimator only switches to the new calibration after the record
    /// is saved; on failure the session is kept so the caller can retry.
    pub fn finish_calibration(&mut self) -> Result<f32, DistanceError> {
        let session = self
            .session
            .as_ref()
            .ok_or(DistanceError::NoCalibrationSession)?;
        let mean = session.mean_eye_distance()?;
        let k_constant = self.config.known_distance_cm * mean;

        let record = CalibrationRecord::calibrated(k_constant)?;
        self.store.save(&record)?;

        self.k_constant = k_constant;
        self.calibrated = true;
        self.session = None;
        self.filter.clear();
        self.smoothed_cm = None;
        self.state = DistanceState::Safe;

        info!(
            "Calibration complete: mean eye distance {:.2} px, k={:.2}",
            mean, k_constant
        );
        Ok(k_constant)
    }

    /// Erase the persisted record and every derived value.
    ///
    /// If the store cannot be erased nothing changes.
    pub fn reset_calibration(&mut self) -> Result<(), DistanceError> {
        self.store.erase_all()?;
        self.k_constant = 0.0;
        self.calibrated = false;
        self.session = None;
        self.filter.clear();
        self.smoothed_cm = None;
        self.state = DistanceState::Safe;
        info!("Calibration reset");
        Ok(())
    }

    // ---- measurement -------------------------------------------------

    /// Update from one frame's detections. Only the first face is used.
    pub fn process_faces(&mut self, faces: &[Face]) -> EstimatorStatus {
        if !self.calibrated {
            return EstimatorStatus::NotCalibrated;
        }
        let Some(face) = faces.first() else {
            return EstimatorStatus::NoFace;
        };
        let Some(keypoints) = face.keypoints.as_ref() else {
            debug!("Face without keypoints; holding state");
            return EstimatorStatus::Skipped { state: self.state };
        };

        match FaceGeometry::from_keypoints(keypoints) {
            Ok(geometry) => self.process_geometry(geometry),
            Err(e) => {
                debug!("Skipping frame: {}", e);
                EstimatorStatus::Skipped { state: self.state }
            }
        }
    }

    /// Update from an already-extracted measurement
    pub fn process_geometry(&mut self, geometry: FaceGeometry) -> EstimatorStatus {
        if !self.calibrated {
            return EstimatorStatus::NotCalibrated;
        }

        let correction = pose_correction(geometry.yaw_ratio, &self.config.pose);
        let corrected_px = geometry.eye_distance_px / correction;
        let raw_cm = self.k_constant / corrected_px;
        if !raw_cm.is_finite() {
            return EstimatorStatus::Skipped { state: self.state };
        }

        let smoothed_cm = self.filter.push(raw_cm);
        let previous = self.state;
        self.state = self.state.next(smoothed_cm, &self.thresholds);
        self.smoothed_cm = Some(smoothed_cm);

        if previous != self.state {
            info!(
                "Distance state {:?} -> {:?} at {:.1} cm",
                previous, self.state, smoothed_cm
            );
        }

        EstimatorStatus::Measured(DistanceReading {
            state: self.state,
            smoothed_cm,
            raw_cm,
            eye_distance_px: geometry.eye_distance_px,
            yaw_ratio: geometry.yaw_ratio,
            correction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, MockFaceDetector};
    use std::sync::Arc;
    use storage::MemoryCalibrationStore;

    fn calibrated(k: f32) -> (DistanceEstimator, Arc<MemoryCalibrationStore>) {
        let store = Arc::new(MemoryCalibrationStore::with_record(
            CalibrationRecord::calibrated(k).unwrap(),
        ));
        let estimator =
            DistanceEstimator::new(EstimatorConfig::default(), Box::new(store.clone())).unwrap();
        (estimator, store)
    }

    fn face(eye_distance: i32) -> Face {
        Face {
            bbox: BoundingBox::default(),
            score: 0.9,
            keypoints: Some(MockFaceDetector::frontal_keypoints(120, 120, eye_distance)),
        }
    }

    fn frontal(eye_distance_px: f32) -> FaceGeometry {
        FaceGeometry::new(eye_distance_px, 1.0).unwrap()
    }

    #[test]
    fn test_uncalibrated_reports_status() {
        let estimator = DistanceEstimator::new(
            EstimatorConfig::default(),
            Box::new(MemoryCalibrationStore::new()),
        );
        let mut estimator = estimator.unwrap();
        assert!(!estimator.is_calibrated());
        assert_eq!(estimator.process_faces(&[face(50)]), EstimatorStatus::NotCalibrated);
        assert_eq!(estimator.current_state(), DistanceState::Safe);
    }

    #[test]
    fn test_fifty_centimetres_stays_safe() {
        let (mut estimator, _) = calibrated(2500.0);
        for _ in 0..10 {
            let status = estimator.process_faces(&[face(50)]);
            let EstimatorStatus::Measured(reading) = status else {
                panic!("expected a measurement, got {:?}", status);
            };
            assert!((reading.raw_cm - 50.0).abs() < 1e-3);
            assert_eq!(reading.state, DistanceState::Safe);
        }
        assert!((estimator.current_distance().unwrap() - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_close_face_enters_too_close() {
        let (mut estimator, _) = calibrated(2500.0);
        let status = estimator.process_geometry(frontal(58.8));
        let EstimatorStatus::Measured(reading) = status else {
            panic!("expected a measurement");
        };
        assert!((reading.raw_cm - 42.517).abs() < 0.01);
        assert_eq!(reading.state, DistanceState::TooClose);
    }

    #[test]
    fn test_smoothing_delays_transition() {
        let (mut estimator, _) = calibrated(2500.0);
        for _ in 0..7 {
            estimator.process_geometry(frontal(50.0));
        }
        // One close sample in a full window of 50 cm: mean ~48.9 cm
        let status = estimator.process_geometry(frontal(58.8));
        assert_eq!(status.state(), DistanceState::Safe);
        let mut state = status.state();
        for _ in 0..7 {
            state = estimator.process_geometry(frontal(58.8)).state();
        }
        assert_eq!(state, DistanceState::TooClose);
    }

    #[test]
    fn test_yaw_correction_applied() {
        let (mut estimator, _) = calibrated(2500.0);
        let status = estimator.process_geometry(FaceGeometry::new(50.0, 1.3).unwrap());
        let EstimatorStatus::Measured(reading) = status else {
            panic!("expected a measurement");
        };
        assert!((reading.correction - 0.85).abs() < 1e-6);
        // 2500 / (50 / 0.85)
        assert!((reading.raw_cm - 42.5).abs() < 1e-3);
    }

    #[test]
    fn test_unusable_faces_hold_state() {
        let (mut estimator, _) = calibrated(2500.0);
        estimator.process_geometry(frontal(80.0));
        assert_eq!(estimator.current_state(), DistanceState::TooClose);

        let no_keypoints = Face {
            keypoints: None,
            ..face(50)
        };
        assert_eq!(
            estimator.process_faces(&[no_keypoints]),
            EstimatorStatus::Skipped {
                state: DistanceState::TooClose
            }
        );
        assert_eq!(estimator.process_faces(&[]), EstimatorStatus::NoFace);
        assert_eq!(estimator.current_state(), DistanceState::TooClose);
    }

    #[test]
    fn test_only_first_face_is_used() {
        let (mut estimator, _) = calibrated(2500.0);
        let status = estimator.process_faces(&[face(50), face(100)]);
        let EstimatorStatus::Measured(reading) = status else {
            panic!("expected a measurement");
        };
        assert!((reading.eye_distance_px - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_calibration_is_deterministic() {
        let store = Arc::new(MemoryCalibrationStore::new());
        let mut estimator =
            DistanceEstimator::new(EstimatorConfig::default(), Box::new(store.clone())).unwrap();

        estimator.start_calibration();
        let keypoints = MockFaceDetector::frontal_keypoints(120, 120, 60);
        let mut done = false;
        for i in 0..20 {
            done = estimator.add_calibration_frame(&keypoints);
            assert_eq!(done, i == 19);
        }
        assert!(done);

        let k = estimator.finish_calibration().unwrap();
        assert!((k - 50.0 * 60.0).abs() < 1e-2);
        assert!(estimator.is_calibrated());
        assert!(!estimator.is_calibrating());
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().unwrap().unwrap().k_constant, k);
    }

    #[test]
    fn test_finish_without_samples_fails() {
        let mut estimator = DistanceEstimator::new(
            EstimatorConfig::default(),
            Box::new(MemoryCalibrationStore::new()),
        )
        .unwrap();
        assert!(matches!(
            estimator.finish_calibration(),
            Err(DistanceError::NoCalibrationSession)
        ));
        estimator.start_calibration();
        assert!(matches!(
            estimator.finish_calibration(),
            Err(DistanceError::NoCalibrationSamples)
        ));
        assert!(!estimator.is_calibrated());
    }

    #[test]
    fn test_failed_save_keeps_previous_calibration() {
        let (mut estimator, store) = calibrated(2500.0);
        estimator.start_calibration();
        for _ in 0..20 {
            estimator.add_calibration_frame(&MockFaceDetector::frontal_keypoints(120, 120, 40));
        }
        store.set_fail_writes(true);
        assert!(estimator.finish_calibration().is_err());
        assert_eq!(estimator.k_constant(), 2500.0);
        assert!(estimator.is_calibrating());

        store.set_fail_writes(false);
        let k = estimator.finish_calibration().unwrap();
        assert!((k - 2000.0).abs() < 1e-2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut estimator, store) = calibrated(2500.0);
        estimator.process_geometry(frontal(80.0));
        assert_eq!(estimator.current_state(), DistanceState::TooClose);

        estimator.reset_calibration().unwrap();
        assert!(!estimator.is_calibrated());
        assert_eq!(estimator.k_constant(), 0.0);
        assert_eq!(estimator.current_state(), DistanceState::Safe);
        assert_eq!(estimator.current_distance(), None);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_reset_failure_changes_nothing() {
        let (mut estimator, store) = calibrated(2500.0);
        estimator.process_geometry(frontal(80.0));
        store.set_fail_writes(true);

        assert!(estimator.reset_calibration().is_err());
        assert!(estimator.is_calibrated());
        assert_eq!(estimator.k_constant(), 2500.0);
        assert_eq!(estimator.current_state(), DistanceState::TooClose);
    }

    #[test]
    fn test_set_thresholds() {
        let (mut estimator, _) = calibrated(2500.0);
        assert!(estimator.set_thresholds(50.0, 45.0).is_err());
        estimator.set_thresholds(55.0, 60.0).unwrap();
        assert_eq!(estimator.process_geometry(frontal(50.0)).state(), DistanceState::TooClose);
    }
}
