//! Face Distance Estimation
//!
//! Estimates how far a face is from the camera from five facial landmarks:
//! - Inter-ocular pixel distance as the primary cue
//! - Yaw compensation from the nose-to-eye distance ratio
//! - Sliding-window mean smoothing
//! - Two-threshold hysteresis between `Safe` and `TooClose`
//! - Calibration against a face held at a known distance

pub mod calibration;
pub mod config;
pub mod detector;
pub mod estimator;
pub mod filter;
pub mod geometry;
pub mod state;

pub use calibration::CalibrationSession;
pub use config::{EstimatorConfig, PoseCorrectionParams};
pub use detector::{BoundingBox, Face, FaceDetector, MockFaceDetector};
pub use estimator::{DistanceEstimator, DistanceReading, EstimatorStatus};
pub use filter::DistanceFilter;
pub use geometry::{FaceGeometry, Keypoints, Point};
pub use state::{DistanceState, Thresholds};

use thiserror::Error;

/// Distance estimation error types
#[derive(Error, Debug)]
pub enum DistanceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid face geometry: {0}")]
    InvalidGeometry(String),

    #[error("Calibration has no samples")]
    NoCalibrationSamples,

    #[error("No calibration in progress")]
    NoCalibrationSession,

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Calibration storage failed: {0}")]
    Storage(#[from] storage::StorageError),
}
