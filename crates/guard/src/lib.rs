//! Face proximity guard
//!
//! Watches how close a face is to the camera and reacts when it gets too
//! close:
//! - Capture, inference and display run as three tasks joined by bounded
//!   frame channels
//! - [`ModeManager`] arbitrates the camera between face detection and a
//!   one-off photo capture and upload
//! - A watchdog trips when a registered stage stops making progress

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub mod capture;
pub mod config;
pub mod control;
pub mod display;
pub mod inference;
pub mod liveness;
pub mod manager;
pub mod mode;
pub mod pipeline;
pub mod stats;

pub use config::{CalibrationSettings, GuardConfig, ModeConfig, PipelineConfig};
pub use display::{FrameDisplay, LoggingDisplay};
pub use inference::EstimatorCommand;
pub use liveness::{LivenessConfig, LivenessMonitor, Stage, Watchdog};
pub use manager::{DistanceEvent, ManagerParts, ModeManager, ModeSnapshot};
pub use mode::{ModeWatch, SystemMode};
pub use pipeline::{spawn_pipeline, PipelineHandle, PipelineParts, PipelineReport};
pub use stats::StatsSnapshot;

use camera_capture::CameraError;
use face_distance::DistanceError;
use photo_upload::{PhotoError, UploadError};
use storage::StorageError;
use thiserror::Error;

/// Guard errors
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Distance error: {0}")]
    Distance(#[from] DistanceError),

    #[error("Photo error: {0}")]
    Photo(#[from] PhotoError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Task error: {0}")]
    Task(String),
}

/// Initialize logging
pub fn init_logging() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
