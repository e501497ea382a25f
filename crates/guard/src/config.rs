//! Guard configuration
//!
//! Defaults carry the tuned values; a TOML file and `GUARD__*` environment
//! variables can override any of them, e.g.
//! `GUARD__ESTIMATOR__ENTER_THRESHOLD_CM=40`.

use std::path::Path;

use alerting::AlarmConfig;
use camera_capture::CameraConfig;
use face_distance::EstimatorConfig;
use photo_upload::{PhotoConfig, UploadConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::liveness::LivenessConfig;
use crate::GuardError;

/// Frame pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each bounded frame channel
    pub channel_capacity: usize,
    /// Run detection on one frame out of this many
    pub frame_skip: u32,
    /// Bounded display receive wait (milliseconds)
    pub display_wait_ms: u64,
    /// Gate poll interval while capture is paused (milliseconds)
    pub gate_poll_ms: u64,
    /// Receive wait while inference diverts frames (milliseconds)
    pub divert_poll_ms: u64,
    /// Receive wait while inference runs, bounds heartbeat gaps (milliseconds)
    pub inference_wait_ms: u64,
    /// Retry delay after the frame source reports busy (milliseconds)
    pub busy_backoff_ms: u64,
    /// Capacity of the distance event channel
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 5,
            frame_skip: 4,
            display_wait_ms: 100,
            gate_poll_ms: 200,
            divert_poll_ms: 10,
            inference_wait_ms: 100,
            busy_backoff_ms: 10,
            event_capacity: 16,
        }
    }
}

/// Mode manager timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Minimum time in `Transitioning` before the photo frame is taken
    pub settle_delay_ms: u64,
    /// Status log interval while detection is paused
    pub status_log_interval_ms: u64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            status_log_interval_ms: 5_000,
        }
    }
}

/// Full guard configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub camera: CameraConfig,
    pub estimator: EstimatorConfig,
    pub pipeline: PipelineConfig,
    pub mode: ModeConfig,
    pub alarm: AlarmConfig,
    pub photo: PhotoConfig,
    pub upload: UploadConfig,
    pub liveness: LivenessConfig,
    pub calibration: CalibrationSettings,
}

/// Where and when to calibrate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Calibration record file
    pub path: String,
    /// Start a calibration session at boot when no record exists
    pub auto_calibrate: bool,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            path: "proximity-guard.calibration".to_string(),
            auto_calibrate: true,
        }
    }
}

impl GuardConfig {
    /// Load defaults, then the optional file, then `GUARD__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, GuardError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let config: GuardConfig = builder
            .add_source(
                ::config::Environment::with_prefix("GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GuardError> {
        self.estimator.validate()?;
        self.photo.validate()?;

        let p = &self.pipeline;
        if p.channel_capacity == 0 {
            return Err(GuardError::Config("channel_capacity must be at least 1".into()));
        }
        if p.frame_skip == 0 {
            return Err(GuardError::Config("frame_skip must be at least 1".into()));
        }
        if p.event_capacity == 0 {
            return Err(GuardError::Config("event_capacity must be at least 1".into()));
        }
        self.upload.validate()?;
        if self.upload.write_chunk_bytes > self.photo.max_chunk_bytes {
            return Err(GuardError::Config(format!(
                "upload write chunk {} exceeds photo chunk {}",
                self.upload.write_chunk_bytes, self.photo.max_chunk_bytes
            )));
        }
        if self.camera.fps == 0 {
            return Err(GuardError::Config("camera fps must be at least 1".into()));
        }
        Ok(())
    }
}
