//! System mode and the gate observed by the pipeline stages

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which activity currently owns the camera and the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SystemMode {
    /// Capture and inference run; the display renders
    #[default]
    FaceDetection,
    /// Stages are releasing the camera ahead of a photo capture
    Transitioning,
    /// A photo is being uploaded
    PhotoUpload,
}

impl SystemMode {
    /// Capture and inference may touch the camera
    pub fn detection_allowed(&self) -> bool {
        matches!(self, SystemMode::FaceDetection)
    }

    /// The display may render frames
    pub fn display_allowed(&self) -> bool {
        matches!(self, SystemMode::FaceDetection)
    }

    pub fn is_paused(&self) -> bool {
        !self.detection_allowed()
    }

    /// Numeric code for metrics
    pub fn code(&self) -> u8 {
        match self {
            SystemMode::FaceDetection => 0,
            SystemMode::Transitioning => 1,
            SystemMode::PhotoUpload => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SystemMode::FaceDetection => "face_detection",
            SystemMode::Transitioning => "transitioning",
            SystemMode::PhotoUpload => "photo_upload",
        }
    }
}

/// Read-only view of the mode. Each stage owns its own clone.
#[derive(Debug, Clone)]
pub struct ModeWatch {
    rx: watch::Receiver<SystemMode>,
}

impl ModeWatch {
    pub(crate) fn new(rx: watch::Receiver<SystemMode>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> SystemMode {
        *self.rx.borrow()
    }

    pub fn detection_allowed(&self) -> bool {
        self.current().detection_allowed()
    }

    pub fn display_allowed(&self) -> bool {
        self.current().display_allowed()
    }

    /// Wait up to `limit` for detection to be allowed again.
    /// Returns whether the gate is open.
    pub async fn wait_for_detection(&mut self, limit: Duration) -> bool {
        let waited = tokio::time::timeout(limit, self.rx.wait_for(|m| m.detection_allowed()))
            .await
            .map(|r| r.is_ok());
        match waited {
            Ok(true) => true,
            // Sender gone: report the last value
            Ok(false) => self.detection_allowed(),
            Err(_) => false,
        }
    }
}
