//! Camera Capture Library for the Proximity Guard
//!
//! Models the camera as a pool of driver-owned frame buffers:
//! - `Frame`: exclusive handle to one buffer, moved between stages
//! - `FrameSource`: acquire/release capability implemented by drivers
//! - `SyntheticCamera`: fixed-pool source used by the demo binary and tests

pub mod frame;
pub mod source;
pub mod synthetic;

pub use frame::{Frame, PixelFormat};
pub use source::{FrameSource, SourceId};
pub use synthetic::{PoolStats, SyntheticCamera};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// All driver buffers are currently owned by callers
    #[error("Frame source busy: no free buffer")]
    Busy,

    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Foreign frame: buffer {0} does not belong to this source")]
    ForeignFrame(usize),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Camera not initialized")]
    NotInitialized,
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Pixel format delivered by the sensor
    pub format: PixelFormat,
    /// Number of driver frame buffers
    pub buffer_count: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 240,
            height: 240,
            fps: 15,
            format: PixelFormat::Rgb565,
            buffer_count: 2,
        }
    }
}

impl CameraConfig {
    /// QVGA JPEG sensor config, used when photos are captured compressed
    pub fn qvga_jpeg() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 10,
            format: PixelFormat::Jpeg,
            buffer_count: 2,
        }
    }

    /// Size of one uncompressed frame in bytes, `None` for compressed formats
    pub fn frame_bytes(&self) -> Option<usize> {
        self.format
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * self.height as usize * bpp)
    }
}
