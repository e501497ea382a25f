//! Storage Layer
//!
//! Persists the distance calibration record. A store holds at most one
//! record and replaces it as a whole, so a reader never observes a scale
//! constant without its calibrated flag.

mod record;
mod store;

pub use record::CalibrationRecord;
pub use store::{CalibrationStore, FileCalibrationStore, MemoryCalibrationStore};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid calibration record: {0}")]
    InvalidRecord(String),
}
