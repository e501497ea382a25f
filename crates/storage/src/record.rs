use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Persisted calibration result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Scale relating pixel eye distance to centimetres (`cm * px`)
    pub k_constant: f32,
    pub is_calibrated: bool,
}

impl CalibrationRecord {
    /// Record produced by a completed calibration session
    pub fn calibrated(k_constant: f32) -> Result<Self, StorageError> {
        let record = Self {
            k_constant,
            is_calibrated: true,
        };
        record.validate()?;
        Ok(record)
    }

    /// A calibrated record must carry a usable positive scale
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.is_calibrated && !(self.k_constant.is_finite() && self.k_constant > 0.0) {
            return Err(StorageError::InvalidRecord(format!(
                "calibrated record with k_constant {}",
                self.k_constant
            )));
        }
        Ok(())
    }
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            k_constant: 0.0,
            is_calibrated: false,
        }
    }
}
