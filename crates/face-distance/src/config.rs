//! Estimator configuration

use serde::{Deserialize, Serialize};

use crate::DistanceError;

/// Yaw compensation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseCorrectionParams {
    /// Yaw ratio is clamped to `[min_ratio, max_ratio]`
    pub min_ratio: f32,
    pub max_ratio: f32,
    /// Factor reached at `max_ratio`
    pub min_correction: f32,
    /// Factor reached at `min_ratio`
    pub max_correction: f32,
}

impl Default for PoseCorrectionParams {
    fn default() -> Self {
        Self {
            min_ratio: 0.7,
            max_ratio: 1.3,
            min_correction: 0.85,
            max_correction: 1.15,
        }
    }
}

/// Distance estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Distance the face is held at while calibrating (cm)
    pub known_distance_cm: f32,

    /// Smoothed distance below which the state becomes `TooClose` (cm)
    pub enter_threshold_cm: f32,

    /// Smoothed distance above which the state returns to `Safe` (cm)
    pub exit_threshold_cm: f32,

    /// Moving-average window length
    pub filter_window: usize,

    /// Eye-distance samples collected per calibration
    pub calibration_samples: usize,

    pub pose: PoseCorrectionParams,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            known_distance_cm: 50.0,
            enter_threshold_cm: 45.0,
            exit_threshold_cm: 48.0,
            filter_window: 7,
            calibration_samples: 20,
            pose: PoseCorrectionParams::default(),
        }
    }
}

impl EstimatorConfig {
    /// Desk setup: alarm earlier, release later
    pub fn strict() -> Self {
        Self {
            enter_threshold_cm: 50.0,
            exit_threshold_cm: 55.0,
            ..Default::default()
        }
    }

    /// Handheld setup: tolerate closer faces
    pub fn lenient() -> Self {
        Self {
            enter_threshold_cm: 35.0,
            exit_threshold_cm: 38.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DistanceError> {
        if !(self.known_distance_cm.is_finite() && self.known_distance_cm > 0.0) {
            return Err(DistanceError::Config(format!(
                "known_distance_cm must be positive, got {}",
                self.known_distance_cm
            )));
        }
        if !(self.enter_threshold_cm.is_finite() && self.enter_threshold_cm > 0.0) {
            return Err(DistanceError::Config(format!(
                "enter_threshold_cm must be positive, got {}",
                self.enter_threshold_cm
            )));
        }
        if !(self.exit_threshold_cm > self.enter_threshold_cm) {
            return Err(DistanceError::Config(format!(
                "exit threshold {} must exceed enter threshold {}",
                self.exit_threshold_cm, self.enter_threshold_cm
            )));
        }
        if self.filter_window == 0 {
            return Err(DistanceError::Config("filter_window must be at least 1".into()));
        }
        if self.calibration_samples == 0 {
            return Err(DistanceError::Config(
                "calibration_samples must be at least 1".into(),
            ));
        }

        let pose = &self.pose;
        if !(pose.min_ratio > 0.0 && pose.min_ratio < 1.0 && pose.max_ratio > 1.0) {
            return Err(DistanceError::Config(format!(
                "pose ratio range [{}, {}] must straddle 1.0",
                pose.min_ratio, pose.max_ratio
            )));
        }
        if !(pose.min_correction > 0.0 && pose.min_correction <= 1.0 && pose.max_correction >= 1.0)
        {
            return Err(DistanceError::Config(format!(
                "pose correction range [{}, {}] must contain 1.0",
                pose.min_correction, pose.max_correction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EstimatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.filter_window, 7);
        assert_eq!(config.calibration_samples, 20);
        assert!(EstimatorConfig::strict().validate().is_ok());
        assert!(EstimatorConfig::lenient().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = EstimatorConfig {
            enter_threshold_cm: 48.0,
            exit_threshold_cm: 48.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_window() {
        let config = EstimatorConfig {
            filter_window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
