//! Calibration session

use crate::{DistanceError, FaceGeometry, Keypoints};

/// Eye-distance samples collected while the user sits at the known distance
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    samples: Vec<f32>,
    required: usize,
}

impl CalibrationSession {
    pub fn new(required: usize) -> Self {
        let required = required.max(1);
        Self {
            samples: Vec::with_capacity(required),
            required,
        }
    }

    /// Record one frame's eye distance.
    ///
    /// Invalid geometry is ignored. Returns `true` once the required number
    /// of samples has been collected; further samples are not stored.
    pub fn add_keypoints(&mut self, keypoints: &Keypoints) -> bool {
        match FaceGeometry::from_keypoints(keypoints) {
            Ok(geometry) => self.add_sample(geometry.eye_distance_px),
            Err(_) => self.is_complete(),
        }
    }

    pub fn add_sample(&mut self, eye_distance_px: f32) -> bool {
        if !self.is_complete() && eye_distance_px.is_finite() && eye_distance_px > 0.0 {
            self.samples.push(eye_distance_px);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.required
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Mean eye distance over the collected samples
    pub fn mean_eye_distance(&self) -> Result<f32, DistanceError> {
        if self.samples.is_empty() {
            return Err(DistanceError::NoCalibrationSamples);
        }
        Ok(self.samples.iter().sum::<f32>() / self.samples.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_at_required_samples() {
        let mut session = CalibrationSession::new(3);
        assert!(!session.add_sample(50.0));
        assert!(!session.add_sample(52.0));
        assert!(session.add_sample(54.0));
        assert!(session.add_sample(100.0));
        assert_eq!(session.collected(), 3);
        assert!((session.mean_eye_distance().unwrap() - 52.0).abs() < 1e-5);
    }

    #[test]
    fn test_rejects_invalid_samples() {
        let mut session = CalibrationSession::new(2);
        session.add_sample(0.0);
        session.add_sample(f32::NAN);
        session.add_sample(-4.0);
        assert_eq!(session.collected(), 0);
        assert!(matches!(
            session.mean_eye_distance(),
            Err(DistanceError::NoCalibrationSamples)
        ));
    }
}
