//! Face detection capability

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use camera_capture::Frame;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{DistanceError, Keypoints, Point};

/// Face bounding box in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub bbox: BoundingBox,
    pub score: f32,
    /// `None` when the detector reported fewer than five landmarks
    pub keypoints: Option<Keypoints>,
}

/// Face and landmark detector.
///
/// Treated as a black box: the caller decides whether and how often to call
/// it and imposes any timeout.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Face>, DistanceError>;
}

/// Deterministic detector producing one frontal face centred in the frame.
///
/// The inter-ocular distance and face presence can be changed at runtime,
/// which lets the pipeline be driven through distance changes without a
/// neural network.
pub struct MockFaceDetector {
    eye_distance_px: AtomicI32,
    face_present: AtomicBool,
    calls: AtomicU64,
}

impl MockFaceDetector {
    pub fn new(eye_distance_px: i32) -> Self {
        warn!("No face model configured. Using mock implementation.");
        Self {
            eye_distance_px: AtomicI32::new(eye_distance_px),
            face_present: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_eye_distance(&self, eye_distance_px: i32) {
        self.eye_distance_px.store(eye_distance_px, Ordering::SeqCst);
    }

    pub fn set_face_present(&self, present: bool) {
        self.face_present.store(present, Ordering::SeqCst);
    }

    /// Number of `detect` calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Frontal landmarks centred at `(cx, cy)`; yaw ratio is exactly 1.0
    /// for even eye distances.
    pub fn frontal_keypoints(cx: i32, cy: i32, eye_distance_px: i32) -> Keypoints {
        let half = eye_distance_px / 2;
        let left = Point::new(cx - half, cy);
        let right = Point::new(cx - half + eye_distance_px, cy);
        let nose = Point::new(cx, cy + half);
        Keypoints::new(
            left,
            right,
            nose,
            Point::new(left.x + half / 2, cy + eye_distance_px),
            Point::new(right.x - half / 2, cy + eye_distance_px),
        )
    }
}

impl FaceDetector for MockFaceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Face>, DistanceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.face_present.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let eye_distance = self.eye_distance_px.load(Ordering::SeqCst);
        let cx = frame.width() as i32 / 2;
        let cy = frame.height() as i32 / 2;
        Ok(vec![Face {
            bbox: BoundingBox {
                x: cx - eye_distance,
                y: cy - eye_distance,
                width: eye_distance * 2,
                height: eye_distance * 5 / 2,
            },
            score: 0.95,
            keypoints: Some(Self::frontal_keypoints(cx, cy, eye_distance)),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{PixelFormat, SourceId};

    #[test]
    fn test_mock_reports_configured_eye_distance() {
        let detector = MockFaceDetector::new(60);
        let frame = Frame::new(&SourceId::new(), vec![0; 16], 240, 240, PixelFormat::Rgb565, 0, 0, 0);

        let faces = detector.detect(&frame).unwrap();
        assert_eq!(faces.len(), 1);
        let keypoints = faces[0].keypoints.unwrap();
        assert!((keypoints.eye_distance() - 60.0).abs() < 1e-4);
        assert_eq!(keypoints.yaw_ratio(), 1.0);

        detector.set_face_present(false);
        assert!(detector.detect(&frame).unwrap().is_empty());
        assert_eq!(detector.calls(), 2);
    }
}
