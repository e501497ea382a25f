//! Landmark geometry: eye distance, yaw ratio and pose correction

use serde::{Deserialize, Serialize};

use crate::{DistanceError, PoseCorrectionParams};

/// Denominators below this many pixels make the yaw ratio meaningless
const MIN_YAW_DENOMINATOR_PX: f32 = 1.0;

/// Integer pixel coordinate reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in pixels
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = (i64::from(self.x) - i64::from(other.x)) as f32;
        let dy = (i64::from(self.y) - i64::from(other.y)) as f32;
        dx.hypot(dy)
    }
}

/// Five facial landmarks in fixed order:
/// left eye, right eye, nose, left mouth corner, right mouth corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypoints(pub [Point; 5]);

impl Keypoints {
    pub const COUNT: usize = 5;

    pub fn new(
        left_eye: Point,
        right_eye: Point,
        nose: Point,
        mouth_left: Point,
        mouth_right: Point,
    ) -> Self {
        Self([left_eye, right_eye, nose, mouth_left, mouth_right])
    }

    /// Build from a flat `[x0, y0, x1, y1, ...]` detector output.
    /// Returns `None` when fewer than five points are present.
    pub fn from_flat(values: &[i32]) -> Option<Self> {
        if values.len() < Self::COUNT * 2 {
            return None;
        }
        let mut points = [Point::default(); 5];
        for (i, point) in points.iter_mut().enumerate() {
            *point = Point::new(values[2 * i], values[2 * i + 1]);
        }
        Some(Self(points))
    }

    pub fn left_eye(&self) -> Point {
        self.0[0]
    }

    pub fn right_eye(&self) -> Point {
        self.0[1]
    }

    pub fn nose(&self) -> Point {
        self.0[2]
    }

    pub fn mouth_left(&self) -> Point {
        self.0[3]
    }

    pub fn mouth_right(&self) -> Point {
        self.0[4]
    }

    pub fn eye_distance(&self) -> f32 {
        self.left_eye().distance(&self.right_eye())
    }

    /// `dist(nose, left_eye) / dist(nose, right_eye)`, 1.0 when undefined
    pub fn yaw_ratio(&self) -> f32 {
        let to_left = self.nose().distance(&self.left_eye());
        let to_right = self.nose().distance(&self.right_eye());
        if to_right < MIN_YAW_DENOMINATOR_PX {
            return 1.0;
        }
        let ratio = to_left / to_right;
        if ratio.is_finite() {
            ratio
        } else {
            1.0
        }
    }
}

/// Per-frame measurement derived from keypoints
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceGeometry {
    pub eye_distance_px: f32,
    pub yaw_ratio: f32,
}

impl FaceGeometry {
    pub fn new(eye_distance_px: f32, yaw_ratio: f32) -> Result<Self, DistanceError> {
        if !(eye_distance_px.is_finite() && eye_distance_px > 0.0) {
            return Err(DistanceError::InvalidGeometry(format!(
                "eye distance {} px",
                eye_distance_px
            )));
        }
        let yaw_ratio = if yaw_ratio.is_finite() && yaw_ratio > 0.0 {
            yaw_ratio
        } else {
            1.0
        };
        Ok(Self {
            eye_distance_px,
            yaw_ratio,
        })
    }

    pub fn from_keypoints(keypoints: &Keypoints) -> Result<Self, DistanceError> {
        Self::new(keypoints.eye_distance(), keypoints.yaw_ratio())
    }
}

/// Map a yaw ratio to an eye-distance correction factor.
///
/// The ratio is clamped to `[min_ratio, max_ratio]`; 1.0 maps to 1.0, the
/// upper bound to `min_correction` and the lower bound to `max_correction`,
/// linearly in between.
pub fn pose_correction(yaw_ratio: f32, params: &PoseCorrectionParams) -> f32 {
    let ratio = yaw_ratio.clamp(params.min_ratio, params.max_ratio);
    if ratio > 1.0 {
        let t = (ratio - 1.0) / (params.max_ratio - 1.0);
        1.0 + t * (params.min_correction - 1.0)
    } else if ratio < 1.0 {
        let t = (1.0 - ratio) / (1.0 - params.min_ratio);
        1.0 + t * (params.max_correction - 1.0)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frontal(eye_distance: i32) -> Keypoints {
        let half = eye_distance / 2;
        Keypoints::new(
            Point::new(100 - half, 100),
            Point::new(100 + half, 100),
            Point::new(100, 100 + half),
            Point::new(100 - half / 2, 100 + eye_distance),
            Point::new(100 + half / 2, 100 + eye_distance),
        )
    }

    #[test]
    fn test_from_flat_requires_ten_values() {
        assert!(Keypoints::from_flat(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).is_none());
        let kp = Keypoints::from_flat(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]).unwrap();
        assert_eq!(kp.left_eye(), Point::new(1, 2));
        assert_eq!(kp.right_eye(), Point::new(3, 4));
        assert_eq!(kp.nose(), Point::new(5, 6));
        assert_eq!(kp.mouth_left(), Point::new(7, 8));
        assert_eq!(kp.mouth_right(), Point::new(9, 10));
    }

    #[test]
    fn test_distance_at_coordinate_extremes() {
        let a = Point::new(i32::MIN, 0);
        let b = Point::new(i32::MAX, 0);
        let d = a.distance(&b);
        assert!(d.is_finite());
        assert!((d - 4_294_967_295.0).abs() / d < 1e-6);
        assert_eq!(b.distance(&a), d);
        assert_eq!(Point::new(3, 0).distance(&Point::new(0, 4)), 5.0);
    }

    #[test]
    fn test_frontal_face_geometry() {
        let geometry = FaceGeometry::from_keypoints(&frontal(50)).unwrap();
        assert!((geometry.eye_distance_px - 50.0).abs() < 1e-4);
        assert!((geometry.yaw_ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_coincident_eyes_are_invalid() {
        let p = Point::new(10, 10);
        let kp = Keypoints::new(p, p, Point::new(10, 20), p, p);
        assert!(FaceGeometry::from_keypoints(&kp).is_err());
    }

    #[test]
    fn test_nose_on_right_eye_is_frontal() {
        let kp = Keypoints::new(
            Point::new(0, 0),
            Point::new(40, 0),
            Point::new(40, 0),
            Point::new(5, 30),
            Point::new(35, 30),
        );
        assert_eq!(kp.yaw_ratio(), 1.0);
    }

    #[test]
    fn test_pose_correction_endpoints() {
        let params = PoseCorrectionParams::default();
        assert_eq!(pose_correction(1.0, &params), 1.0);
        assert!((pose_correction(1.3, &params) - 0.85).abs() < 1e-6);
        assert!((pose_correction(0.7, &params) - 1.15).abs() < 1e-6);
        assert!((pose_correction(5.0, &params) - 0.85).abs() < 1e-6);
        assert!((pose_correction(0.1, &params) - 1.15).abs() < 1e-6);
        assert!((pose_correction(1.15, &params) - 0.925).abs() < 1e-5);
    }

    proptest! {
        #[test]
        fn prop_correction_stays_in_range(ratio in 0.0f32..10.0) {
            let params = PoseCorrectionParams::default();
            let factor = pose_correction(ratio, &params);
            prop_assert!(factor >= params.min_correction - 1e-6);
            prop_assert!(factor <= params.max_correction + 1e-6);
        }

        #[test]
        fn prop_correction_is_monotonic(a in 0.5f32..1.5, b in 0.5f32..1.5) {
            let params = PoseCorrectionParams::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(pose_correction(lo, &params) >= pose_correction(hi, &params) - 1e-6);
        }
    }
}
