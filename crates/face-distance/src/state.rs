//! Distance state with hysteresis

use serde::{Deserialize, Serialize};

use crate::DistanceError;

/// Proximity verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceState {
    #[default]
    Safe,
    TooClose,
}

/// Hysteresis thresholds, `exit_cm > enter_cm`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    enter_cm: f32,
    exit_cm: f32,
}

impl Thresholds {
    pub fn new(enter_cm: f32, exit_cm: f32) -> Result<Self, DistanceError> {
        if !(enter_cm.is_finite() && exit_cm.is_finite() && exit_cm > enter_cm) {
            return Err(DistanceError::Config(format!(
                "exit threshold {} must exceed enter threshold {}",
                exit_cm, enter_cm
            )));
        }
        Ok(Self { enter_cm, exit_cm })
    }

    pub fn enter_cm(&self) -> f32 {
        self.enter_cm
    }

    pub fn exit_cm(&self) -> f32 {
        self.exit_cm
    }
}

impl DistanceState {
    /// State after observing `smoothed_cm`.
    ///
    /// `Safe` flips only below the enter threshold and `TooClose` only above
    /// the exit threshold; anything in between keeps the current state.
    pub fn next(self, smoothed_cm: f32, thresholds: &Thresholds) -> Self {
        match self {
            DistanceState::Safe if smoothed_cm < thresholds.enter_cm => DistanceState::TooClose,
            DistanceState::TooClose if smoothed_cm > thresholds.exit_cm => DistanceState::Safe,
            current => current,
        }
    }

    pub fn is_too_close(&self) -> bool {
        matches!(self, DistanceState::TooClose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_thresholds() -> Thresholds {
        Thresholds::new(45.0, 48.0).unwrap()
    }

    #[test]
    fn test_enter_and_exit() {
        let t = default_thresholds();
        let state = DistanceState::Safe.next(44.9, &t);
        assert_eq!(state, DistanceState::TooClose);
        assert_eq!(state.next(48.0, &t), DistanceState::TooClose);
        assert_eq!(state.next(48.1, &t), DistanceState::Safe);
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let t = default_thresholds();
        assert_eq!(DistanceState::Safe.next(45.0, &t), DistanceState::Safe);
        assert_eq!(DistanceState::TooClose.next(48.0, &t), DistanceState::TooClose);
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(Thresholds::new(48.0, 45.0).is_err());
        assert!(Thresholds::new(45.0, 45.0).is_err());
        assert!(Thresholds::new(f32::NAN, 45.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_no_flapping_between_thresholds(
            dip in 0.0f32..44.9,
            band in prop::collection::vec(45.0f32..=48.0, 1..32),
        ) {
            let t = default_thresholds();
            let mut state = DistanceState::Safe.next(dip, &t);
            prop_assert_eq!(state, DistanceState::TooClose);
            for d in band {
                state = state.next(d, &t);
                prop_assert_eq!(state, DistanceState::TooClose);
            }
            prop_assert_eq!(state.next(48.5, &t), DistanceState::Safe);
        }
    }
}
