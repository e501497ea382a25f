//! Alerting System
//!
//! Drives the proximity alarm output. The alarm is raised on a `TooClose`
//! edge and switched off either by a `Safe` edge, by the end of a photo
//! upload cycle, or by its auto-stop deadline, whichever comes first.

mod alarm;
mod timer;

pub use alarm::{AlarmConfig, AlarmManager, AlarmOutput, LoggingAlarm};
pub use timer::AlarmTimer;
