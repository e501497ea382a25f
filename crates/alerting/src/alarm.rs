//! Alarm output and manager

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::AlarmTimer;

/// Alarm configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Auto-stop delay after the alarm is raised (milliseconds)
    pub duration_ms: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self { duration_ms: 3000 }
    }
}

/// Alarm output capability (buzzer, LED, ...). `set` must be idempotent.
pub trait AlarmOutput: Send + Sync {
    fn set(&self, active: bool);
}

/// Output that logs level changes and remembers its state
#[derive(Debug, Default)]
pub struct LoggingAlarm {
    active: AtomicBool,
    activations: AtomicU32,
}

impl LoggingAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of off -> on transitions
    pub fn activations(&self) -> u32 {
        self.activations.load(Ordering::SeqCst)
    }
}

impl AlarmOutput for LoggingAlarm {
    fn set(&self, active: bool) {
        let was = self.active.swap(active, Ordering::SeqCst);
        if was == active {
            return;
        }
        if active {
            self.activations.fetch_add(1, Ordering::SeqCst);
            info!("Buzzer ON");
        } else {
            info!("Buzzer OFF");
        }
    }
}

/// Owns the alarm output and its auto-stop deadline.
///
/// Only the owner of the manager writes the output, so the deadline and
/// explicit clears cannot race.
pub struct AlarmManager {
    output: Arc<dyn AlarmOutput>,
    timer: AlarmTimer,
    duration: Duration,
    active: bool,
    raised: u32,
}

impl AlarmManager {
    pub fn new(config: &AlarmConfig, output: Arc<dyn AlarmOutput>) -> Self {
        output.set(false);
        Self {
            output,
            timer: AlarmTimer::new(),
            duration: Duration::from_millis(config.duration_ms),
            active: false,
            raised: 0,
        }
    }

    /// Switch the alarm on and (re)arm the auto-stop deadline
    pub fn raise(&mut self, now: Instant) {
        self.output.set(true);
        self.timer.arm(now, self.duration);
        self.active = true;
        self.raised += 1;
        debug!("Alarm raised, auto-stop in {:?}", self.duration);
    }

    /// Switch the alarm off and drop any pending deadline
    pub fn clear(&mut self) {
        self.output.set(false);
        self.timer.cancel();
        if self.active {
            debug!("Alarm cleared");
        }
        self.active = false;
    }

    /// Apply the auto-stop deadline. Returns `true` if it fired now.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.timer.poll_expired(now) {
            self.output.set(false);
            self.active = false;
            info!("Alarm auto-stopped after {:?}", self.duration);
            return true;
        }
        false
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn timer(&self) -> &AlarmTimer {
        &self.timer
    }

    /// Number of `raise` calls so far
    pub fn raised_count(&self) -> u32 {
        self.raised
    }
}
