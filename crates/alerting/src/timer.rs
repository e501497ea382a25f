//! Single-deadline alarm timer

use std::time::Duration;

use tokio::time::Instant;

/// At most one armed deadline. Re-arming replaces the previous deadline and
/// an expiry is reported exactly once.
#[derive(Debug, Clone, Default)]
pub struct AlarmTimer {
    deadline: Option<Instant>,
}

impl AlarmTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: Instant, duration: Duration) {
        self.deadline = Some(now + duration);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before expiry, `None` when disarmed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Returns `true` the first time it is polled at or after the deadline
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
