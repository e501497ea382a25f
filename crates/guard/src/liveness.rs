//! Cooperative liveness watchdog
//!
//! Each long-running stage registers, then heartbeats on every loop
//! iteration. A stage about to block on a slow external call (the photo
//! upload) deregisters first and registers again afterwards, so a slow
//! network is never mistaken for a hang.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// Watched pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Capture,
    Inference,
    Control,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Capture, Stage::Inference, Stage::Control];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Inference => "inference",
            Stage::Control => "control",
        }
    }

    fn index(self) -> usize {
        match self {
            Stage::Capture => 0,
            Stage::Inference => 1,
            Stage::Control => 2,
        }
    }
}

/// Liveness monitor capability
pub trait LivenessMonitor: Send + Sync {
    fn register(&self, stage: Stage);
    fn deregister(&self, stage: Stage);
    fn heartbeat(&self, stage: Stage);
}

/// Watchdog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// How often registered stages are checked (milliseconds)
    pub poll_interval_ms: u64,
    /// Heartbeat age at which a registered stage is considered hung
    pub stale_threshold_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            stale_threshold_ms: 5_000,
        }
    }
}

#[derive(Default)]
struct StageSlot {
    registered: AtomicBool,
    last_beat_ms: AtomicU64,
}

pub struct Watchdog {
    slots: [StageSlot; 3],
    stale_threshold_ms: u64,
    started: Instant,
    triggered: AtomicBool,
    reason: Mutex<Option<Stage>>,
}

impl Watchdog {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            slots: Default::default(),
            stale_threshold_ms: config.stale_threshold_ms,
            started: Instant::now(),
            triggered: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn slot(&self, stage: Stage) -> &StageSlot {
        &self.slots[stage.index()]
    }

    pub fn is_registered(&self, stage: Stage) -> bool {
        self.slot(stage).registered.load(Ordering::SeqCst)
    }

    /// First registered stage whose last heartbeat is too old
    pub fn stale_stage(&self) -> Option<Stage> {
        let now = self.now_ms();
        Stage::ALL.into_iter().find(|stage| {
            let slot = self.slot(*stage);
            slot.registered.load(Ordering::SeqCst)
                && now.saturating_sub(slot.last_beat_ms.load(Ordering::SeqCst))
                    > self.stale_threshold_ms
        })
    }

    pub fn trip(&self, stage: Stage) {
        if let Ok(mut guard) = self.reason.lock() {
            *guard = Some(stage);
        }
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<Stage> {
        match self.reason.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        }
    }
}

impl LivenessMonitor for Watchdog {
    fn register(&self, stage: Stage) {
        let slot = self.slot(stage);
        slot.last_beat_ms.store(self.now_ms(), Ordering::SeqCst);
        if !slot.registered.swap(true, Ordering::SeqCst) {
            debug!("Watchdog: {} registered", stage.label());
        }
    }

    fn deregister(&self, stage: Stage) {
        if self.slot(stage).registered.swap(false, Ordering::SeqCst) {
            debug!("Watchdog: {} deregistered", stage.label());
        }
    }

    fn heartbeat(&self, stage: Stage) {
        self.slot(stage)
            .last_beat_ms
            .store(self.now_ms(), Ordering::SeqCst);
    }
}

/// Poll the watchdog until shutdown. A stale stage trips the watchdog,
/// raises the shutdown flag and wakes `stop` so the supervisor can restart
/// the process.
pub fn spawn_watchdog(
    watchdog: Arc<Watchdog>,
    config: &LivenessConfig,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
) -> JoinHandle<()> {
    let poll = Duration::from_millis(config.poll_interval_ms.max(1));
    tokio::spawn(async move {
        while !shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(poll).await;
            if let Some(stage) = watchdog.stale_stage() {
                error!(
                    "Watchdog detected stalled {} stage; requesting restart",
                    stage.label()
                );
                watchdog.trip(stage);
                shutdown.store(true, Ordering::SeqCst);
                stop.notify_one();
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog() -> Arc<Watchdog> {
        Arc::new(Watchdog::new(&LivenessConfig {
            poll_interval_ms: 100,
            stale_threshold_ms: 1_000,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_stage_is_never_stale() {
        let dog = watchdog();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(dog.stale_stage(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_are_detected() {
        let dog = watchdog();
        dog.register(Stage::Inference);
        tokio::time::advance(Duration::from_millis(800)).await;
        dog.heartbeat(Stage::Inference);
        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(dog.stale_stage(), None);
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(dog.stale_stage(), Some(Stage::Inference));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistered_stage_may_block() {
        let dog = watchdog();
        dog.register(Stage::Control);
        dog.deregister(Stage::Control);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(dog.stale_stage(), None);

        dog.register(Stage::Control);
        assert!(dog.is_registered(Stage::Control));
        assert_eq!(dog.stale_stage(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_watchdog_requests_shutdown() {
        let dog = watchdog();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());
        dog.register(Stage::Capture);

        let task = spawn_watchdog(
            dog.clone(),
            &LivenessConfig {
                poll_interval_ms: 100,
                stale_threshold_ms: 1_000,
            },
            shutdown.clone(),
            stop.clone(),
        );
        task.await.unwrap();

        assert!(shutdown.load(Ordering::SeqCst));
        // The wake-up is kept for a waiter that arrives late
        tokio::time::timeout(Duration::from_millis(1), stop.notified())
            .await
            .unwrap();
        assert!(dog.is_triggered());
        assert_eq!(dog.reason(), Some(Stage::Capture));
    }
}
