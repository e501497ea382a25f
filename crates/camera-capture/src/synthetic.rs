//! Synthetic pooled camera
//!
//! Behaves like a DMA camera driver with a fixed number of frame buffers:
//! `acquire` fails with `CameraError::Busy` once every buffer is lent out,
//! and buffers come back only through `release`. Counters make buffer leaks
//! observable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};

use crate::{CameraConfig, CameraError, Frame, FrameSource, PixelFormat, SourceId};

/// Snapshot of pool accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub busy: u64,
    pub foreign: u64,
}

impl PoolStats {
    /// Buffers currently owned by callers
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

pub struct SyntheticCamera {
    id: SourceId,
    config: CameraConfig,
    /// `Some` = free buffer parked in the driver, `None` = lent out
    slots: Mutex<Vec<Option<Vec<u8>>>>,
    offline: AtomicBool,
    sequence: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    busy: AtomicU64,
    foreign: AtomicU64,
    started: Instant,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        if config.buffer_count == 0 {
            return Err(CameraError::Open("buffer_count must be at least 1".to_string()));
        }
        if config.width == 0 || config.height == 0 {
            return Err(CameraError::Format(format!(
                "{}x{} is not a valid resolution",
                config.width, config.height
            )));
        }

        let frame_len = Self::frame_len(&config);
        let slots = (0..config.buffer_count)
            .map(|_| Some(vec![0u8; frame_len]))
            .collect();

        debug!(
            "Synthetic camera: {}x{} {:?}, {} buffers of {} bytes",
            config.width, config.height, config.format, config.buffer_count, frame_len
        );

        Ok(Self {
            id: SourceId::new(),
            config,
            slots: Mutex::new(slots),
            offline: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            foreign: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    fn frame_len(config: &CameraConfig) -> usize {
        // Compressed frames get a fixed budget of 1/4 byte per pixel
        config
            .frame_bytes()
            .unwrap_or((config.width as usize * config.height as usize / 4).max(4))
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Simulate a sensor that stops delivering frames
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            busy: self.busy.load(Ordering::SeqCst),
            foreign: self.foreign.load(Ordering::SeqCst),
        }
    }

    fn fill(&self, buf: &mut [u8], sequence: u64) {
        if self.config.format == PixelFormat::Jpeg && buf.len() >= 4 {
            let end = buf.len();
            buf.fill(sequence as u8);
            buf[0..2].copy_from_slice(&[0xFF, 0xD8]);
            buf[end - 2..].copy_from_slice(&[0xFF, 0xD9]);
        } else {
            buf.fill(sequence as u8);
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn acquire(&self) -> Result<Frame, CameraError> {
        if self.offline.load(Ordering::SeqCst) {
            self.busy.fetch_add(1, Ordering::SeqCst);
            return Err(CameraError::Busy);
        }

        let (buffer_id, mut data) = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|e| CameraError::Driver(format!("Lock error: {}", e)))?;
            let free = slots
                .iter_mut()
                .enumerate()
                .find_map(|(id, slot)| slot.take().map(|buf| (id, buf)));
            match free {
                Some(found) => found,
                None => {
                    self.busy.fetch_add(1, Ordering::SeqCst);
                    return Err(CameraError::Busy);
                }
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.fill(&mut data, sequence);
        self.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(Frame::new(
            &self.id,
            data,
            self.config.width,
            self.config.height,
            self.config.format,
            self.started.elapsed().as_micros() as u64,
            sequence,
            buffer_id,
        ))
    }

    fn release(&self, frame: Frame) {
        if !frame.belongs_to(&self.id) {
            self.foreign.fetch_add(1, Ordering::SeqCst);
            warn!(
                "Ignoring release of {} from another source",
                CameraError::ForeignFrame(frame.buffer_id())
            );
            return;
        }

        let (buffer_id, data) = frame.into_buffer();
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match slots.get_mut(buffer_id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(data);
                self.released.fetch_add(1, Ordering::SeqCst);
            }
            _ => {
                self.foreign.fetch_add(1, Ordering::SeqCst);
                warn!("Ignoring release of {}", CameraError::ForeignFrame(buffer_id));
            }
        }
    }
}
