//! Memory tiers for photo chunks
//!
//! Each tier has a byte budget. A chunk reserves its size from one tier and
//! gives it back when dropped, so a partially built photo frees everything
//! simply by going out of scope.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a chunk was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    /// Large, slower external RAM; tried first
    External,
    /// Small, fast internal RAM; fallback
    Internal,
}

/// Allocation capability for chunk buffers
pub trait ChunkAllocator: Send + Sync {
    /// Allocate an empty buffer able to hold `size` bytes, or `None`
    fn allocate(&self, size: usize) -> Option<ChunkBuffer>;
}

#[derive(Debug)]
struct TierPool {
    tier: MemoryTier,
    capacity: usize,
    used: AtomicUsize,
}

impl TierPool {
    fn new(tier: MemoryTier, capacity: usize) -> Self {
        Self {
            tier,
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    fn try_reserve(&self, size: usize) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(size).filter(|total| *total <= self.capacity)
            })
            .is_ok()
    }

    fn give_back(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::SeqCst);
    }
}

/// One chunk of photo data holding a reservation in its tier
pub struct ChunkBuffer {
    data: Vec<u8>,
    reserved: usize,
    pool: Arc<TierPool>,
}

impl ChunkBuffer {
    pub fn tier(&self) -> MemoryTier {
        self.pool.tier
    }

    /// Append bytes; the buffer never grows past its reservation
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let room = self.reserved - self.data.len();
        let n = bytes.len().min(room);
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        self.pool.give_back(self.reserved);
    }
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("tier", &self.pool.tier)
            .field("len", &self.data.len())
            .field("reserved", &self.reserved)
            .finish()
    }
}

/// Bytes reserved in each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierUsage {
    pub external: usize,
    pub internal: usize,
}

/// Budgeted two-tier allocator, external first
#[derive(Debug, Clone)]
pub struct TieredAllocator {
    external: Arc<TierPool>,
    internal: Arc<TierPool>,
}

impl TieredAllocator {
    pub fn new(external_bytes: usize, internal_bytes: usize) -> Self {
        Self {
            external: Arc::new(TierPool::new(MemoryTier::External, external_bytes)),
            internal: Arc::new(TierPool::new(MemoryTier::Internal, internal_bytes)),
        }
    }

    pub fn usage(&self) -> TierUsage {
        TierUsage {
            external: self.external.used.load(Ordering::SeqCst),
            internal: self.internal.used.load(Ordering::SeqCst),
        }
    }
}

impl ChunkAllocator for TieredAllocator {
    fn allocate(&self, size: usize) -> Option<ChunkBuffer> {
        for pool in [&self.external, &self.internal] {
            if !pool.try_reserve(size) {
                continue;
            }
            let mut data = Vec::new();
            if data.try_reserve_exact(size).is_err() {
                pool.give_back(size);
                continue;
            }
            if pool.tier == MemoryTier::Internal {
                debug!("External tier exhausted, chunk of {} bytes placed internally", size);
            }
            return Some(ChunkBuffer {
                data,
                reserved: size,
                pool: Arc::clone(pool),
            });
        }
        None
    }
}
