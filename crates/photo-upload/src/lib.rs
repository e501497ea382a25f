//! Photo Upload Module
//!
//! Moves one camera frame across the pause/resume boundary:
//! - Chunked copy into independently allocated buffers
//! - Large-tier-first allocation with small-tier fallback
//! - Strictly ordered, sub-chunked transmission
//! - HTTP delivery with status classification

pub mod memory;
pub mod photo;
pub mod upload;

pub use memory::{ChunkAllocator, ChunkBuffer, MemoryTier, TierUsage, TieredAllocator};
pub use photo::{PhotoConfig, SegmentedPhoto};
pub use upload::{
    transmit, ChannelSink, ChunkSink, HttpUploader, MockUploader, PhotoUploader, UploadConfig,
    UploadOutcome,
};

use thiserror::Error;

/// Errors raised while building a segmented photo
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhotoError {
    #[error("Source frame is empty")]
    EmptyFrame,

    #[error("Photo of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("Allocation of chunk {index} ({size} bytes) failed in every memory tier")]
    AllocationFailed { index: usize, size: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while transmitting a photo
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Write failed at byte {offset}: {reason}")]
    Write { offset: usize, reason: String },

    #[error("Upload timed out")]
    Timeout,

    #[error("No response status received")]
    NoStatus,

    #[error("Configuration error: {0}")]
    Config(String),
}
