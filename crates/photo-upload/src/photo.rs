//! Segmented photo buffer

use camera_capture::{Frame, PixelFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{ChunkAllocator, ChunkBuffer, PhotoError};

/// Photo capture and chunking limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    /// Frames larger than this are rejected outright (bytes)
    pub max_photo_bytes: usize,
    /// Size of each independently allocated chunk (bytes)
    pub max_chunk_bytes: usize,
    /// Budget of the large external memory tier (bytes)
    pub external_budget_bytes: usize,
    /// Budget of the small internal memory tier (bytes)
    pub internal_budget_bytes: usize,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            max_photo_bytes: 1_000_000,
            max_chunk_bytes: 131_072,
            external_budget_bytes: 4 * 1024 * 1024,
            internal_budget_bytes: 256 * 1024,
        }
    }
}

impl PhotoConfig {
    pub fn validate(&self) -> Result<(), PhotoError> {
        if self.max_chunk_bytes == 0 {
            return Err(PhotoError::Config("max_chunk_bytes must be non-zero".into()));
        }
        if self.max_photo_bytes == 0 {
            return Err(PhotoError::Config("max_photo_bytes must be non-zero".into()));
        }
        Ok(())
    }
}

/// Chunked copy of one frame.
///
/// Owns its chunk buffers; dropping or releasing the photo returns every
/// chunk to its memory tier.
#[derive(Debug)]
pub struct SegmentedPhoto {
    id: Uuid,
    captured_at: DateTime<Utc>,
    chunks: Vec<ChunkBuffer>,
    total_len: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
}

impl SegmentedPhoto {
    /// Copy `frame` into freshly allocated chunks.
    ///
    /// Either every chunk is allocated and filled, or nothing stays
    /// allocated. The frame is only borrowed; the caller releases it.
    pub fn create(
        frame: &Frame,
        allocator: &dyn ChunkAllocator,
        config: &PhotoConfig,
    ) -> Result<Self, PhotoError> {
        if frame.is_empty() {
            return Err(PhotoError::EmptyFrame);
        }
        let total_len = frame.len();
        if total_len > config.max_photo_bytes {
            warn!(
                "Photo too large: {} bytes (max {})",
                total_len, config.max_photo_bytes
            );
            return Err(PhotoError::TooLarge {
                size: total_len,
                max: config.max_photo_bytes,
            });
        }
        let chunk_size = config.max_chunk_bytes.max(1);

        let mut chunks = Vec::with_capacity(total_len.div_ceil(chunk_size));
        for (index, source) in frame.data().chunks(chunk_size).enumerate() {
            let Some(mut chunk) = allocator.allocate(source.len()) else {
                warn!(
                    "Chunk {} allocation failed, releasing {} allocated chunks",
                    index,
                    chunks.len()
                );
                return Err(PhotoError::AllocationFailed {
                    index,
                    size: source.len(),
                });
            };
            chunk.fill_from(source);
            chunks.push(chunk);
        }

        info!(
            "Photo captured: {} bytes in {} chunks ({}x{} {:?})",
            total_len,
            chunks.len(),
            frame.width(),
            frame.height(),
            frame.format()
        );

        Ok(Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            chunks,
            total_len,
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
            sequence: frame.sequence(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[ChunkBuffer] {
        &self.chunks
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Sequence number of the source frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn content_type(&self) -> &'static str {
        match self.format {
            PixelFormat::Jpeg => "image/jpeg",
            _ => "application/octet-stream",
        }
    }

    /// Chunks split into network writes of at most `max_write` bytes,
    /// in index order
    pub fn write_slices(&self, max_write: usize) -> impl Iterator<Item = &[u8]> + '_ {
        let max_write = max_write.max(1);
        self.chunks
            .iter()
            .flat_map(move |chunk| chunk.as_slice().chunks(max_write))
    }

    /// Free every chunk
    pub fn release(self) {
        info!(
            "Photo {} released ({} bytes, {} chunks)",
            self.id,
            self.total_len,
            self.chunks.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryTier, TieredAllocator};
    use camera_capture::SourceId;

    fn frame(len: usize, format: PixelFormat) -> Frame {
        let data = (0..len).map(|i| (i % 251) as u8).collect();
        Frame::new(&SourceId::new(), data, 320, 240, format, 0, 42, 0)
    }

    fn small_config() -> PhotoConfig {
        PhotoConfig {
            max_photo_bytes: 10_000,
            max_chunk_bytes: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_chunks_cover_frame_in_order() {
        let config = small_config();
        let alloc = TieredAllocator::new(100_000, 0);
        let source = frame(2500, PixelFormat::Rgb565);

        let photo = SegmentedPhoto::create(&source, &alloc, &config).unwrap();
        assert_eq!(photo.total_len(), 2500);
        assert_eq!(photo.chunk_count(), 3);
        let sizes: Vec<usize> = photo.chunks().iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);

        let joined: Vec<u8> = photo.write_slices(256).flatten().copied().collect();
        assert_eq!(joined, source.data());
        assert!(photo.write_slices(256).all(|s| s.len() <= 256));
        assert_eq!(photo.sequence(), 42);
        assert_eq!(photo.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let config = small_config();
        let alloc = TieredAllocator::new(100_000, 0);
        assert_eq!(
            SegmentedPhoto::create(&frame(0, PixelFormat::Jpeg), &alloc, &config).unwrap_err(),
            PhotoError::EmptyFrame
        );
        assert_eq!(
            SegmentedPhoto::create(&frame(10_001, PixelFormat::Jpeg), &alloc, &config)
                .unwrap_err(),
            PhotoError::TooLarge {
                size: 10_001,
                max: 10_000
            }
        );
        assert_eq!(alloc.usage().external, 0);
    }

    #[test]
    fn test_falls_back_across_tiers() {
        let config = small_config();
        let alloc = TieredAllocator::new(2000, 1000);
        let photo = SegmentedPhoto::create(&frame(2500, PixelFormat::Jpeg), &alloc, &config).unwrap();
        let tiers: Vec<MemoryTier> = photo.chunks().iter().map(|c| c.tier()).collect();
        assert_eq!(
            tiers,
            vec![MemoryTier::External, MemoryTier::External, MemoryTier::Internal]
        );
        assert_eq!(photo.content_type(), "image/jpeg");

        photo.release();
        assert_eq!(alloc.usage().external, 0);
        assert_eq!(alloc.usage().internal, 0);
    }

    #[test]
    fn test_allocation_failure_is_atomic() {
        let config = small_config();
        let alloc = TieredAllocator::new(1500, 500);
        let err = SegmentedPhoto::create(&frame(3000, PixelFormat::Rgb565), &alloc, &config)
            .unwrap_err();
        assert_eq!(err, PhotoError::AllocationFailed { index: 1, size: 1000 });
        assert_eq!(alloc.usage().external, 0);
        assert_eq!(alloc.usage().internal, 0);
    }

    #[test]
    fn test_default_limits() {
        let config = PhotoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_chunk_bytes, 131_072);
        let bad = PhotoConfig {
            max_chunk_bytes: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
