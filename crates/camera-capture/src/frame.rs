//! Frame handle and pixel formats

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SourceId;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb565,
    Rgb888,
    Yuv422,
    Grayscale,
    Jpeg,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => Some(2),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Grayscale => Some(1),
            PixelFormat::Jpeg => None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }
}

/// Exclusive handle to one driver frame buffer.
///
/// A `Frame` is neither `Clone` nor `Copy`: exactly one stage
/// owns it at a time, and the owner hands it back with
/// [`FrameSource::release`](crate::FrameSource::release), which consumes it.
#[must_use = "frames must be released back to their source"]
pub struct Frame {
    source: u64,
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Capture time in microseconds since the source started
    timestamp_us: u64,
    sequence: u64,
    buffer_id: usize,
}

impl Frame {
    /// Wrap a filled driver buffer owned by `source`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &SourceId,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_us: u64,
        sequence: u64,
        buffer_id: usize,
    ) -> Self {
        Self {
            source: source.raw(),
            data,
            width,
            height,
            format,
            timestamp_us,
            sequence,
            buffer_id,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
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

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Driver buffer slot this frame occupies
    pub fn buffer_id(&self) -> usize {
        self.buffer_id
    }

    /// Whether this frame was lent out by `source`
    pub fn belongs_to(&self, source: &SourceId) -> bool {
        self.source == source.raw()
    }

    /// Give the backing storage back to the driver that owns it
    pub(crate) fn into_buffer(self) -> (usize, Vec<u8>) {
        (self.buffer_id, self.data)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .field("timestamp_us", &self.timestamp_us)
            .field("sequence", &self.sequence)
            .field("buffer_id", &self.buffer_id)
            .finish()
    }
}
