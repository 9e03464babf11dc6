//! Decoder abstraction module
//!
//! This module defines the `Decoder` trait the cache pulls frames from. A
//! decoder reports the geometry and count of its frames, supplies the raw
//! per-index timestamps used to build the table of contents, and decodes a
//! single frame into a caller-provided buffer.
//!
//! # Reentrancy
//!
//! The cache never decodes the same index twice concurrently. Whether it may
//! decode *different* indices concurrently is the decoder's call, declared
//! through [`Decoder::concurrency`]. A [`DecodeConcurrency::Serialized`]
//! decoder has every `read_frame_into` and `raw_timestamps` call funnelled
//! through the cache's disk lock.

use crate::error::DecodeError;
use crate::timestamp::{RawTimestamps, Timestamp};

/// Zero-based frame index.
pub type FrameIndex = u32;

/// Row stride alignment in bytes for cached pixel buffers.
pub const ROW_ALIGNMENT: usize = 16;

/// Bytes per pixel of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelDepth {
    Depth8,
    Depth16,
    Depth32,
}

impl PixelDepth {
    pub fn bytes(self) -> usize {
        match self {
            PixelDepth::Depth8 => 1,
            PixelDepth::Depth16 => 2,
            PixelDepth::Depth32 => 4,
        }
    }
}

/// Fixed geometry of every frame a decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub depth: PixelDepth,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, depth: PixelDepth) -> Self {
        Self { width, height, depth }
    }

    /// Row stride, padded up to [`ROW_ALIGNMENT`].
    pub fn row_bytes(&self) -> usize {
        let raw = self.width as usize * self.depth.bytes();
        raw.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

/// Whether a decoder tolerates concurrent decodes of different indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeConcurrency {
    /// Different indices may be decoded on different threads at once.
    Reentrant,
    /// All decoder calls must be serialized.
    Serialized,
}

/// The Decoder trait defines the interface the cache consumes.
pub trait Decoder: Send + Sync {
    /// Whether the decoder opened its source successfully.
    fn is_valid(&self) -> bool;

    fn geometry(&self) -> FrameGeometry;

    /// Size of the buffer `read_frame_into` fills.
    fn bytes_per_frame(&self) -> usize {
        self.geometry().bytes_per_frame()
    }

    fn frame_count(&self) -> u32;

    /// Average frame rate in frames per second.
    fn average_rate(&self) -> f64;

    /// Declared reentrancy. Deliberately has no default.
    fn concurrency(&self) -> DecodeConcurrency;

    /// Raw per-index timestamps. May be a slow metadata scan.
    fn raw_timestamps(&self) -> Result<RawTimestamps, DecodeError>;

    /// Decode frame `index` into `buffer` (exactly `bytes_per_frame` long),
    /// returning the frame's timestamp.
    fn read_frame_into(&self, index: FrameIndex, buffer: &mut [u8]) -> Result<Timestamp, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_bytes_alignment() {
        assert_eq!(FrameGeometry::new(16, 1, PixelDepth::Depth8).row_bytes(), 16);
        assert_eq!(FrameGeometry::new(17, 1, PixelDepth::Depth8).row_bytes(), 32);
        assert_eq!(FrameGeometry::new(10, 1, PixelDepth::Depth16).row_bytes(), 32);
        assert_eq!(FrameGeometry::new(0, 4, PixelDepth::Depth32).row_bytes(), 0);
    }

    #[test]
    fn test_bytes_per_frame() {
        let g = FrameGeometry::new(20, 10, PixelDepth::Depth8);
        assert_eq!(g.bytes_per_frame(), 32 * 10);
        let g = FrameGeometry::new(640, 480, PixelDepth::Depth32);
        assert_eq!(g.bytes_per_frame(), 640 * 4 * 480);
    }
}
