//! framecache-rs: random-access, bounded-memory frame cache over a sequential decoder
//!
//! A [`FrameCache`] sits in front of a [`Decoder`] and hands out
//! [`FrameHandle`]s by frame index or exact timestamp. Each index is decoded
//! at most once at a time no matter how many threads ask for it, held frames
//! are never evicted, and released frames are recycled least recently
//! released first once the cache is over its target size.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libframecache::testlib::SyntheticDecoder;
//! use libframecache::FrameCache;
//!
//! let decoder = Arc::new(SyntheticDecoder::new(100, 64, 64));
//! let cache = FrameCache::builder().cache_size(8).prefetch(true).build(decoder)?;
//! cache.prefetch_range(10, 4);
//! let frame = cache.get_frame(10)?;
//! println!("{} at {}", frame.index(), frame.timestamp());
//! # Ok::<(), libframecache::CacheError>(())
//! ```

pub mod cache;
pub mod decoder;
pub mod error;
pub mod handle;
mod ledger;
mod pending;
mod prefetch;
pub mod registry;
mod slot;
pub mod testlib;
pub mod timestamp;
pub mod toc;

pub use cache::{CacheId, CacheStats, FrameCache, FrameCacheBuilder};
pub use decoder::{DecodeConcurrency, Decoder, FrameGeometry, FrameIndex, PixelDepth, ROW_ALIGNMENT};
pub use error::{CacheError, CacheResult, DecodeError};
pub use handle::{FrameHandle, FrameRef};
pub use registry::CacheRegistry;
pub use timestamp::{RawTimestamps, Timestamp};

static CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate semantic version string.
pub fn version() -> &'static str { CRATE_VERSION }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver_like() { assert!(version().split('.').count() >= 3); }
}
