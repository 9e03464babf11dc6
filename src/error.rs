//! Error types for the frame cache.
//!
//! `DecodeError` is what a decoder reports; every variant is fatal to the
//! cache that observes it. `CacheError` is what callers of the cache see.

use thiserror::Error;

/// Failures reported by a decoder. Any of these flips the owning cache to invalid.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeError {
    #[error("Video cache: video file initialization error")]
    FileInit,
    #[error("Video cache: video file seek error")]
    FileSeek,
    #[error("Video cache: video file read error")]
    FileRead,
    #[error("Video cache: video file close error")]
    FileClose,
    #[error("Video cache: video file invalid/corrupted error")]
    FileFormat,
    #[error("Video cache: video file format unsupported error")]
    FileUnsupported,
    #[error("Video cache: video file revision unsupported error")]
    FileRevUnsupported,
    #[error("Video cache: Inadequate system resources")]
    SystemResources,
    #[error("Video cache: unsupported byte order error")]
    BomUnsupported,
    #[error("Video cache: unsupported image depth error")]
    DepthUnsupported,
    #[error("Video cache: unintialized or unknown error")]
    Uninitialized,
}

/// Errors returned by cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Index or timestamp outside the known range. Does not affect validity.
    #[error("Video cache: no video frame at given timestamp/frame index")]
    NoSuchFrame,
    /// A previous fatal error put the cache in an invalid state.
    #[error("Video cache: previous error put cache in invalid state")]
    CacheInvalid,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Video cache: invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Whether this error permanently invalidates the cache that produced it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CacheError::NoSuchFrame)
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!CacheError::NoSuchFrame.is_fatal());
        assert!(CacheError::CacheInvalid.is_fatal());
        assert!(CacheError::Decode(DecodeError::FileRead).is_fatal());
    }

    #[test]
    fn test_decode_error_converts_transparently() {
        let err: CacheError = DecodeError::DepthUnsupported.into();
        assert_eq!(err, CacheError::Decode(DecodeError::DepthUnsupported));
        assert_eq!(err.to_string(), "Video cache: unsupported image depth error");
    }
}
