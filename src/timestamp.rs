// Timestamp module
// Frame presentation times as signed nanosecond ticks, plus the raw
// (ticks, scale) form decoders report them in.

use std::fmt;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A frame presentation time. Totally ordered; one per frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e9).round() as i64)
    }

    /// Convert a raw decoder value expressed in `scale` ticks per second.
    /// Returns `None` for a zero scale or a value that does not fit.
    pub fn from_raw(raw: i64, scale: u32) -> Option<Self> {
        if scale == 0 {
            return None;
        }
        let nanos = (raw as i128) * NANOS_PER_SEC / (scale as i128);
        i64::try_from(nanos).ok().map(Self)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Absolute distance between two timestamps in nanoseconds.
    pub fn distance(self, other: Timestamp) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Per-index timestamps as a decoder stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTimestamps {
    /// One value per frame index.
    pub values: Vec<i64>,
    /// Ticks per second.
    pub scale: u32,
}

impl RawTimestamps {
    pub fn new(values: Vec<i64>, scale: u32) -> Self {
        Self { values, scale }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw() {
        assert_eq!(Timestamp::from_raw(1, 30), Some(Timestamp::from_nanos(33_333_333)));
        assert_eq!(Timestamp::from_raw(600, 600), Some(Timestamp::from_nanos(1_000_000_000)));
        assert_eq!(Timestamp::from_raw(1, 0), None);
        assert_eq!(Timestamp::from_raw(i64::MAX, 1), None);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Timestamp::from_nanos(-5);
        let b = Timestamp::from_nanos(10);
        assert_eq!(a.distance(b), 15);
        assert_eq!(b.distance(a), 15);
    }

    #[test]
    fn test_secs_roundtrip() {
        let t = Timestamp::from_secs_f64(1.5);
        assert_eq!(t.as_nanos(), 1_500_000_000);
        assert_eq!(t.as_secs_f64(), 1.5);
    }
}
