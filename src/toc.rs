//! Table of contents: the bidirectional frame index ↔ timestamp map.
//!
//! Built once from the decoder's raw timestamps and read-only afterwards.
//! Construction rejects any sequence that is not strictly increasing by
//! index; a source whose timestamps go backwards is treated as corrupt.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::decoder::FrameIndex;
use crate::error::DecodeError;
use crate::timestamp::{RawTimestamps, Timestamp};

#[derive(Debug, Clone)]
pub struct Toc {
    index_to_time: Vec<Timestamp>,
    time_to_index: BTreeMap<Timestamp, FrameIndex>,
}

impl Toc {
    /// Build from raw decoder timestamps, expecting exactly `frame_count` entries.
    pub fn build(raw: &RawTimestamps, frame_count: u32) -> Result<Self, DecodeError> {
        if raw.values.len() != frame_count as usize {
            tracing::error!(
                expected = frame_count,
                actual = raw.values.len(),
                "timestamp count does not match frame count"
            );
            return Err(DecodeError::FileFormat);
        }
        let mut times = Vec::with_capacity(raw.values.len());
        for &value in &raw.values {
            let ts = Timestamp::from_raw(value, raw.scale).ok_or(DecodeError::FileFormat)?;
            times.push(ts);
        }
        Self::from_timestamps(times)
    }

    /// Build from already converted timestamps.
    pub fn from_timestamps(times: Vec<Timestamp>) -> Result<Self, DecodeError> {
        if let Some(pos) = times.windows(2).position(|w| w[1] <= w[0]) {
            tracing::error!(
                index = pos + 1,
                previous = %times[pos],
                current = %times[pos + 1],
                "frame timestamps are not strictly increasing"
            );
            return Err(DecodeError::FileFormat);
        }
        let time_to_index = times
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i as FrameIndex))
            .collect();
        Ok(Self { index_to_time: times, time_to_index })
    }

    pub fn len(&self) -> usize {
        self.index_to_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_time.is_empty()
    }

    pub fn frame_index_to_timestamp(&self, index: FrameIndex) -> Option<Timestamp> {
        self.index_to_time.get(index as usize).copied()
    }

    /// Exact-match lookup.
    pub fn timestamp_to_frame_index(&self, time: Timestamp) -> Option<FrameIndex> {
        self.time_to_index.get(&time).copied()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.index_to_time.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.index_to_time.last().copied()
    }

    /// First timestamp strictly after `goal`.
    pub fn next_timestamp(&self, goal: Timestamp) -> Option<Timestamp> {
        self.time_to_index
            .range((Excluded(goal), Unbounded))
            .next()
            .map(|(&t, _)| t)
    }

    /// Last timestamp strictly before `goal`.
    pub fn prev_timestamp(&self, goal: Timestamp) -> Option<Timestamp> {
        self.time_to_index.range(..goal).next_back().map(|(&t, _)| t)
    }

    /// Nearest timestamp to `goal`. Goals outside the range clamp to the
    /// first/last frame; an exact midpoint resolves to the later frame.
    pub fn closest_timestamp(&self, goal: Timestamp) -> Option<Timestamp> {
        let at_or_before = self.time_to_index.range(..=goal).next_back().map(|(&t, _)| t);
        let after = self.next_timestamp(goal);
        match (at_or_before, after) {
            (Some(before), Some(after)) => {
                if after.distance(goal) <= goal.distance(before) {
                    Some(after)
                } else {
                    Some(before)
                }
            }
            (Some(before), None) => Some(before),
            (None, after) => after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toc(nanos: &[i64]) -> Toc {
        Toc::from_timestamps(nanos.iter().map(|&n| Timestamp::from_nanos(n)).collect()).unwrap()
    }

    fn ts(n: i64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    #[test]
    fn test_build_rejects_non_increasing() {
        let raw = RawTimestamps::new(vec![0, 10, 10, 20], 1_000_000_000);
        assert_eq!(Toc::build(&raw, 4).unwrap_err(), DecodeError::FileFormat);
        let raw = RawTimestamps::new(vec![0, 10, 5], 1_000_000_000);
        assert_eq!(Toc::build(&raw, 3).unwrap_err(), DecodeError::FileFormat);
    }

    #[test]
    fn test_build_rejects_count_mismatch() {
        let raw = RawTimestamps::new(vec![0, 1, 2], 30);
        assert_eq!(Toc::build(&raw, 4).unwrap_err(), DecodeError::FileFormat);
    }

    #[test]
    fn test_build_scales_raw_values() {
        let raw = RawTimestamps::new(vec![0, 1, 2], 2);
        let toc = Toc::build(&raw, 3).unwrap();
        assert_eq!(toc.frame_index_to_timestamp(2), Some(ts(1_000_000_000)));
        assert_eq!(toc.timestamp_to_frame_index(ts(500_000_000)), Some(1));
    }

    #[test]
    fn test_bidirectional_lookup() {
        let toc = toc(&[0, 40, 80, 120]);
        assert_eq!(toc.len(), 4);
        for i in 0..4u32 {
            let t = toc.frame_index_to_timestamp(i).unwrap();
            assert_eq!(toc.timestamp_to_frame_index(t), Some(i));
        }
        assert_eq!(toc.frame_index_to_timestamp(4), None);
        assert_eq!(toc.timestamp_to_frame_index(ts(41)), None);
    }

    #[test]
    fn test_next_and_prev() {
        let toc = toc(&[0, 40, 80]);
        assert_eq!(toc.next_timestamp(ts(0)), Some(ts(40)));
        assert_eq!(toc.next_timestamp(ts(-10)), Some(ts(0)));
        assert_eq!(toc.next_timestamp(ts(80)), None);
        assert_eq!(toc.prev_timestamp(ts(80)), Some(ts(40)));
        assert_eq!(toc.prev_timestamp(ts(41)), Some(ts(40)));
        assert_eq!(toc.prev_timestamp(ts(0)), None);
    }

    #[test]
    fn test_first_and_last() {
        let toc = toc(&[5, 6, 7]);
        assert_eq!(toc.first_timestamp(), Some(ts(5)));
        assert_eq!(toc.last_timestamp(), Some(ts(7)));
    }

    #[test]
    fn test_closest_picks_nearer_neighbour() {
        let toc = toc(&[0, 40, 80]);
        assert_eq!(toc.closest_timestamp(ts(10)), Some(ts(0)));
        assert_eq!(toc.closest_timestamp(ts(30)), Some(ts(40)));
        assert_eq!(toc.closest_timestamp(ts(40)), Some(ts(40)));
    }

    #[test]
    fn test_closest_tie_goes_to_later_frame() {
        let toc = toc(&[0, 40, 80]);
        assert_eq!(toc.closest_timestamp(ts(20)), Some(ts(40)));
        assert_eq!(toc.closest_timestamp(ts(60)), Some(ts(80)));
    }

    #[test]
    fn test_closest_clamps_out_of_range_goals() {
        let toc = toc(&[0, 40, 80]);
        assert_eq!(toc.closest_timestamp(ts(-100)), Some(ts(0)));
        assert_eq!(toc.closest_timestamp(ts(1_000)), Some(ts(80)));
    }
}
