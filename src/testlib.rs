//! Test utilities for framecache-rs
// Provides a synthetic in-memory decoder and helpers to steer it from tests,
// benches and the demo binary.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::decoder::{DecodeConcurrency, Decoder, FrameGeometry, FrameIndex, PixelDepth};
use crate::error::DecodeError;
use crate::timestamp::{RawTimestamps, Timestamp};

/// Timescale of the default synthetic timestamps (ticks per second).
pub const SYNTHETIC_SCALE: u32 = 30;

/// Pixel value the synthetic decoder writes at `(x, y)` of frame `index`.
/// Checkerboard of 8x8 cells whose shade depends on the frame index.
pub fn expected_pixel(index: FrameIndex, x: usize, y: usize) -> u8 {
    let v = ((index % 255) as u8).saturating_add(1);
    if (x / 8 + y / 8) % 2 == 0 {
        v
    } else {
        v.saturating_sub(1)
    }
}

/// Fill a row-padded buffer with the synthetic pattern of frame `index`.
pub fn fill_frame(index: FrameIndex, geometry: FrameGeometry, buffer: &mut [u8]) {
    let depth = geometry.depth.bytes();
    let stride = geometry.row_bytes();
    for (y, row) in buffer.chunks_mut(stride).take(geometry.height as usize).enumerate() {
        for x in 0..geometry.width as usize {
            let value = expected_pixel(index, x, y);
            row[x * depth..(x + 1) * depth].fill(value);
        }
    }
}

/// A latch that holds decodes until opened. Clones share the latch.
#[derive(Clone, Default)]
pub struct DecodeGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    arrived: usize,
}

impl DecodeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.inner.state.lock().open = true;
        self.inner.changed.notify_all();
    }

    /// Number of decodes that have reached the gate so far.
    pub fn arrived(&self) -> usize {
        self.inner.state.lock().arrived
    }

    /// Block until `count` decodes have reached the gate or `timeout` passes.
    /// Returns whether the count was reached.
    pub fn wait_for_arrivals(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.arrived < count {
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return state.arrived >= count;
            }
        }
        true
    }

    fn pass(&self) {
        let mut state = self.inner.state.lock();
        state.arrived += 1;
        self.inner.changed.notify_all();
        while !state.open {
            self.inner.changed.wait(&mut state);
        }
    }
}

/// In-memory decoder producing a deterministic pattern per frame.
pub struct SyntheticDecoder {
    valid: bool,
    frame_count: u32,
    geometry: FrameGeometry,
    rate: f64,
    concurrency: DecodeConcurrency,
    raw: RawTimestamps,
    delay: Duration,
    gate: Option<DecodeGate>,
    decodes: Mutex<HashMap<FrameIndex, usize>>,
    failures: Mutex<HashMap<FrameIndex, DecodeError>>,
    panics: Mutex<HashSet<FrameIndex>>,
    timestamp_failure: Mutex<Option<DecodeError>>,
    timestamp_scans: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl SyntheticDecoder {
    /// `frame_count` frames of `width` x `height` 8-bit pixels at 30 fps.
    pub fn new(frame_count: u32, width: u32, height: u32) -> Self {
        Self {
            valid: true,
            frame_count,
            geometry: FrameGeometry::new(width, height, PixelDepth::Depth8),
            rate: SYNTHETIC_SCALE as f64,
            concurrency: DecodeConcurrency::Reentrant,
            raw: RawTimestamps::new((0..frame_count as i64).collect(), SYNTHETIC_SCALE),
            delay: Duration::ZERO,
            gate: None,
            decodes: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(HashSet::new()),
            timestamp_failure: Mutex::new(None),
            timestamp_scans: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    pub fn with_depth(mut self, depth: PixelDepth) -> Self {
        self.geometry.depth = depth;
        self
    }

    pub fn with_raw_timestamps(mut self, values: Vec<i64>, scale: u32) -> Self {
        self.raw = RawTimestamps::new(values, scale);
        self
    }

    /// Sleep this long inside every decode.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold every decode at `gate` until it is opened.
    pub fn with_gate(mut self, gate: DecodeGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn serialized(mut self) -> Self {
        self.concurrency = DecodeConcurrency::Serialized;
        self
    }

    /// Report the source as failed to open.
    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Make every later decode of `index` fail with `error`.
    pub fn fail_frame(&self, index: FrameIndex, error: DecodeError) {
        self.failures.lock().insert(index, error);
    }

    /// Make every later decode of `index` panic.
    pub fn panic_on_frame(&self, index: FrameIndex) {
        self.panics.lock().insert(index);
    }

    /// Make the timestamp scan fail with `error`.
    pub fn fail_timestamps(&self, error: DecodeError) {
        *self.timestamp_failure.lock() = Some(error);
    }

    /// Number of times `index` has been decoded.
    pub fn decode_count(&self, index: FrameIndex) -> usize {
        self.decodes.lock().get(&index).copied().unwrap_or(0)
    }

    pub fn total_decodes(&self) -> usize {
        self.decodes.lock().values().sum()
    }

    pub fn timestamp_scans(&self) -> usize {
        self.timestamp_scans.load(Ordering::SeqCst)
    }

    /// Highest number of decodes observed running at once.
    pub fn peak_concurrent_decodes(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Timestamp the decoder reports for `index`.
    pub fn timestamp_of(&self, index: FrameIndex) -> Option<Timestamp> {
        let raw = *self.raw.values.get(index as usize)?;
        Timestamp::from_raw(raw, self.raw.scale)
    }
}

impl Decoder for SyntheticDecoder {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn average_rate(&self) -> f64 {
        self.rate
    }

    fn concurrency(&self) -> DecodeConcurrency {
        self.concurrency
    }

    fn raw_timestamps(&self) -> Result<RawTimestamps, DecodeError> {
        self.timestamp_scans.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = *self.timestamp_failure.lock() {
            return Err(error);
        }
        Ok(self.raw.clone())
    }

    fn read_frame_into(&self, index: FrameIndex, buffer: &mut [u8]) -> Result<Timestamp, DecodeError> {
        *self.decodes.lock().entry(index).or_insert(0) += 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.panics.lock().contains(&index) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            panic!("synthetic decoder panicked on frame {index}");
        }

        let result = match self.failures.lock().get(&index) {
            Some(&error) => Err(error),
            None if index >= self.frame_count || buffer.len() != self.geometry.bytes_per_frame() => {
                Err(DecodeError::FileRead)
            }
            None => {
                fill_frame(index, self.geometry, buffer);
                self.timestamp_of(index).ok_or(DecodeError::FileFormat)
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
