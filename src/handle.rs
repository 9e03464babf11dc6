// Frame handles
// A `FrameHandle` is a locked frame: while it lives the frame cannot be
// evicted and its pixels cannot change. Cloning takes another reference;
// dropping releases one. `FrameRef` names a frame without locking it.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::MappedRwLockReadGuard;

use crate::cache::{CacheId, CacheShared, Grant};
use crate::decoder::{FrameGeometry, FrameIndex};
use crate::error::{CacheError, CacheResult};
use crate::slot::SlotId;
use crate::timestamp::Timestamp;

/// A decoded frame locked in the cache.
pub struct FrameHandle {
    shared: Arc<CacheShared>,
    index: FrameIndex,
    slot: SlotId,
    timestamp: Timestamp,
}

impl FrameHandle {
    pub(crate) fn new(shared: Arc<CacheShared>, index: FrameIndex, grant: Grant) -> Self {
        Self { shared, index, slot: grant.slot, timestamp: grant.timestamp }
    }

    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.shared.geometry()
    }

    /// Id of the cache this frame lives in.
    pub fn cache_id(&self) -> CacheId {
        self.shared.id()
    }

    /// Row-padded pixel data. Stride is `geometry().row_bytes()`.
    pub fn pixels(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        self.shared.buffers().read(self.slot)
    }

    /// Unlock the frame now. Same as dropping the handle.
    pub fn release(self) {}
}

impl Clone for FrameHandle {
    fn clone(&self) -> Self {
        self.shared.retain(self.slot);
        Self { shared: Arc::clone(&self.shared), index: self.index, slot: self.slot, timestamp: self.timestamp }
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.shared.unlock_frame(self.index, self.slot);
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("cache", &self.shared.id())
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// An unlocked reference to a frame. Does not keep the cache alive, and
/// stops working once the `FrameCache` is dropped even if handles remain.
#[derive(Clone)]
pub struct FrameRef {
    shared: Weak<CacheShared>,
    index: FrameIndex,
}

impl FrameRef {
    pub(crate) fn new(shared: Weak<CacheShared>, index: FrameIndex) -> Self {
        Self { shared, index }
    }

    pub fn index(&self) -> FrameIndex {
        self.index
    }

    /// Lock the frame, decoding it if needed.
    pub fn lock(&self) -> CacheResult<FrameHandle> {
        let shared = CacheShared::upgrade_open(&self.shared).ok_or(CacheError::CacheInvalid)?;
        shared.get_frame(self.index)
    }

    /// Queue the frame for prefetching. False if the cache has been dropped
    /// or has no prefetch worker.
    pub fn prefetch(&self) -> bool {
        CacheShared::upgrade_open(&self.shared).is_some_and(|shared| shared.prefetch(self.index))
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef").field("index", &self.index).finish_non_exhaustive()
    }
}
