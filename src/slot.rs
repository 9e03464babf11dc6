// Slot pool module
// A fixed set of slots created with the cache. Each slot owns one pixel
// buffer of the cache's frame geometry. Bookkeeping (assigned index,
// reference count, timestamp) lives in `SlotTable` under the cache lock;
// the pixels live in `SlotBuffers` behind a per-slot RwLock so decoding and
// reading never need the cache lock.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::decoder::FrameIndex;
use crate::timestamp::Timestamp;

pub(crate) type SlotId = usize;

/// Bookkeeping for one slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlotMeta {
    /// Frame currently held, `None` while free or on loan to a loader.
    pub frame: Option<FrameIndex>,
    pub timestamp: Option<Timestamp>,
    /// References including the cache's own. 0 = free, 1 = cache only or on loan.
    pub refs: usize,
}

#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Vec<SlotMeta>,
}

impl SlotTable {
    pub fn new(count: usize) -> Self {
        Self { slots: vec![SlotMeta::default(); count] }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: SlotId) -> &SlotMeta {
        &self.slots[id]
    }

    pub fn refs(&self, id: SlotId) -> usize {
        self.slots[id].refs
    }

    /// Hand a free slot to a loader.
    pub fn lend(&mut self, id: SlotId) {
        let slot = &mut self.slots[id];
        debug_assert_eq!(slot.refs, 0, "lending a referenced slot");
        slot.frame = None;
        slot.timestamp = None;
        slot.refs = 1;
    }

    /// Detach an evicted slot from its frame, keeping the cache reference
    /// so it can be handed straight to a loader.
    pub fn detach(&mut self, id: SlotId) {
        let slot = &mut self.slots[id];
        debug_assert_eq!(slot.refs, 1, "detaching a held slot");
        slot.frame = None;
        slot.timestamp = None;
    }

    pub fn assign(&mut self, id: SlotId, frame: FrameIndex, timestamp: Timestamp) {
        let slot = &mut self.slots[id];
        slot.frame = Some(frame);
        slot.timestamp = Some(timestamp);
    }

    pub fn acquire(&mut self, id: SlotId) -> usize {
        self.slots[id].refs += 1;
        self.slots[id].refs
    }

    /// Drop one reference, returning the remaining count.
    pub fn release(&mut self, id: SlotId) -> usize {
        let slot = &mut self.slots[id];
        debug_assert!(slot.refs > 0, "releasing an unreferenced slot");
        slot.refs = slot.refs.saturating_sub(1);
        slot.refs
    }

    /// Return a slot to the free state.
    pub fn reset(&mut self, id: SlotId) {
        self.slots[id] = SlotMeta::default();
    }
}

/// Pixel storage for every slot. Buffers are materialised on first load and
/// released when the slot goes back to the free queue.
#[derive(Debug)]
pub(crate) struct SlotBuffers {
    buffers: Box<[RwLock<Vec<u8>>]>,
    bytes_per_frame: usize,
    materialized: AtomicUsize,
}

impl SlotBuffers {
    pub fn new(count: usize, bytes_per_frame: usize) -> Self {
        let buffers = (0..count).map(|_| RwLock::new(Vec::new())).collect();
        Self { buffers, bytes_per_frame, materialized: AtomicUsize::new(0) }
    }

    /// Writable buffer for a slot on loan, allocated if needed.
    pub fn write(&self, id: SlotId) -> RwLockWriteGuard<'_, Vec<u8>> {
        let mut buffer = self.buffers[id].write();
        if buffer.len() != self.bytes_per_frame {
            buffer.resize(self.bytes_per_frame, 0);
            self.materialized.fetch_add(1, Ordering::Relaxed);
        }
        buffer
    }

    pub fn read(&self, id: SlotId) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.buffers[id].read(), |buffer| buffer.as_slice())
    }

    /// Free the pixel memory of a slot nobody references.
    pub fn release_storage(&self, id: SlotId) {
        let mut buffer = self.buffers[id].write();
        if !buffer.is_empty() {
            *buffer = Vec::new();
            self.materialized.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Number of slots currently holding pixel memory.
    pub fn materialized(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lend_assign_release() {
        let mut table = SlotTable::new(2);
        table.lend(1);
        assert_eq!(table.refs(1), 1);
        assert_eq!(table.get(1).frame, None);

        table.assign(1, 7, Timestamp::from_nanos(70));
        assert_eq!(table.acquire(1), 2);
        assert_eq!(table.get(1).frame, Some(7));
        assert_eq!(table.release(1), 1);

        table.reset(1);
        assert_eq!(table.refs(1), 0);
        assert_eq!(table.get(1).timestamp, None);
    }

    #[test]
    fn test_detach_keeps_cache_reference() {
        let mut table = SlotTable::new(1);
        table.lend(0);
        table.assign(0, 3, Timestamp::ZERO);
        table.detach(0);
        assert_eq!(table.refs(0), 1);
        assert_eq!(table.get(0).frame, None);
    }

    #[test]
    fn test_buffers_materialize_lazily() {
        let buffers = SlotBuffers::new(3, 64);
        assert_eq!(buffers.materialized(), 0);
        assert!(buffers.read(0).is_empty());

        buffers.write(0)[5] = 9;
        assert_eq!(buffers.materialized(), 1);
        assert_eq!(buffers.read(0).len(), 64);
        assert_eq!(buffers.read(0)[5], 9);

        // Reuse does not reallocate.
        drop(buffers.write(0));
        assert_eq!(buffers.materialized(), 1);

        buffers.release_storage(0);
        buffers.release_storage(1);
        assert_eq!(buffers.materialized(), 0);
        assert!(buffers.read(0).is_empty());
    }
}
