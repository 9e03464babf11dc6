// Eviction ledger module
// Tracks which slots are free and which cached frames are "unlocked"
// (referenced only by the cache, hence evictable), ordered by the last time
// they were released.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::decoder::FrameIndex;
use crate::slot::SlotId;

#[derive(Debug)]
pub(crate) struct EvictionLedger {
    free: VecDeque<SlotId>,
    // touch counter -> frame, oldest first
    unlocked: BTreeMap<u64, FrameIndex>,
    // frame -> touch counter
    touched_at: HashMap<FrameIndex, u64>,
    next_touch: u64,
    overflow_limit: usize,
}

impl EvictionLedger {
    /// All `total_slots` slots start free.
    pub fn new(total_slots: usize, overflow_limit: usize) -> Self {
        Self {
            free: (0..total_slots).collect(),
            unlocked: BTreeMap::new(),
            touched_at: HashMap::new(),
            next_touch: 0,
            overflow_limit,
        }
    }

    pub fn overflow_limit(&self) -> usize {
        self.overflow_limit
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn unlocked_len(&self) -> usize {
        self.unlocked.len()
    }

    #[cfg(test)]
    pub fn is_unlocked(&self, frame: FrameIndex) -> bool {
        self.touched_at.contains_key(&frame)
    }

    /// A free slot should back the next load when the free pool is still
    /// above the overflow limit, or when nothing is evictable.
    pub fn prefers_free_slot(&self) -> bool {
        self.free.len() > self.overflow_limit || self.unlocked.is_empty()
    }

    /// Too many frames are resident; an unlocked frame must go.
    pub fn over_budget(&self) -> bool {
        self.free.len() < self.overflow_limit
    }

    pub fn pop_free(&mut self) -> Option<SlotId> {
        self.free.pop_front()
    }

    pub fn push_free(&mut self, slot: SlotId) {
        debug_assert!(!self.free.contains(&slot), "slot {slot} freed twice");
        self.free.push_back(slot);
    }

    /// Record `frame` as unlocked with a fresh touch value.
    /// Returns false if it was already unlocked.
    pub fn touch(&mut self, frame: FrameIndex) -> bool {
        if self.touched_at.contains_key(&frame) {
            return false;
        }
        let touch = self.next_touch;
        self.next_touch += 1;
        self.unlocked.insert(touch, frame);
        self.touched_at.insert(frame, touch);
        true
    }

    /// Take `frame` out of the unlocked set. Returns false if absent.
    pub fn remove(&mut self, frame: FrameIndex) -> bool {
        match self.touched_at.remove(&frame) {
            Some(touch) => {
                let removed = self.unlocked.remove(&touch);
                debug_assert_eq!(removed, Some(frame));
                true
            }
            None => false,
        }
    }

    /// Remove and return the least recently unlocked frame.
    pub fn pop_oldest(&mut self) -> Option<FrameIndex> {
        let (_, frame) = self.unlocked.pop_first()?;
        self.touched_at.remove(&frame);
        Some(frame)
    }

    #[cfg(test)]
    pub fn unlocked_frames(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.unlocked.values().copied()
    }

    /// Both views of the unlocked set agree.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.unlocked.len() == self.touched_at.len()
            && self
                .unlocked
                .iter()
                .all(|(touch, frame)| self.touched_at.get(frame) == Some(touch))
    }
}
