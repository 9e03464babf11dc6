// Cache module
// Turns a sequential decoder into a random-access frame source with a
// bounded number of resident frames.
//
// A lookup runs in three phases. Phase A (under the cache lock) either hits,
// queues behind a load already in flight, or picks a slot for a new load.
// Phase B decodes into that slot with no cache lock held. Phase C (under the
// cache lock) publishes the frame and hands it to every queued requester, or
// fails all of them. Frames held by callers carry a reference and are never
// evicted; only frames referenced by the cache alone sit in the eviction
// ledger.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Condvar, Mutex};

use crate::decoder::{DecodeConcurrency, Decoder, FrameGeometry, FrameIndex};
use crate::error::{CacheError, CacheResult, DecodeError};
use crate::handle::{FrameHandle, FrameRef};
use crate::ledger::EvictionLedger;
use crate::pending::{PendingLoads, Ticket};
use crate::prefetch::{self, PrefetchRequest, PrefetchSender, PrefetchTarget, PrefetchWorker};
use crate::registry::CacheRegistry;
use crate::slot::{SlotBuffers, SlotId, SlotTable};
use crate::timestamp::Timestamp;
use crate::toc::Toc;

/// Stable identifier assigned to each cache at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheId(u32);

impl CacheId {
    fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        CacheId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache-{}", self.0)
    }
}

/// Point-in-time view of the cache bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Frames published in the cache, held or not.
    pub resident: usize,
    /// Slots with no frame and no loader.
    pub free: usize,
    /// Resident frames referenced only by the cache.
    pub unlocked: usize,
    /// Frames being decoded right now.
    pub loading: usize,
    /// Requesters queued behind an in-flight decode.
    pub waiting: usize,
    pub total_slots: usize,
    pub cache_size: usize,
    pub overflow_limit: usize,
    /// Slots currently holding pixel memory.
    pub materialized: usize,
}

/// Everything guarded by the cache lock.
struct CacheState {
    cached: HashMap<FrameIndex, SlotId>,
    slots: SlotTable,
    ledger: EvictionLedger,
    pending: PendingLoads,
    hits: u64,
    misses: u64,
    fatal: Option<CacheError>,
}

/// What phase A decided.
enum Allocation {
    Hit(Grant),
    Wait(Ticket),
    Load { slot: SlotId, ticket: Ticket },
}

/// A slot handed to a requester, with one reference taken on its behalf.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Grant {
    pub slot: SlotId,
    pub timestamp: Timestamp,
}

/// Fails an in-flight load whose decode unwound, so its waiters are woken
/// and the slot goes back to the free queue.
struct LoadGuard<'a> {
    shared: &'a CacheShared,
    index: FrameIndex,
    slot: SlotId,
    ticket: Ticket,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::error!(cache = %self.shared.id, index = self.index, "decoder panicked during load");
        let _ = self.shared.insert(self.index, self.slot, self.ticket, Err(DecodeError::Uninitialized));
    }
}

/// State shared by the cache owner, handles, the prefetch worker and the registry.
pub(crate) struct CacheShared {
    id: CacheId,
    decoder: Arc<dyn Decoder>,
    geometry: FrameGeometry,
    frame_count: u32,
    average_rate: f64,
    cache_size: usize,
    buffers: SlotBuffers,
    state: Mutex<CacheState>,
    // Broadcast whenever a load completes or the cache turns invalid.
    loaded: Condvar,
    // Serializes TOC construction, and decoding for non-reentrant decoders.
    disk: Mutex<()>,
    toc: OnceLock<Toc>,
    prefetch_queue: Option<PrefetchSender>,
    // Set when the owning `FrameCache` is dropped.
    closed: AtomicBool,
}

impl CacheShared {
    /// Upgrade a weak reference, unless the owning cache has been dropped.
    /// Outstanding handles keep the state alive but no new work may start.
    pub(crate) fn upgrade_open(weak: &Weak<Self>) -> Option<Arc<Self>> {
        weak.upgrade().filter(|shared| !shared.closed.load(Ordering::Acquire))
    }

    pub(crate) fn id(&self) -> CacheId {
        self.id
    }

    pub(crate) fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub(crate) fn buffers(&self) -> &SlotBuffers {
        &self.buffers
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.state.lock().fatal.is_none()
    }

    /// Look up `index`, decoding it if needed, and return a locked handle.
    pub(crate) fn get_frame(self: &Arc<Self>, index: FrameIndex) -> CacheResult<FrameHandle> {
        let grant = self.acquire(index)?;
        Ok(FrameHandle::new(Arc::clone(self), index, grant))
    }

    pub(crate) fn frame_ref(self: &Arc<Self>, index: FrameIndex) -> CacheResult<FrameRef> {
        if !self.is_valid() {
            return Err(CacheError::CacheInvalid);
        }
        if index >= self.frame_count {
            return Err(CacheError::NoSuchFrame);
        }
        Ok(FrameRef::new(Arc::downgrade(self), index))
    }

    /// Queue a prefetch. Returns false when prefetching is disabled.
    pub(crate) fn prefetch(&self, index: FrameIndex) -> bool {
        match &self.prefetch_queue {
            Some(queue) => queue.send(PrefetchRequest::Frame(index)).is_ok(),
            None => false,
        }
    }

    fn acquire(&self, index: FrameIndex) -> CacheResult<Grant> {
        if index >= self.frame_count {
            return if self.is_valid() { Err(CacheError::NoSuchFrame) } else { Err(CacheError::CacheInvalid) };
        }
        match self.allocate(index)? {
            Allocation::Hit(grant) => Ok(grant),
            Allocation::Wait(ticket) => self.wait_for(index, ticket),
            Allocation::Load { slot, ticket } => {
                let mut guard = LoadGuard { shared: self, index, slot, ticket, armed: true };
                let decoded = self.load(index, slot);
                guard.armed = false;
                self.insert(index, slot, ticket, decoded)
            }
        }
    }

    // Phase A.
    fn allocate(&self, index: FrameIndex) -> CacheResult<Allocation> {
        let mut state = self.state.lock();
        if state.fatal.is_some() {
            return Err(CacheError::CacheInvalid);
        }

        if let Some(&slot) = state.cached.get(&index) {
            if state.ledger.remove(index) {
                debug_assert_eq!(state.slots.refs(slot), 1);
            }
            state.slots.acquire(slot);
            state.hits += 1;
            let timestamp = state.slots.get(slot).timestamp.unwrap_or_default();
            tracing::trace!(cache = %self.id, index, slot, "cache hit");
            return Ok(Allocation::Hit(Grant { slot, timestamp }));
        }

        if let Some(ticket) = state.pending.join(index) {
            tracing::trace!(cache = %self.id, index, "waiting on in-flight load");
            return Ok(Allocation::Wait(ticket));
        }

        let slot = if state.ledger.prefers_free_slot() {
            match state.ledger.pop_free() {
                Some(slot) => {
                    state.slots.lend(slot);
                    slot
                }
                None => return Err(self.invariant_violation(&mut state, "no free slot and nothing evictable")),
            }
        } else {
            match self.evict_oldest(&mut state) {
                Some(slot) => {
                    state.slots.detach(slot);
                    slot
                }
                None => return Err(self.invariant_violation(&mut state, "unlocked frame without a slot")),
            }
        };

        state.misses += 1;
        debug_assert!(!state.pending.contains(index));
        let ticket = state.pending.begin(index);
        tracing::trace!(cache = %self.id, index, slot, "cache miss");
        Ok(Allocation::Load { slot, ticket })
    }

    /// Detach the least recently unlocked frame from the index, returning its slot.
    fn evict_oldest(&self, state: &mut CacheState) -> Option<SlotId> {
        let victim = state.ledger.pop_oldest()?;
        let slot = state.cached.remove(&victim)?;
        debug_assert_eq!(state.slots.refs(slot), 1, "evicting a held frame");
        tracing::debug!(cache = %self.id, evicted = victim, slot, "evicted frame");
        Some(slot)
    }

    // Phase B. No cache lock held.
    fn load(&self, index: FrameIndex, slot: SlotId) -> Result<Timestamp, DecodeError> {
        let _serial = match self.decoder.concurrency() {
            DecodeConcurrency::Serialized => Some(self.disk.lock()),
            DecodeConcurrency::Reentrant => None,
        };
        let mut buffer = self.buffers.write(slot);
        self.decoder.read_frame_into(index, &mut buffer)
    }

    // Phase C.
    fn insert(
        &self,
        index: FrameIndex,
        slot: SlotId,
        ticket: Ticket,
        decoded: Result<Timestamp, DecodeError>,
    ) -> CacheResult<Grant> {
        let mut state = self.state.lock();
        let Some(load) = state.pending.complete(index) else {
            return Err(self.invariant_violation(&mut state, "completed load was not pending"));
        };
        debug_assert_eq!(load.loader, ticket);

        let outcome = match (decoded, state.fatal.is_some()) {
            (Ok(timestamp), false) => {
                state.slots.assign(slot, index, timestamp);
                state.cached.insert(index, slot);
                state.slots.acquire(slot);
                for &waiter in &load.waiters {
                    state.slots.acquire(slot);
                    state.pending.deliver(waiter, Ok(slot));
                }
                tracing::trace!(cache = %self.id, index, slot, waiters = load.waiters.len(), "frame loaded");
                Ok(Grant { slot, timestamp })
            }
            (Ok(_), true) => {
                self.return_to_free(&mut state, slot);
                for &waiter in &load.waiters {
                    state.pending.deliver(waiter, Err(CacheError::CacheInvalid));
                }
                Err(CacheError::CacheInvalid)
            }
            (Err(err), _) => {
                let err = CacheError::Decode(err);
                tracing::error!(cache = %self.id, index, error = %err, "frame decode failed");
                self.mark_fatal(&mut state, err.clone());
                self.return_to_free(&mut state, slot);
                for &waiter in &load.waiters {
                    state.pending.deliver(waiter, Err(err.clone()));
                }
                Err(err)
            }
        };
        drop(state);
        self.loaded.notify_all();
        outcome
    }

    /// Suspend until the load `ticket` is queued on has been resolved.
    fn wait_for(&self, index: FrameIndex, ticket: Ticket) -> CacheResult<Grant> {
        let mut state = self.state.lock();
        loop {
            if let Some(delivery) = state.pending.take(ticket) {
                let slot = delivery?;
                if state.fatal.is_some() {
                    self.release_locked(&mut state, index, slot);
                    return Err(CacheError::CacheInvalid);
                }
                let timestamp = state.slots.get(slot).timestamp.unwrap_or_default();
                return Ok(Grant { slot, timestamp });
            }
            if state.fatal.is_some() {
                state.pending.abandon(index, ticket);
                return Err(CacheError::CacheInvalid);
            }
            // Woken for any completed load; loop to check our own ticket.
            self.loaded.wait(&mut state);
        }
    }

    /// Take one more reference on a held frame.
    pub(crate) fn retain(&self, slot: SlotId) {
        let mut state = self.state.lock();
        let refs = state.slots.acquire(slot);
        debug_assert!(refs > 2, "retaining a frame nobody holds");
    }

    /// Drop one caller reference on `index`.
    pub(crate) fn unlock_frame(&self, index: FrameIndex, slot: SlotId) {
        let mut state = self.state.lock();
        self.release_locked(&mut state, index, slot);
    }

    fn release_locked(&self, state: &mut CacheState, index: FrameIndex, slot: SlotId) {
        if state.cached.get(&index) != Some(&slot) || state.slots.get(slot).frame != Some(index) {
            self.invariant_violation(state, "released frame is not resident");
            return;
        }
        if state.slots.release(slot) != 1 {
            return;
        }
        state.ledger.touch(index);
        if state.ledger.over_budget() {
            if let Some(evicted) = self.evict_oldest(state) {
                self.return_to_free(state, evicted);
            }
        }
    }

    fn return_to_free(&self, state: &mut CacheState, slot: SlotId) {
        state.slots.reset(slot);
        self.buffers.release_storage(slot);
        state.ledger.push_free(slot);
    }

    fn mark_fatal(&self, state: &mut CacheState, err: CacheError) {
        if state.fatal.is_none() {
            tracing::error!(cache = %self.id, error = %err, "cache is now invalid");
            state.fatal = Some(err);
        }
    }

    /// Record a fatal error discovered outside the load path and wake waiters.
    fn fail(&self, err: CacheError) {
        let mut state = self.state.lock();
        self.mark_fatal(&mut state, err);
        drop(state);
        self.loaded.notify_all();
    }

    fn invariant_violation(&self, state: &mut CacheState, what: &str) -> CacheError {
        tracing::error!(cache = %self.id, what, "cache bookkeeping invariant violated");
        debug_assert!(false, "cache invariant violated: {what}");
        self.mark_fatal(state, CacheError::CacheInvalid);
        self.loaded.notify_all();
        CacheError::CacheInvalid
    }

    /// The table of contents, built on first use.
    fn toc(&self) -> CacheResult<&Toc> {
        if !self.is_valid() {
            return Err(CacheError::CacheInvalid);
        }
        if let Some(toc) = self.toc.get() {
            return Ok(toc);
        }
        let _disk = self.disk.lock();
        if let Some(toc) = self.toc.get() {
            return Ok(toc);
        }
        let built = self
            .decoder
            .raw_timestamps()
            .and_then(|raw| Toc::build(&raw, self.frame_count));
        match built {
            Ok(toc) => {
                tracing::debug!(cache = %self.id, frames = toc.len(), "table of contents built");
                Ok(self.toc.get_or_init(|| toc))
            }
            Err(err) => {
                let err = CacheError::Decode(err);
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            resident: state.cached.len(),
            free: state.ledger.free_len(),
            unlocked: state.ledger.unlocked_len(),
            loading: state.pending.loading(),
            waiting: state.pending.waiting(),
            total_slots: state.slots.len(),
            cache_size: self.cache_size,
            overflow_limit: state.ledger.overflow_limit(),
            materialized: self.buffers.materialized(),
        }
    }
}

impl PrefetchTarget for CacheShared {
    fn warm(&self, index: FrameIndex) -> Result<(), CacheError> {
        let grant = self.acquire(index)?;
        self.unlock_frame(index, grant.slot);
        Ok(())
    }
}

/// Builder for a `FrameCache`.
#[derive(Debug, Clone, Default)]
pub struct FrameCacheBuilder {
    cache_size: usize,       // 0 = limited by memory only
    max_memory_bytes: usize, // 0 = unlimited
    prefetch: bool,
    registry: Option<Arc<CacheRegistry>>,
}

impl FrameCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target number of resident frames.
    pub fn cache_size(mut self, frames: usize) -> Self {
        self.cache_size = frames;
        self
    }

    /// Upper bound on pixel memory for resident frames.
    pub fn max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Start a background prefetch worker.
    pub fn prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    /// Make the cache reachable by id through `registry` until it is dropped.
    pub fn register_with(mut self, registry: Arc<CacheRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self, decoder: Arc<dyn Decoder>) -> CacheResult<FrameCache> {
        if !decoder.is_valid() {
            return Err(DecodeError::FileInit.into());
        }
        let frame_count = decoder.frame_count();
        if frame_count == 0 {
            return Err(CacheError::InvalidConfig("decoder reports no frames".into()));
        }
        let bytes_per_frame = decoder.bytes_per_frame();
        if bytes_per_frame == 0 {
            return Err(CacheError::InvalidConfig("decoder reports empty frames".into()));
        }

        let total_slots = frame_count as usize;
        let cache_size = resolve_cache_size(total_slots, bytes_per_frame, self.cache_size, self.max_memory_bytes)?;
        let overflow_limit = total_slots.checked_sub(cache_size).ok_or_else(|| {
            CacheError::InvalidConfig(format!("cache size {cache_size} exceeds slot count {total_slots}"))
        })?;

        let id = CacheId::next();
        let (queue, receiver) = if self.prefetch {
            let (tx, rx) = prefetch::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let shared = Arc::new(CacheShared {
            id,
            geometry: decoder.geometry(),
            frame_count,
            average_rate: decoder.average_rate(),
            cache_size,
            buffers: SlotBuffers::new(total_slots, bytes_per_frame),
            state: Mutex::new(CacheState {
                cached: HashMap::with_capacity(cache_size),
                slots: SlotTable::new(total_slots),
                ledger: EvictionLedger::new(total_slots, overflow_limit),
                pending: PendingLoads::new(),
                hits: 0,
                misses: 0,
                fatal: None,
            }),
            loaded: Condvar::new(),
            disk: Mutex::new(()),
            toc: OnceLock::new(),
            prefetch_queue: queue.clone(),
            closed: AtomicBool::new(false),
            decoder,
        });

        let prefetcher = match (queue, receiver) {
            (Some(tx), Some(rx)) => {
                let worker = PrefetchWorker::spawn(format!("{id}-prefetch"), Arc::clone(&shared), tx, rx)
                    .map_err(|err| {
                        tracing::error!(cache = %id, error = %err, "failed to start prefetch worker");
                        CacheError::Decode(DecodeError::SystemResources)
                    })?;
                Some(worker)
            }
            _ => None,
        };

        if let Some(registry) = &self.registry {
            registry.insert(&shared);
        }

        tracing::info!(
            cache = %id,
            frame_count,
            cache_size,
            overflow_limit,
            bytes_per_frame,
            prefetch = self.prefetch,
            "frame cache created"
        );

        Ok(FrameCache { shared, prefetcher, registry: self.registry })
    }
}

/// Resident-frame target: the frame count, capped by the memory budget, then
/// by the requested size.
fn resolve_cache_size(
    frame_count: usize,
    bytes_per_frame: usize,
    requested: usize,
    max_memory_bytes: usize,
) -> CacheResult<usize> {
    let mut size = frame_count;
    if max_memory_bytes != 0 {
        size = size.min(max_memory_bytes / bytes_per_frame);
        if size == 0 {
            tracing::error!(max_memory_bytes, bytes_per_frame, "memory budget holds no frames");
            return Err(DecodeError::SystemResources.into());
        }
    }
    if requested != 0 {
        size = size.min(requested);
    }
    Ok(size)
}

/// Random-access, bounded-memory cache over a `Decoder`.
pub struct FrameCache {
    shared: Arc<CacheShared>,
    prefetcher: Option<PrefetchWorker>,
    registry: Option<Arc<CacheRegistry>>,
}

impl FrameCache {
    /// Create a cache. `cache_size` and `max_memory_bytes` of 0 mean "no limit".
    pub fn new(
        decoder: Arc<dyn Decoder>,
        cache_size: usize,
        max_memory_bytes: usize,
        prefetch: bool,
    ) -> CacheResult<Self> {
        FrameCacheBuilder::new()
            .cache_size(cache_size)
            .max_memory_bytes(max_memory_bytes)
            .prefetch(prefetch)
            .build(decoder)
    }

    pub fn builder() -> FrameCacheBuilder {
        FrameCacheBuilder::new()
    }

    pub fn id(&self) -> CacheId {
        self.shared.id
    }

    pub(crate) fn shared(&self) -> &Arc<CacheShared> {
        &self.shared
    }

    /// Get frame `index`, decoding it if it is not resident. The frame stays
    /// locked in the cache until the handle is dropped.
    pub fn get_frame(&self, index: FrameIndex) -> CacheResult<FrameHandle> {
        self.shared.get_frame(index)
    }

    /// Get the frame at exactly `time`.
    pub fn get_frame_at(&self, time: Timestamp) -> CacheResult<FrameHandle> {
        let index = self.timestamp_to_frame_index(time)?;
        self.shared.get_frame(index)
    }

    /// An unlocked reference to frame `index`; nothing is decoded yet.
    pub fn frame_ref(&self, index: FrameIndex) -> CacheResult<FrameRef> {
        self.shared.frame_ref(index)
    }

    pub fn frame_ref_at(&self, time: Timestamp) -> CacheResult<FrameRef> {
        let index = self.timestamp_to_frame_index(time)?;
        self.shared.frame_ref(index)
    }

    /// Ask the prefetch worker to warm `index`. Returns false when prefetch is off.
    pub fn prefetch(&self, index: FrameIndex) -> bool {
        self.shared.prefetch(index)
    }

    /// Queue `count` frames starting at `start`, clipped to the frame count.
    /// Returns how many were queued.
    pub fn prefetch_range(&self, start: FrameIndex, count: u32) -> usize {
        let end = start.saturating_add(count).min(self.shared.frame_count);
        (start..end).take_while(|&index| self.shared.prefetch(index)).count()
    }

    pub fn cache_hits(&self) -> u64 {
        self.shared.state.lock().hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.shared.state.lock().misses
    }

    pub fn is_valid(&self) -> bool {
        self.shared.is_valid()
    }

    /// The error that invalidated the cache, if any.
    pub fn fatal_error(&self) -> Option<CacheError> {
        self.shared.state.lock().fatal.clone()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.stats()
    }

    /// Number of live handles on a resident frame, or `None` if not resident.
    pub fn outstanding_handles(&self, index: FrameIndex) -> Option<usize> {
        let state = self.shared.state.lock();
        let slot = *state.cached.get(&index)?;
        Some(state.slots.refs(slot).saturating_sub(1))
    }

    pub fn is_resident(&self, index: FrameIndex) -> bool {
        self.shared.state.lock().cached.contains_key(&index)
    }

    pub fn frame_count(&self) -> u32 {
        self.shared.frame_count
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.shared.geometry
    }

    pub fn average_rate(&self) -> f64 {
        self.shared.average_rate
    }

    /// Resolved target number of resident frames.
    pub fn cache_size(&self) -> usize {
        self.shared.cache_size
    }

    pub fn frame_index_to_timestamp(&self, index: FrameIndex) -> CacheResult<Timestamp> {
        self.shared.toc()?.frame_index_to_timestamp(index).ok_or(CacheError::NoSuchFrame)
    }

    pub fn timestamp_to_frame_index(&self, time: Timestamp) -> CacheResult<FrameIndex> {
        self.shared.toc()?.timestamp_to_frame_index(time).ok_or(CacheError::NoSuchFrame)
    }

    /// Timestamp nearest to `goal`; ties resolve to the later frame.
    pub fn closest_timestamp(&self, goal: Timestamp) -> CacheResult<Timestamp> {
        self.shared.toc()?.closest_timestamp(goal).ok_or(CacheError::NoSuchFrame)
    }

    /// First timestamp after `goal`.
    pub fn next_timestamp(&self, goal: Timestamp) -> CacheResult<Timestamp> {
        self.shared.toc()?.next_timestamp(goal).ok_or(CacheError::NoSuchFrame)
    }

    /// Last timestamp before `goal`.
    pub fn prev_timestamp(&self, goal: Timestamp) -> CacheResult<Timestamp> {
        self.shared.toc()?.prev_timestamp(goal).ok_or(CacheError::NoSuchFrame)
    }

    pub fn first_timestamp(&self) -> CacheResult<Timestamp> {
        self.shared.toc()?.first_timestamp().ok_or(CacheError::NoSuchFrame)
    }

    pub fn last_timestamp(&self) -> CacheResult<Timestamp> {
        self.shared.toc()?.last_timestamp().ok_or(CacheError::NoSuchFrame)
    }
}

impl fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCache")
            .field("id", &self.shared.id)
            .field("frame_count", &self.shared.frame_count)
            .field("cache_size", &self.shared.cache_size)
            .field("prefetch", &self.prefetcher.is_some())
            .finish()
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(registry) = self.registry.take() {
            registry.deregister(self.shared.id);
        }
        // Join before the slots can go away with the last handle.
        if let Some(mut worker) = self.prefetcher.take() {
            worker.shutdown();
        }
        tracing::debug!(cache = %self.shared.id, "frame cache dropped");
    }
}

#[cfg(test)]
impl CacheShared {
    /// Check the slot accounting invariants while quiescent.
    fn audit(&self) -> Result<(), String> {
        let state = self.state.lock();
        let total = state.slots.len();
        let loading = state.pending.loading();
        if state.cached.len() + state.ledger.free_len() + loading != total {
            return Err(format!(
                "resident {} + free {} + loading {} != total {}",
                state.cached.len(),
                state.ledger.free_len(),
                loading,
                total
            ));
        }
        if !state.ledger.is_consistent() {
            return Err("unlocked views disagree".into());
        }
        for index in state.pending.indices() {
            if state.cached.contains_key(&index) {
                return Err(format!("frame {index} both pending and resident"));
            }
        }
        for (&index, &slot) in &state.cached {
            let meta = state.slots.get(slot);
            if meta.frame != Some(index) {
                return Err(format!("slot {slot} stamped {:?}, indexed as {index}", meta.frame));
            }
            if (meta.refs == 1) != state.ledger.is_unlocked(index) {
                return Err(format!("frame {index} refs {} vs unlocked {}", meta.refs, state.ledger.is_unlocked(index)));
            }
        }
        for index in state.ledger.unlocked_frames() {
            if !state.cached.contains_key(&index) {
                return Err(format!("unlocked frame {index} not resident"));
            }
        }
        Ok(())
    }
}
