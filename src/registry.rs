// Cache registry
// Maps cache ids to live caches for call sites that only carry an id.
// Entries are weak: the registry never keeps a cache alive, and an entry
// whose cache is gone behaves as if it were never registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::cache::{CacheId, CacheShared, FrameCache};
use crate::decoder::FrameIndex;
use crate::error::{CacheError, CacheResult};
use crate::handle::FrameHandle;

#[derive(Default)]
pub struct CacheRegistry {
    caches: Mutex<HashMap<CacheId, Weak<CacheShared>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry for callers that cannot thread one through.
    pub fn global() -> Arc<CacheRegistry> {
        static GLOBAL: OnceLock<Arc<CacheRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(CacheRegistry::new())))
    }

    /// Make `cache` reachable through its id.
    pub fn register(&self, cache: &FrameCache) {
        self.insert(cache.shared());
    }

    pub(crate) fn insert(&self, shared: &Arc<CacheShared>) {
        let id = shared.id();
        self.caches.lock().insert(id, Arc::downgrade(shared));
        tracing::debug!(cache = %id, "registered cache");
    }

    /// Returns false if `id` was not registered.
    pub fn deregister(&self, id: CacheId) -> bool {
        let removed = self.caches.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(cache = %id, "deregistered cache");
        }
        removed
    }

    fn lookup(&self, id: CacheId) -> Option<Arc<CacheShared>> {
        self.caches.lock().get(&id).and_then(CacheShared::upgrade_open)
    }

    /// Lock frame `index` of cache `id`.
    pub fn lock_frame(&self, id: CacheId, index: FrameIndex) -> CacheResult<FrameHandle> {
        let shared = self.lookup(id).ok_or(CacheError::CacheInvalid)?;
        shared.get_frame(index)
    }

    /// Queue a prefetch on cache `id`. Unknown ids are ignored.
    pub fn prefetch(&self, id: CacheId, index: FrameIndex) -> bool {
        match self.lookup(id) {
            Some(shared) => shared.prefetch(index),
            None => {
                tracing::debug!(cache = %id, index, "prefetch for unknown cache ignored");
                false
            }
        }
    }

    pub fn contains(&self, id: CacheId) -> bool {
        self.lookup(id).is_some()
    }

    /// Number of registered caches that are still alive.
    pub fn len(&self) -> usize {
        let mut caches = self.caches.lock();
        caches.retain(|_, cache| CacheShared::upgrade_open(cache).is_some());
        caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry").field("len", &self.caches.lock().len()).finish()
    }
}
