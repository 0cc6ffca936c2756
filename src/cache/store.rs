//! Byte-budgeted LRU store for decoded media.
//!
//! - Capacity is a byte budget, not an entry count.
//! - Recency is refreshed by `get` and `put`; `peek`/`contains` leave it alone.
//! - Per-kind release hooks run for every entry that leaves the store.
//! - Pinned entries are never evicted; only `remove` and `clear` drop them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::CacheError;
use crate::models::{MediaEntry, MediaKey, MediaKind};

/// Called with an entry right before the store lets go of it.
pub type ReleaseHook = Arc<dyn Fn(&MediaEntry) + Send + Sync>;

/// Point-in-time counters for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    entries: LruCache<MediaKey, MediaEntry>,
    /// Keys eviction must skip, e.g. the media on screen.
    pinned: HashSet<MediaKey>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Decoded media cache shared by the session and the load workers.
///
/// Cloning is cheap and yields a handle to the same store.
pub struct CacheStore {
    capacity: usize,
    inner: Arc<RwLock<Inner>>,
    hooks: Arc<RwLock<HashMap<MediaKind, ReleaseHook>>>,
}

impl CacheStore {
    pub fn new(capacity_bytes: usize) -> Self {
        debug!(capacity_bytes, "Initialized media cache");
        Self {
            capacity: capacity_bytes,
            inner: Arc::new(RwLock::new(Inner {
                entries: LruCache::unbounded(),
                pinned: HashSet::new(),
                bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
            hooks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register the teardown for one media kind, replacing any previous hook.
    pub fn set_release_hook<F>(&self, kind: MediaKind, hook: F)
    where
        F: Fn(&MediaEntry) + Send + Sync + 'static,
    {
        self.hooks.write().insert(kind, Arc::new(hook));
    }

    pub fn clear_release_hook(&self, kind: MediaKind) {
        self.hooks.write().remove(&kind);
    }

    /// Exempt `key` from LRU eviction. The key does not need to be cached yet.
    pub fn pin(&self, key: &MediaKey) {
        self.inner.write().pinned.insert(key.clone());
    }

    pub fn unpin(&self, key: &MediaKey) {
        self.inner.write().pinned.remove(key);
    }

    pub fn is_pinned(&self, key: &MediaKey) -> bool {
        self.inner.read().pinned.contains(key)
    }

    /// Look up an entry and mark it most recently used.
    pub fn get(&self, key: &MediaKey) -> Option<MediaEntry> {
        let mut inner = self.inner.write();
        let found = inner.entries.get(key).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Look up an entry without touching recency or counters.
    pub fn peek(&self, key: &MediaKey) -> Option<MediaEntry> {
        self.inner.read().entries.peek(key).cloned()
    }

    pub fn contains(&self, key: &MediaKey) -> bool {
        self.inner.read().entries.contains(key)
    }

    /// Insert or replace an entry, then evict least recently used entries
    /// until the budget holds or only the new entry and pinned entries are
    /// left. Pinned entries may push the total past the budget.
    ///
    /// An entry larger than the whole budget is still stored, alone, and
    /// reported as [`CacheError::EntryTooLargeForCapacity`]. The next `put`
    /// evicts it.
    pub fn put(&self, entry: MediaEntry) -> Result<(), CacheError> {
        let key = entry.key.clone();
        let size = entry.size_bytes();
        let mut dropped = Vec::new();

        let total = {
            let mut inner = self.inner.write();
            if let Some(old) = inner.entries.put(key.clone(), entry) {
                inner.bytes = inner.bytes.saturating_sub(old.size_bytes());
                dropped.push(old);
            }
            inner.bytes = inner.bytes.saturating_add(size);

            // Pinned entries sit out the eviction loop and go back afterwards.
            let mut held = Vec::new();
            if inner.bytes > self.capacity && !inner.pinned.is_empty() {
                let pinned: Vec<MediaKey> = inner
                    .pinned
                    .iter()
                    .filter(|k| **k != key)
                    .cloned()
                    .collect();
                for pinned_key in pinned {
                    if let Some(kept) = inner.entries.pop(&pinned_key) {
                        held.push((pinned_key, kept));
                    }
                }
            }

            while inner.bytes > self.capacity && inner.entries.len() > 1 {
                let Some((_, evicted)) = inner.entries.pop_lru() else {
                    break;
                };
                inner.bytes = inner.bytes.saturating_sub(evicted.size_bytes());
                inner.evictions += 1;
                trace!(
                    key = %evicted.key,
                    evicted_bytes = evicted.size_bytes(),
                    current_bytes = inner.bytes,
                    "Evicted media from cache"
                );
                dropped.push(evicted);
            }

            if !held.is_empty() {
                for (pinned_key, kept) in held {
                    inner.entries.put(pinned_key, kept);
                }
                inner.entries.promote(&key);
            }
            inner.bytes
        };

        trace!(%key, size, total, "Cached media");
        self.release(dropped);

        if size > self.capacity {
            warn!(%key, size, capacity = self.capacity, "Entry exceeds cache capacity");
            return Err(CacheError::EntryTooLargeForCapacity {
                key,
                size,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Drop one entry, running its release hook. Returns whether it existed.
    pub fn remove(&self, key: &MediaKey) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.entries.pop(key);
            if let Some(entry) = &removed {
                inner.bytes = inner.bytes.saturating_sub(entry.size_bytes());
            }
            removed
        };

        match removed {
            Some(entry) => {
                trace!(%key, "Removed media from cache");
                self.release(vec![entry]);
                true
            }
            None => false,
        }
    }

    /// Drop every entry, oldest first, running release hooks.
    pub fn clear(&self) -> usize {
        let drained = {
            let mut inner = self.inner.write();
            let mut drained = Vec::with_capacity(inner.entries.len());
            while let Some((_, entry)) = inner.entries.pop_lru() {
                drained.push(entry);
            }
            inner.bytes = 0;
            drained
        };

        let count = drained.len();
        self.release(drained);
        debug!(count, "Cleared media cache");
        count
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<MediaKey> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.read().bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    // Runs outside the entry lock so hooks may call back into the store.
    fn release(&self, entries: Vec<MediaEntry>) {
        for entry in entries {
            let hook = self.hooks.read().get(&entry.kind()).cloned();
            if let Some(hook) = hook {
                trace!(key = %entry.key, kind = ?entry.kind(), "Running release hook");
                hook(&entry);
            }
        }
    }
}

impl Clone for CacheStore {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            inner: Arc::clone(&self.inner),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::entry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> MediaKey {
        MediaKey::new(format!("/media/{name}"))
    }

    fn counting_hook(cache: &CacheStore, kind: MediaKind) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        cache.set_release_hook(kind, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        calls
    }

    #[test]
    fn test_eviction_order() {
        let cache = CacheStore::new(25);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();
        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();
        cache.put(entry("/media/c", 10, MediaKind::Image)).unwrap();

        assert!(!cache.contains(&key("a")));
        assert!(cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.total_bytes(), 20);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_pinned_entry_survives_eviction() {
        let cache = CacheStore::new(20);
        let released = counting_hook(&cache, MediaKind::Animation);
        cache.put(entry("/media/anim", 10, MediaKind::Animation)).unwrap();
        cache.pin(&key("anim"));

        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();
        cache.put(entry("/media/c", 10, MediaKind::Image)).unwrap();

        assert!(cache.contains(&key("anim")));
        assert!(!cache.contains(&key("b")));
        assert_eq!(cache.keys(), vec![key("c"), key("anim")]);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        // Unpinned, it is the oldest entry again.
        cache.unpin(&key("anim"));
        cache.put(entry("/media/d", 10, MediaKind::Image)).unwrap();
        assert!(!cache.contains(&key("anim")));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pinned_entries_may_exceed_budget() {
        let cache = CacheStore::new(15);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();
        cache.pin(&key("a"));
        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();

        assert!(cache.contains(&key("a")));
        assert!(cache.contains(&key("b")));
        assert_eq!(cache.total_bytes(), 20);
        assert!(cache.is_pinned(&key("a")));

        // Explicit removal still drops a pinned entry.
        assert!(cache.remove(&key("a")));
        assert_eq!(cache.total_bytes(), 10);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = CacheStore::new(25);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();
        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();
        assert!(cache.get(&key("a")).is_some());
        cache.put(entry("/media/c", 10, MediaKind::Image)).unwrap();

        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert_eq!(cache.keys(), vec![key("c"), key("a")]);
    }

    #[test]
    fn test_peek_does_not_refresh_recency() {
        let cache = CacheStore::new(25);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();
        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();
        assert!(cache.peek(&key("a")).is_some());
        cache.put(entry("/media/c", 10, MediaKind::Image)).unwrap();

        assert!(!cache.contains(&key("a")));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = CacheStore::new(100);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();
        cache.get(&key("a"));
        cache.get(&key("missing"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 100);
    }

    #[test]
    fn test_oversized_entry_stored_alone() {
        let cache = CacheStore::new(25);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();

        let err = cache
            .put(entry("/media/huge", 100, MediaKind::Image))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::EntryTooLargeForCapacity { size: 100, capacity: 25, .. }
        ));
        assert_eq!(cache.keys(), vec![key("huge")]);
        assert_eq!(cache.total_bytes(), 100);

        // The next insert pushes the oversized entry out.
        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();
        assert_eq!(cache.keys(), vec![key("b")]);
        assert_eq!(cache.total_bytes(), 10);
    }

    #[test]
    fn test_replace_updates_size_and_releases_old() {
        let cache = CacheStore::new(100);
        let released = counting_hook(&cache, MediaKind::Image);
        cache.put(entry("/media/a", 10, MediaKind::Image)).unwrap();
        cache.put(entry("/media/a", 30, MediaKind::Image)).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 30);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_runs_hook_once() {
        let cache = CacheStore::new(100);
        let video_released = counting_hook(&cache, MediaKind::VideoFrame);
        let image_released = counting_hook(&cache, MediaKind::Image);
        cache.put(entry("/media/clip", 10, MediaKind::VideoFrame)).unwrap();
        cache.put(entry("/media/still", 10, MediaKind::Image)).unwrap();

        assert!(cache.remove(&key("clip")));
        assert!(!cache.remove(&key("clip")));

        assert_eq!(video_released.load(Ordering::SeqCst), 1);
        assert_eq!(image_released.load(Ordering::SeqCst), 0);
        assert!(cache.contains(&key("still")));
        assert_eq!(cache.total_bytes(), 10);
    }

    #[test]
    fn test_eviction_runs_hook() {
        let cache = CacheStore::new(15);
        let released = counting_hook(&cache, MediaKind::Animation);
        cache.put(entry("/media/anim", 10, MediaKind::Animation)).unwrap();
        cache.put(entry("/media/b", 10, MediaKind::Image)).unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_releases_everything() {
        let cache = CacheStore::new(100);
        let released = counting_hook(&cache, MediaKind::Animation);
        cache.put(entry("/media/a", 10, MediaKind::Animation)).unwrap();
        cache.put(entry("/media/b", 10, MediaKind::Animation)).unwrap();
        cache.put(entry("/media/c", 10, MediaKind::Image)).unwrap();

        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hook_may_reenter_cache() {
        let cache = CacheStore::new(100);
        let handle = cache.clone();
        cache.set_release_hook(MediaKind::VideoFrame, move |_| {
            // A hook touching the store must not deadlock.
            let _ = handle.len();
            handle.remove(&MediaKey::new("/media/sidecar"));
        });
        cache.put(entry("/media/clip", 10, MediaKind::VideoFrame)).unwrap();
        cache.put(entry("/media/sidecar", 10, MediaKind::Image)).unwrap();

        assert!(cache.remove(&key("clip")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_budget_holds_across_mixed_sizes() {
        let cache = CacheStore::new(1000);
        for i in 0..200usize {
            let size = (i * 37) % 300 + 1;
            cache
                .put(entry(&format!("/media/{}", i % 23), size, MediaKind::Image))
                .unwrap();
            assert!(cache.total_bytes() <= cache.capacity());
            if i % 5 == 0 {
                cache.get(&key(&format!("{}", (i * 7) % 23)));
            }
        }
    }

    #[test]
    fn test_concurrent_puts_respect_budget() {
        let cache = CacheStore::new(500);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache
                            .put(entry(&format!("/media/{t}-{i}"), 40, MediaKind::Image))
                            .unwrap();
                        assert!(cache.total_bytes() <= 500);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.total_bytes() <= 500);
        assert_eq!(cache.total_bytes(), cache.len() * 40);
    }
}
