//! Bounded LRU cache of directory listings.
//!
//! Keyed by endpoint + normalised path. Listings are cached whole; a stat of
//! a single entry is answered from its parent's listing.

use crate::ftp::clock::Clock;
use crate::ftp::path;
use crate::ftp::types::{DirEntry, EndpointKey, StatCacheStats};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: EndpointKey,
    path: String,
}

impl CacheKey {
    pub fn new(endpoint: EndpointKey, remote_path: &str) -> Self {
        Self {
            endpoint,
            path: path::normalize(remote_path),
        }
    }

    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this key is `prefix` itself or lies beneath it.
    pub fn is_within(&self, prefix: &CacheKey) -> bool {
        self.endpoint == prefix.endpoint && path::is_within(&self.path, &prefix.path)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub entries: Arc<Vec<DirEntry>>,
    pub populated_at: DateTime<Utc>,
    /// Shape of `entries`: detailed attributes or names only.
    pub detailed: bool,
}

/// Taken before a listing goes to the network; see `put_if_current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

struct CacheInner {
    lru: LruCache<CacheKey, CacheEntry>,
    /// Bumped by every invalidation.
    epoch: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct StatCache {
    inner: Mutex<CacheInner>,
    clock: Arc<dyn Clock>,
}

fn capacity_of(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl StatCache {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity_of(capacity)),
                epoch: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached listing of the requested shape. An entry of the other shape is
    /// dropped and reported as a miss.
    pub fn get(&self, key: &CacheKey, detailed: bool) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let found = inner.lru.get(key).map(|e| (e.detailed == detailed, e.clone()));
        match found {
            Some((true, entry)) => {
                inner.hits += 1;
                Some(entry)
            }
            Some((false, _)) => {
                inner.lru.pop(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a listing, evicting the least recently used entry when full.
    /// A names-only listing never carries attributes.
    pub fn put(&self, key: CacheKey, entries: Vec<DirEntry>, detailed: bool) {
        let mut inner = self.lock();
        self.insert(&mut inner, key, entries, detailed);
    }

    fn insert(&self, inner: &mut CacheInner, key: CacheKey, entries: Vec<DirEntry>, detailed: bool) {
        let entries = if detailed {
            entries
        } else {
            entries.into_iter().map(DirEntry::into_name_only).collect()
        };
        let entry = CacheEntry {
            entries: Arc::new(entries),
            populated_at: self.clock.now(),
            detailed,
        };
        if let Some((evicted, _)) = inner.lru.push(key.clone(), entry) {
            if evicted != key {
                log::trace!("Stat cache evicted {}{}", evicted.endpoint(), evicted.path());
                inner.evictions += 1;
            }
        }
    }

    pub fn begin_fill(&self) -> FillTicket {
        FillTicket(self.lock().epoch)
    }

    /// `put`, unless an invalidation happened after the ticket was taken.
    /// Returns whether the listing was stored.
    pub fn put_if_current(
        &self,
        ticket: FillTicket,
        key: CacheKey,
        entries: Vec<DirEntry>,
        detailed: bool,
    ) -> bool {
        let mut inner = self.lock();
        if inner.epoch != ticket.0 {
            log::debug!("Dropping listing of {} invalidated while in flight", key.path());
            return false;
        }
        self.insert(&mut inner, key, entries, detailed);
        true
    }

    /// Drop `prefix` and everything beneath it on the same endpoint.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        self.remove_where(|k| k.is_within(prefix))
    }

    /// Drop exactly one listing, leaving anything beneath it cached.
    pub fn invalidate_exact(&self, key: &CacheKey) -> bool {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.lru.pop(key).is_some()
    }

    pub fn invalidate_endpoint(&self, endpoint: &EndpointKey) -> usize {
        self.remove_where(|k| k.endpoint() == endpoint)
    }

    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.lock();
        inner.epoch += 1;
        let count = inner.lru.len();
        inner.lru.clear();
        count
    }

    fn remove_where(&self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let mut inner = self.lock();
        inner.epoch += 1;
        let doomed: Vec<CacheKey> = inner
            .lru
            .iter()
            .map(|(k, _)| k)
            .filter(|k| pred(k))
            .cloned()
            .collect();
        for k in &doomed {
            inner.lru.pop(k);
        }
        doomed.len()
    }

    /// Change the capacity; shrinking drops the least recently used entries.
    pub fn resize(&self, capacity: usize) {
        let mut inner = self.lock();
        let before = inner.lru.len();
        inner.lru.resize(capacity_of(capacity));
        let dropped = before - inner.lru.len();
        inner.evictions += dropped as u64;
    }

    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().lru.contains(key)
    }

    pub fn stats(&self) -> StatCacheStats {
        let inner = self.lock();
        StatCacheStats {
            entries: inner.lru.len() as u32,
            capacity: inner.lru.cap().get() as u32,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::clock::ManualClock;
    use crate::ftp::types::{Attributes, Scheme};

    fn endpoint(host: &str) -> EndpointKey {
        EndpointKey::new(Scheme::Ftp, host, 21, "user")
    }

    fn key(p: &str) -> CacheKey {
        CacheKey::new(endpoint("h"), p)
    }

    fn cache(capacity: usize) -> StatCache {
        StatCache::new(capacity, Arc::new(ManualClock::default()))
    }

    fn listing(name: &str) -> Vec<DirEntry> {
        vec![DirEntry::detailed(
            name,
            false,
            Attributes {
                owner: Some("root".into()),
                permissions: Some("-rw-r--r--".into()),
                ..Attributes::default()
            },
        )]
    }

    #[test]
    fn evicts_least_recently_accessed() {
        let cache = cache(2);
        cache.put(key("/a"), listing("a"), true);
        cache.put(key("/b"), listing("b"), true);
        cache.put(key("/c"), listing("c"), true);
        assert!(!cache.contains(&key("/a")));

        // /a was evicted by /c, so touching it is a miss; /b is now oldest.
        assert!(cache.get(&key("/a"), true).is_none());
        cache.put(key("/d"), listing("d"), true);
        assert!(!cache.contains(&key("/b")));
        assert!(cache.contains(&key("/c")));
        assert!(cache.contains(&key("/d")));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = cache(3);
        cache.put(key("/a"), listing("a"), true);
        cache.put(key("/b"), listing("b"), true);
        cache.put(key("/c"), listing("c"), true);
        assert!(cache.get(&key("/a"), true).is_some());
        cache.put(key("/d"), listing("d"), true);
        assert!(!cache.contains(&key("/b")));
        for p in ["/a", "/c", "/d"] {
            assert!(cache.contains(&key(p)), "{} should remain", p);
        }
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = cache(5);
        for i in 0..50 {
            cache.put(key(&format!("/dir{}", i)), listing("x"), true);
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn prefix_invalidation_is_segment_wise_and_per_endpoint() {
        let cache = cache(10);
        cache.put(key("/a"), listing("x"), true);
        cache.put(key("/a/b"), listing("x"), true);
        cache.put(key("/ab"), listing("x"), true);
        cache.put(CacheKey::new(endpoint("other"), "/a"), listing("x"), true);

        assert_eq!(cache.invalidate(&key("/a")), 2);
        assert!(cache.get(&key("/a"), true).is_none());
        assert!(cache.get(&key("/a/b"), true).is_none());
        assert!(cache.get(&key("/ab"), true).is_some());
        assert!(cache.get(&CacheKey::new(endpoint("other"), "/a"), true).is_some());
    }

    #[test]
    fn exact_invalidation_keeps_children() {
        let cache = cache(10);
        cache.put(key("/a"), listing("x"), true);
        cache.put(key("/a/b"), listing("x"), true);
        assert!(cache.invalidate_exact(&key("/a")));
        assert!(!cache.contains(&key("/a")));
        assert!(cache.contains(&key("/a/b")));
        assert!(!cache.invalidate_exact(&key("/a")));
    }

    #[test]
    fn wrong_shape_is_a_miss() {
        let cache = cache(10);
        cache.put(key("/dir"), listing("f"), true);
        assert!(cache.get(&key("/dir"), false).is_none());
        assert!(!cache.contains(&key("/dir")));
    }

    #[test]
    fn names_only_entries_are_stripped() {
        let cache = cache(10);
        cache.put(key("/dir"), listing("f"), false);
        let entry = cache.get(&key("/dir"), false).unwrap();
        assert!(!entry.detailed);
        assert!(entry.entries.iter().all(|e| e.owner().is_none() && !e.is_detailed()));
    }

    #[test]
    fn fill_racing_invalidation_is_dropped() {
        let cache = cache(10);
        let ticket = cache.begin_fill();
        cache.invalidate(&key("/"));
        assert!(!cache.put_if_current(ticket, key("/dir"), listing("old"), true));
        assert!(cache.is_empty());

        let ticket = cache.begin_fill();
        assert!(cache.put_if_current(ticket, key("/dir"), listing("new"), true));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn resize_shrinks_from_the_cold_end() {
        let cache = cache(4);
        for p in ["/a", "/b", "/c", "/d"] {
            cache.put(key(p), listing("x"), true);
        }
        cache.resize(2);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key("/c")) && cache.contains(&key("/d")));
        assert_eq!(cache.stats().capacity, 2);
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = cache(4);
        cache.put(key("/a"), listing("x"), true);
        cache.get(&key("/a"), true);
        cache.get(&key("/b"), true);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }
}
