//! Shared-value LRU cache with TTL and in-flight creation deduplication.
//!
//! Values are reference counted (`Arc`), so a `get` hands out a new handle to
//! the same immutable object; this is the variant used for the metadata
//! cache, the glob cache and the in-memory block cache, where values are
//! expensive to copy and read concurrently.
//!
//! Entry timestamps are set at insert time only and deliberately not
//! refreshed on read: staleness is then bounded by the TTL regardless of how
//! hot an entry is.
//!
//! Recency is tracked with a monotonic tick per entry plus a
//! `BTreeMap<tick, key>` index; the least recently used entry is the first
//! tick in the index.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

use crate::time_utils::steady_now_millis;

struct CacheEntry<V> {
    value: Arc<V>,
    /// Monotonic insert timestamp; compared against the TTL on lookup.
    inserted_at: u64,
    /// Recency tick; position in the LRU index.
    tick: u64,
}

/// Single-threaded core. `max_entries` of zero means unbounded;
/// `timeout_millis` of zero means entries never expire.
pub struct SharedLruCache<K, V> {
    max_entries: usize,
    timeout_millis: u64,
    entries: HashMap<K, CacheEntry<V>>,
    recency: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Eq + Hash + Clone, V> SharedLruCache<K, V> {
    pub fn new(max_entries: usize, timeout_millis: u64) -> Self {
        SharedLruCache {
            max_entries,
            timeout_millis,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Insert `value` under `key`, replacing any previous entry. When the
    /// insert pushes the cache over capacity, the least recently used entry
    /// is evicted and its value returned so the caller can release it
    /// outside any critical section.
    pub fn put(&mut self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        if let Some(old) = self.entries.remove(&key) {
            self.recency.remove(&old.tick);
        }

        let tick = self.bump_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: steady_now_millis(),
                tick,
            },
        );

        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            return self.evict_lru();
        }
        None
    }

    fn evict_lru(&mut self) -> Option<Arc<V>> {
        let (&tick, _) = self.recency.iter().next()?;
        let key = self.recency.remove(&tick)?;
        self.entries.remove(&key).map(|entry| entry.value)
    }

    /// Look up `key`. Expired entries are removed and reported as absent;
    /// fresh hits are promoted to most recently used.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        let entry = self.entries.get(key)?;
        if self.timeout_millis > 0 && steady_now_millis() - entry.inserted_at > self.timeout_millis
        {
            self.delete(key);
            return None;
        }

        let new_tick = self.bump_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = new_tick;
        self.recency.insert(new_tick, key.clone());
        Some(entry.value.clone())
    }

    /// Remove the entry for `key`; returns whether one existed.
    pub fn delete(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// Remove every entry whose key satisfies `filter`.
    pub fn clear_with_filter(&mut self, filter: impl Fn(&K) -> bool) {
        let doomed: Vec<K> = self
            .entries
            .keys()
            .filter(|key| filter(key))
            .cloned()
            .collect();
        for key in doomed {
            self.delete(&key);
        }
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

//===----------------------------------------------------------------===//
// Thread-safe wrapper with get-or-create
//===----------------------------------------------------------------===//

enum TokenState<V> {
    Pending,
    Ready(Arc<V>),
    Failed(String),
}

/// Coordinates waiters for one in-flight value creation: the first requester
/// runs the factory, everyone else blocks on the condvar until the slot is
/// filled.
struct CreationToken<V> {
    state: Mutex<TokenState<V>>,
    cv: Condvar,
}

impl<V> CreationToken<V> {
    fn new() -> Self {
        CreationToken {
            state: Mutex::new(TokenState::Pending),
            cv: Condvar::new(),
        }
    }

    fn publish(&self, outcome: TokenState<V>) {
        let mut state = self.state.lock().unwrap();
        *state = outcome;
        self.cv.notify_all();
    }

    fn wait(&self) -> Result<Arc<V>> {
        let mut state = self.state.lock().unwrap();
        loop {
            match &*state {
                TokenState::Ready(value) => return Ok(value.clone()),
                TokenState::Failed(message) => {
                    return Err(anyhow!("In-flight value creation failed: {}", message))
                }
                TokenState::Pending => {}
            }
            state = self.cv.wait(state).unwrap();
        }
    }
}

struct SharedState<K, V> {
    cache: SharedLruCache<K, V>,
    ongoing_creation: HashMap<K, Arc<CreationToken<V>>>,
}

/// Thread-safe shared-value LRU. One internal mutex guards both the cache
/// and the set of in-flight creations so the miss-then-register step is
/// atomic; factories always run outside the lock.
pub struct ThreadSafeSharedLruCache<K, V> {
    state: Mutex<SharedState<K, V>>,
}

impl<K: Eq + Hash + Clone, V> ThreadSafeSharedLruCache<K, V> {
    pub fn new(max_entries: usize, timeout_millis: u64) -> Self {
        ThreadSafeSharedLruCache {
            state: Mutex::new(SharedState {
                cache: SharedLruCache::new(max_entries, timeout_millis),
                ongoing_creation: HashMap::new(),
            }),
        }
    }

    pub fn put(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.state.lock().unwrap().cache.put(key, value)
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.state.lock().unwrap().cache.get(key)
    }

    pub fn delete(&self, key: &K) -> bool {
        self.state.lock().unwrap().cache.delete(key)
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().cache.clear()
    }

    pub fn clear_with_filter(&self, filter: impl Fn(&K) -> bool) {
        self.state.lock().unwrap().cache.clear_with_filter(filter)
    }

    pub fn keys(&self) -> Vec<K> {
        self.state.lock().unwrap().cache.keys()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().cache.len()
    }

    pub fn max_entries(&self) -> usize {
        self.state.lock().unwrap().cache.max_entries()
    }

    /// Return the cached value for `key`, or produce it with `factory`.
    ///
    /// At most one factory invocation runs per key at any time; concurrent
    /// requesters for the same key block until the producer publishes and
    /// then share the produced value. A failing factory fails every current
    /// waiter and clears the in-flight slot so the next request retries.
    pub fn get_or_create(
        &self,
        key: K,
        factory: impl FnOnce(&K) -> Result<Arc<V>>,
    ) -> Result<Arc<V>> {
        let token = {
            let mut state = self.state.lock().unwrap();
            if let Some(value) = state.cache.get(&key) {
                return Ok(value);
            }
            if let Some(token) = state.ongoing_creation.get(&key) {
                // Another requester is already producing this value.
                let token = token.clone();
                drop(state);
                return token.wait();
            }
            let token = Arc::new(CreationToken::new());
            state.ongoing_creation.insert(key.clone(), token.clone());
            token
        };

        // Factory runs outside the critical section.
        match factory(&key) {
            Ok(value) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.cache.put(key.clone(), value.clone());
                    state.ongoing_creation.remove(&key);
                }
                token.publish(TokenState::Ready(value.clone()));
                Ok(value)
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.ongoing_creation.remove(&key);
                }
                token.publish(TokenState::Failed(err.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_put_get_roundtrip() {
        let mut cache = SharedLruCache::new(2, 0);
        assert!(cache.get(&"k1").is_none());

        cache.put("k1", Arc::new(10));
        assert_eq!(*cache.get(&"k1").unwrap(), 10);

        // Overwrite replaces the value.
        cache.put("k1", Arc::new(11));
        assert_eq!(*cache.get(&"k1").unwrap(), 11);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_eviction_is_lru() {
        let mut cache = SharedLruCache::new(2, 0);
        cache.put("k1", Arc::new(1));
        cache.put("k2", Arc::new(2));

        // Touch k1 so k2 becomes LRU.
        cache.get(&"k1");
        let evicted = cache.put("k3", Arc::new(3));
        assert_eq!(*evicted.unwrap(), 2);
        assert!(cache.get(&"k2").is_none());
        assert!(cache.get(&"k1").is_some());
        assert!(cache.get(&"k3").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let mut cache = SharedLruCache::new(0, 0);
        for idx in 0..100 {
            assert!(cache.put(idx, Arc::new(idx)).is_none());
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn test_ttl_expiry_removes_entry() {
        let mut cache = SharedLruCache::new(0, 20);
        cache.put("k1", Arc::new(1));
        assert!(cache.get(&"k1").is_some());

        thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&"k1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear_with_filter() {
        let mut cache = SharedLruCache::new(0, 0);
        cache.put("keep", Arc::new(1));
        cache.put("drop-a", Arc::new(2));
        cache.put("drop-b", Arc::new(3));

        cache.clear_with_filter(|key: &&str| key.starts_with("drop"));
        assert_eq!(cache.keys(), vec!["keep"]);
    }

    #[test]
    fn test_get_or_create_runs_factory_once() {
        let cache = Arc::new(ThreadSafeSharedLruCache::<String, usize>::new(0, 0));
        let factory_runs = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let factory_runs = factory_runs.clone();
            workers.push(thread::spawn(move || {
                let value = cache
                    .get_or_create("shared-key".to_string(), |_| {
                        factory_runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(30));
                        Ok(Arc::new(42))
                    })
                    .unwrap();
                assert_eq!(*value, 42);
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(factory_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_or_create_failure_allows_retry() {
        let cache = ThreadSafeSharedLruCache::<&str, usize>::new(0, 0);
        let err = cache
            .get_or_create("k", |_| bail!("remote unreachable"))
            .unwrap_err();
        assert!(err.to_string().contains("remote unreachable"));

        // The failed slot was cleared; the next attempt runs the factory.
        let value = cache.get_or_create("k", |_| Ok(Arc::new(7))).unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_get_or_create_hit_skips_factory() {
        let cache = ThreadSafeSharedLruCache::<&str, usize>::new(0, 0);
        cache.put("k", Arc::new(5));
        let value = cache
            .get_or_create("k", |_| panic!("factory must not run on a hit"))
            .unwrap();
        assert_eq!(*value, 5);
    }
}
