//! Copiable-value LRU cache.
//!
//! Same policies as the shared-value variant (TTL checked on lookup,
//! insert-time timestamps, LRU eviction on capacity) but values are stored
//! by value and handed out as clones. Meant for small metadata where a copy
//! is cheaper than a reference count.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

use crate::time_utils::steady_now_millis;

struct CacheEntry<V> {
    value: V,
    inserted_at: u64,
    tick: u64,
}

pub struct CopiableLruCache<K, V> {
    max_entries: usize,
    timeout_millis: u64,
    entries: HashMap<K, CacheEntry<V>>,
    recency: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> CopiableLruCache<K, V> {
    pub fn new(max_entries: usize, timeout_millis: u64) -> Self {
        CopiableLruCache {
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

    /// Insert, replacing any previous entry; returns the value evicted by a
    /// capacity overflow, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
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
            let (&lru_tick, _) = self.recency.iter().next()?;
            let lru_key = self.recency.remove(&lru_tick)?;
            return self.entries.remove(&lru_key).map(|entry| entry.value);
        }
        None
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
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

enum TokenState<V> {
    Pending,
    Ready(V),
    Failed(String),
}

struct CreationToken<V> {
    state: Mutex<TokenState<V>>,
    cv: Condvar,
}

impl<V: Clone> CreationToken<V> {
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

    fn wait(&self) -> Result<V> {
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

struct CopiableState<K, V> {
    cache: CopiableLruCache<K, V>,
    ongoing_creation: HashMap<K, Arc<CreationToken<V>>>,
}

/// Thread-safe copiable-value LRU with get-or-create deduplication; same
/// creation-token protocol as the shared-value variant.
pub struct ThreadSafeCopiableLruCache<K, V> {
    state: Mutex<CopiableState<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ThreadSafeCopiableLruCache<K, V> {
    pub fn new(max_entries: usize, timeout_millis: u64) -> Self {
        ThreadSafeCopiableLruCache {
            state: Mutex::new(CopiableState {
                cache: CopiableLruCache::new(max_entries, timeout_millis),
                ongoing_creation: HashMap::new(),
            }),
        }
    }

    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.state.lock().unwrap().cache.put(key, value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
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

    pub fn get_or_create(&self, key: K, factory: impl FnOnce(&K) -> Result<V>) -> Result<V> {
        let token = {
            let mut state = self.state.lock().unwrap();
            if let Some(value) = state.cache.get(&key) {
                return Ok(value);
            }
            if let Some(token) = state.ongoing_creation.get(&key) {
                let token = token.clone();
                drop(state);
                return token.wait();
            }
            let token = Arc::new(CreationToken::new());
            state.ongoing_creation.insert(key.clone(), token.clone());
            token
        };

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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_put_get_and_overwrite() {
        let mut cache = CopiableLruCache::new(4, 0);
        cache.put("size", 128u64);
        assert_eq!(cache.get(&"size"), Some(128));
        cache.put("size", 256);
        assert_eq!(cache.get(&"size"), Some(256));
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = CopiableLruCache::new(2, 0);
        cache.put(1, "a".to_string());
        cache.put(2, "b".to_string());
        cache.get(&1);
        let evicted = cache.put(3, "c".to_string());
        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = CopiableLruCache::new(0, 20);
        cache.put("k", 1);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k"), None);
    }

    #[test]
    fn test_concurrent_get_or_create_single_factory_run() {
        let cache = Arc::new(ThreadSafeCopiableLruCache::<u32, u64>::new(0, 0));
        let factory_runs = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let factory_runs = factory_runs.clone();
            workers.push(thread::spawn(move || {
                let value = cache
                    .get_or_create(7, |_| {
                        factory_runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(99)
                    })
                    .unwrap();
                assert_eq!(value, 99);
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(factory_runs.load(Ordering::SeqCst), 1);
    }
}
