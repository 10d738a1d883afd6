use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct LruStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_usage_estimate: usize,
}

struct Slot<V> {
    value: V,
    inserted_at: Instant,
}

struct LruInner<V> {
    entries: HashMap<String, Slot<V>>,
    /// Recency order, LRU at the front.
    order: VecDeque<String>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

/// Thread-safe bounded LRU cache with a per-cache TTL.
///
/// `get` promotes to most-recently-used; an expired entry is removed on
/// observation and reported as a miss. `put` evicts the LRU entry when the
/// cache is full. All operations are total.
pub struct LruCache<V> {
    max_size: usize,
    inner: Mutex<LruInner<V>>,
}

impl<V: Clone> LruCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                ttl,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let ttl = inner.ttl;
        let lookup = inner
            .entries
            .get(key)
            .map(|slot| (slot.value.clone(), slot.inserted_at.elapsed() > ttl));
        match lookup {
            Some((value, false)) => {
                promote(&mut inner.order, key);
                inner.hits += 1;
                Some(value)
            }
            Some((_, true)) => {
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            promote(&mut inner.order, &key);
        } else {
            if inner.entries.len() >= self.max_size {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
            inner.order.push_back(key.clone());
        }
        inner.entries.insert(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_some() {
            inner.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Resident keys, LRU first. Used for namespace sweeps.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.inner.lock().ttl
    }

    /// Adaptive tuning adjusts the TTL of a live cache.
    pub fn set_ttl(&self, ttl: Duration) {
        self.inner.lock().ttl = ttl;
    }

    pub fn stats(&self) -> LruStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64
        } else {
            0.0
        };
        LruStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            memory_usage_estimate: inner.entries.len() * 1024,
        }
    }
}

fn promote(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
    order.push_back(key.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_miss_then_hit() {
        let cache: LruCache<String> = LruCache::new(4, Duration::from_secs(60));
        assert!(cache.get("a").is_none());
        cache.put("a", "alpha".to_string());
        assert_eq!(cache.get("a").as_deref(), Some("alpha"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache: LruCache<u32> = LruCache::new(3, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);

        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        cache.put("d", 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("d"), Some(4));
    }

    #[test]
    fn never_exceeds_max_size() {
        let cache: LruCache<usize> = LruCache::new(5, Duration::from_secs(60));
        for i in 0..100 {
            cache.put(format!("key_{i}"), i);
            assert!(cache.len() <= 5);
        }
        // Residents are the five most recently inserted keys.
        for i in 95..100 {
            assert_eq!(cache.get(&format!("key_{i}")), Some(i));
        }
    }

    #[test]
    fn expired_entry_reports_miss_and_is_removed() {
        let cache: LruCache<u32> = LruCache::new(4, Duration::from_millis(10));
        cache.put("a", 1);
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn put_existing_key_updates_value_and_recency() {
        let cache: LruCache<u32> = LruCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);

        // "b" was LRU after "a" was re-put.
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(10));
    }

    #[test]
    fn clear_resets_counters() {
        let cache: LruCache<u32> = LruCache::new(4, Duration::from_secs(60));
        cache.put("a", 1);
        cache.get("a");
        cache.get("missing");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn concurrent_access_is_safe() {
        use std::sync::Arc;

        let cache: Arc<LruCache<usize>> = Arc::new(LruCache::new(64, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..200 {
                    cache.put(format!("k{}", (t * 31 + i) % 100), i);
                    cache.get(&format!("k{}", i % 100));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
