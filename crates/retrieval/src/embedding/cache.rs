//! Query-side embedding cache
//!
//! LRU with TTL, keyed by `(text, task)`. Only `retrieval.query` vectors
//! are cached; passage embeddings are one-shot and would evict useful
//! entries. All operations run under a single mutex and stay O(log n).

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Cache hit/miss accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

struct Entry {
    vector: Vec<f32>,
    expires_at: Instant,
    generation: u64,
}

struct CacheInner {
    entries: HashMap<(String, String), Entry>,
    // generation -> key, ordered oldest-first for LRU eviction
    order: BTreeMap<u64, (String, String)>,
    next_generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// TTL + LRU cache for query embeddings.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_generation: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size: max_size.max(1),
            ttl,
        }
    }

    /// Fetch a live entry, refreshing its recency.
    pub fn get(&self, text: &str, task: &str) -> Option<Vec<f32>> {
        enum Lookup {
            Miss,
            Expired(u64),
            Live(u64, Vec<f32>),
        }

        let key = (text.to_string(), task.to_string());
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let lookup = match inner.entries.get_mut(&key) {
            None => Lookup::Miss,
            Some(entry) if entry.expires_at <= now => Lookup::Expired(entry.generation),
            Some(entry) => {
                let old_generation = entry.generation;
                entry.generation = generation;
                Lookup::Live(old_generation, entry.vector.clone())
            }
        };

        match lookup {
            Lookup::Miss => {
                inner.misses += 1;
                None
            }
            Lookup::Expired(old_generation) => {
                inner.entries.remove(&key);
                inner.order.remove(&old_generation);
                inner.misses += 1;
                None
            }
            Lookup::Live(old_generation, vector) => {
                inner.order.remove(&old_generation);
                inner.order.insert(generation, key);
                inner.hits += 1;
                Some(vector)
            }
        }
    }

    /// Insert or refresh an entry, evicting the least recently used while
    /// over capacity.
    pub fn put(&self, text: &str, task: &str, vector: Vec<f32>) {
        let key = (text.to_string(), task.to_string());
        let mut inner = self.inner.lock();

        let generation = inner.next_generation;
        inner.next_generation += 1;

        if let Some(previous) = inner.entries.insert(
            key.clone(),
            Entry {
                vector,
                expires_at: Instant::now() + self.ttl,
                generation,
            },
        ) {
            inner.order.remove(&previous.generation);
        }
        inner.order.insert(generation, key);

        while inner.entries.len() > self.max_size {
            let oldest = match inner.order.keys().next().copied() {
                Some(generation) => generation,
                None => break,
            };
            if let Some(evicted_key) = inner.order.remove(&oldest) {
                inner.entries.remove(&evicted_key);
                inner.evictions += 1;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            len: inner.entries.len(),
        }
    }
}
