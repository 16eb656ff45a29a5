//! LRU cache over canonicalized graph queries, invalidated by `index:updated`
//! events (spec §4.6). Grounded on the `Cache<K, V>` get/set/delete/clear
//! shape used for LLM-response caching elsewhere in the pack, specialized
//! here for hash-keyed query results with file-path-driven eviction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_CAPACITY: usize = 1000;

/// Canonical representation of a query-engine operation, hashed as
/// "operation name + sorted params" (spec §4.6).
pub struct GraphQuery {
    pub operation: String,
    pub params: Value,
    pub referenced_paths: Vec<String>,
}

impl GraphQuery {
    pub fn new(operation: impl Into<String>, params: Value, referenced_paths: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            params,
            referenced_paths,
        }
    }

    pub fn hash(&self) -> String {
        let canonical = canonicalize(&self.params);
        let mut hasher = Sha256::new();
        hasher.update(self.operation.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Recursively sorts object keys so semantically identical params hash
/// identically regardless of field order.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{k}:{}", canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Default, Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    value: Value,
    inserted_at: Instant,
    referenced_paths: Vec<String>,
}

struct Shared {
    entries: HashMap<String, Entry>,
    /// Recency order, most-recently-used at the back.
    order: VecDeque<String>,
    /// file path -> set of cached query hashes that reference it.
    by_path: HashMap<String, HashSet<String>>,
}

/// Thread-safe LRU query-result cache with a default 5-minute TTL.
pub struct QueryCache {
    shared: Mutex<Shared>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            shared: Mutex::new(Shared {
                entries: HashMap::new(),
                order: VecDeque::new(),
                by_path: HashMap::new(),
            }),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, hash: &str) -> Option<Value> {
        let mut shared = self.shared.lock().expect("query cache mutex poisoned");
        let expired = shared
            .entries
            .get(hash)
            .map(|e| e.inserted_at.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            Self::remove_locked(&mut shared, hash);
        }
        match shared.entries.get(hash) {
            Some(entry) => {
                let value = entry.value.clone();
                shared.order.retain(|h| h != hash);
                shared.order.push_back(hash.to_string());
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, hash: String, value: Value, referenced_paths: Vec<String>) {
        let mut shared = self.shared.lock().expect("query cache mutex poisoned");
        for path in &referenced_paths {
            shared.by_path.entry(path.clone()).or_default().insert(hash.clone());
        }
        if !shared.entries.contains_key(&hash) {
            shared.order.push_back(hash.clone());
        } else {
            shared.order.retain(|h| h != &hash);
            shared.order.push_back(hash.clone());
        }
        shared.entries.insert(
            hash,
            Entry {
                value,
                inserted_at: Instant::now(),
                referenced_paths,
            },
        );

        while shared.order.len() > self.capacity {
            if let Some(oldest) = shared.order.pop_front() {
                Self::remove_locked(&mut shared, &oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Evicts every cached query whose params reference `file_path`. Returns
    /// the evicted hashes so the caller can republish a `cache:invalidated`
    /// event (spec §4.6: "the eviction event is republished").
    pub fn invalidate_for_file(&self, file_path: &str) -> Vec<String> {
        let mut shared = self.shared.lock().expect("query cache mutex poisoned");
        let Some(hashes) = shared.by_path.remove(file_path) else {
            return Vec::new();
        };
        let hashes: Vec<String> = hashes.into_iter().collect();
        for hash in &hashes {
            Self::remove_locked(&mut shared, hash);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        hashes
    }

    fn remove_locked(shared: &mut Shared, hash: &str) {
        if let Some(entry) = shared.entries.remove(hash) {
            for path in entry.referenced_paths {
                if let Some(set) = shared.by_path.get_mut(&path) {
                    set.remove(hash);
                    if set.is_empty() {
                        shared.by_path.remove(&path);
                    }
                }
            }
        }
        shared.order.retain(|h| h != hash);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
