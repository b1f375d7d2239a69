//! Embedded TTL key-value cache.
//!
//! Holds the hot, loss-tolerant state of a process: risk scores and blocks
//! (Shield), session nonces, rate-limit windows, alert lists. Every key has a
//! single logical writer except the `risk:*` counters, which are
//! increment-monotonic. Nothing here survives a restart; durable state lives
//! in the database.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Cache value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

/// Shared in-process cache. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let map = self.inner.read().unwrap();
        let entry = map.get(key)?;
        if entry.live(Instant::now()) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Int(n)) => Some(n),
            _ => None,
        }
    }

    pub fn set_text(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        self.set(key, Value::Text(value.into()), ttl);
    }

    pub fn set_int(&self, key: &str, value: i64, ttl: Option<Duration>) {
        self.set(key, Value::Int(value), ttl);
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut map = self.inner.write().unwrap();
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    /// Increment an integer key, creating it (with `ttl`) when absent or
    /// expired. Returns the new value. The TTL of a live key is left as-is,
    /// so repeated increments never extend a window.
    pub fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> i64 {
        let mut map = self.inner.write().unwrap();
        let now = Instant::now();
        match map.get_mut(key) {
            Some(entry) if entry.live(now) => {
                let current = match entry.value {
                    Value::Int(n) => n,
                    _ => 0,
                };
                entry.value = Value::Int(current + delta);
                current + delta
            }
            _ => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Int(delta),
                        expires_at: ttl.map(|d| now + d),
                    },
                );
                delta
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.write().unwrap().remove(key).is_some()
    }

    /// Atomically delete `key` iff its current text value equals `expected`.
    ///
    /// This is the single-use nonce primitive: exactly one concurrent caller
    /// observes `true`.
    pub fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let mut map = self.inner.write().unwrap();
        let now = Instant::now();
        let matches = map
            .get(key)
            .map(|e| e.live(now) && e.value == Value::Text(expected.to_string()))
            .unwrap_or(false);
        if matches {
            map.remove(key);
        }
        matches
    }

    /// Append to a list key, creating it when absent. Lists are bounded to
    /// `cap` items; the oldest entries are dropped first.
    pub fn push(&self, key: &str, item: impl Into<String>, cap: usize) {
        let mut map = self.inner.write().unwrap();
        let now = Instant::now();
        let entry = map.entry(key.to_string()).or_insert(Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        if !entry.live(now) {
            entry.value = Value::List(Vec::new());
            entry.expires_at = None;
        }
        if let Value::List(items) = &mut entry.value {
            items.push(item.into());
            if items.len() > cap {
                let excess = items.len() - cap;
                items.drain(..excess);
            }
        }
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::List(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Snapshot all live keys with the given prefix.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        let map = self.inner.read().unwrap();
        let now = Instant::now();
        map.iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut map = self.inner.write().unwrap();
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, e| e.live(now));
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_text() {
        let cache = SharedCache::new();
        cache.set_text("k", "v", None);
        assert_eq!(cache.get_text("k"), Some("v".to_string()));
        assert_eq!(cache.get_text("missing"), None);
    }

    #[test]
    fn test_expiry() {
        let cache = SharedCache::new();
        cache.set_text("k", "v", Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get_text("k"), None);
        assert_eq!(cache.sweep(), 1);
    }

    #[test]
    fn test_incr_monotonic() {
        let cache = SharedCache::new();
        assert_eq!(cache.incr_by("risk:1.2.3.4", 15, None), 15);
        assert_eq!(cache.incr_by("risk:1.2.3.4", 20, None), 35);
        assert_eq!(cache.get_int("risk:1.2.3.4"), Some(35));
    }

    #[test]
    fn test_compare_and_delete_single_use() {
        let cache = SharedCache::new();
        cache.set_text("nonce:d1:abc", "vote", None);
        assert!(cache.compare_and_delete("nonce:d1:abc", "vote"));
        // Second attempt observes the key gone.
        assert!(!cache.compare_and_delete("nonce:d1:abc", "vote"));
    }

    #[test]
    fn test_compare_and_delete_wrong_value() {
        let cache = SharedCache::new();
        cache.set_text("nonce:d1:abc", "vote", None);
        assert!(!cache.compare_and_delete("nonce:d1:abc", "login"));
        assert!(cache.get_text("nonce:d1:abc").is_some());
    }

    #[test]
    fn test_list_push_and_cap() {
        let cache = SharedCache::new();
        for i in 0..10 {
            cache.push("alerts", format!("a{i}"), 5);
        }
        let items = cache.list("alerts");
        assert_eq!(items.len(), 5);
        assert_eq!(items[0], "a5");
        assert_eq!(items[4], "a9");
    }

    #[test]
    fn test_scan_prefix() {
        let cache = SharedCache::new();
        cache.set_text("block:1.1.1.1", "risk", None);
        cache.set_text("block:2.2.2.2", "admin", None);
        cache.set_int("risk:1.1.1.1", 120, None);
        let blocks = cache.scan_prefix("block:");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_concurrent_incr() {
        let cache = SharedCache::new();
        let mut handles = vec![];
        for _ in 0..8 {
            let c = cache.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    c.incr_by("risk:x", 1, None);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.get_int("risk:x"), Some(800));
    }
}
