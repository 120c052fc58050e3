//! Memoized lenient parsing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::repair::parse_lenient;
use crate::error::Result;

/// Default number of parsed inputs retained.
pub const DEFAULT_PARSE_CACHE_CAPACITY: usize = 100;

/// Bounded cache of [`parse_lenient`] results keyed on the raw input.
///
/// Eviction is by insertion order. Clones share the same storage.
#[derive(Clone)]
pub struct ParseCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (hits, misses) = self.stats();
        f.debug_struct("ParseCache")
            .field("len", &self.len())
            .field("hits", &hits)
            .field("misses", &misses)
            .finish()
    }
}

struct CacheInner {
    entries: HashMap<String, Value>,
    order: VecDeque<String>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
                hits: 0,
                misses: 0,
            })),
        }
    }

    /// Parse `text`, returning a cached value when the same input was seen.
    ///
    /// Failures are not cached.
    pub fn parse(&self, text: &str) -> Result<Value> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = inner.entries.get(text).cloned() {
                inner.hits += 1;
                return Ok(value);
            }
            inner.misses += 1;
        }
        let value = parse_lenient(text)?;
        self.insert(text, value.clone());
        Ok(value)
    }

    fn insert(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.insert(key.to_string(), value).is_none() {
            inner.order.push_back(key.to_string());
        }
        while inner.entries.len() > inner.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (inner.hits, inner.misses)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.order.clear();
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(DEFAULT_PARSE_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_input_is_served_from_cache() {
        let cache = ParseCache::default();
        let first = cache.parse(r#"{"a": 1"#).unwrap();
        let second = cache.parse(r#"{"a": 1"#).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn oldest_entries_are_evicted_at_capacity() {
        let cache = ParseCache::new(2);
        cache.parse("[1]").unwrap();
        cache.parse("[2]").unwrap();
        cache.parse("[3]").unwrap();
        assert_eq!(cache.len(), 2);

        cache.parse("[1]").unwrap();
        let (hits, _) = cache.stats();
        assert_eq!(hits, 0, "evicted entry should miss");
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = ParseCache::default();
        assert!(cache.parse("definitely not json").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn clones_share_storage() {
        let cache = ParseCache::default();
        let other = cache.clone();
        cache.parse("{}").unwrap();
        assert_eq!(other.len(), 1);
    }
}
