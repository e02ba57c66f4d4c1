//! Result cache shared by the search and ad-hoc query paths.
//!
//! A size-bounded LRU keyed by [`QuerySignature`]. The map sits behind a
//! `parking_lot::Mutex` that is held only for lookup and insert; `compute`
//! always runs unlocked, so two concurrent misses for the same signature may
//! both compute. Either result is a correct value for the key, and the later
//! insert replaces the earlier one whole.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::search::catalog::FactKind;
use crate::search::query::SearchFilters;
use crate::search::validator::ValidatedQuery;

/// Normalized cache key for every cacheable read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuerySignature {
    Search {
        /// Lower-cased, trimmed term; `None` for filter-only listings.
        term: Option<String>,
        filters: SearchFilters,
    },
    /// Whitespace-normalized SQL of an accepted ad-hoc query.
    AdHoc(String),
    Facts {
        kind: FactKind,
        model_id: String,
    },
    Overview,
}

impl QuerySignature {
    pub fn search(term: Option<&str>, filters: &SearchFilters) -> Self {
        QuerySignature::Search {
            term: term.map(|t| t.trim().to_lowercase()),
            filters: filters.normalized(),
        }
    }

    pub fn ad_hoc(query: &ValidatedQuery) -> Self {
        QuerySignature::AdHoc(query.normalized.clone())
    }

    pub fn facts(kind: FactKind, model_id: &str) -> Self {
        QuerySignature::Facts {
            kind,
            model_id: model_id.trim().to_string(),
        }
    }
}

/// A cached value and when it was computed. Entries are replaced, never edited.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ResultCache<K: Hash + Eq, V> {
    /// `None` when caching is disabled (capacity 0).
    entries: Option<Mutex<LruCache<K, CacheEntry<V>>>>,
    max_age: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Hash + Eq, V> std::fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("enabled", &self.entries.is_some())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    /// A cache holding at most `capacity` entries. Zero disables caching.
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Return the cached value for `key`, or run `compute` and cache its success.
    ///
    /// Errors from `compute` are returned as-is and leave the cache untouched.
    pub fn get_or_compute<E, F>(&self, key: &K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let Some(entries) = &self.entries else {
            return compute();
        };

        {
            let mut guard = entries.lock();
            let stale = match guard.get(key) {
                Some(entry) if !self.is_expired(entry) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(?key, "result cache hit");
                    return Ok(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            };
            if stale {
                guard.pop(key);
                trace!(?key, "result cache entry expired");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(?key, "result cache miss");
        let value = compute()?;

        let entry = CacheEntry {
            value: value.clone(),
            created_at: Instant::now(),
        };
        let displaced = entries.lock().push(key.clone(), entry);
        if let Some((old_key, _)) = displaced
            && &old_key != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(evicted = ?old_key, "result cache evicted least-recently-used entry");
        }
        Ok(value)
    }

    /// Look up without computing or touching recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        let entries = self.entries.as_ref()?;
        let guard = entries.lock();
        guard
            .peek(key)
            .filter(|entry| !self.is_expired(entry))
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().cap().get())
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        self.max_age
            .is_some_and(|max_age| entry.created_at.elapsed() >= max_age)
    }
}
