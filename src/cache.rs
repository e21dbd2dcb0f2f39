//! Bounded in-memory cache of successful analyses.
//!
//! Key properties:
//! - Keyed by `AnalysisRequest::cache_key` (SHA-256 of the request triple)
//! - Only successful, non-fallback outcomes are stored
//! - Writes are idempotent: re-inserting an existing key changes nothing
//! - Oldest entry is evicted first once `capacity` is reached
//! - Capacity 0 disables the cache

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::pipeline::cascade::CascadeOutcome;

struct CacheInner {
    entries: HashMap<String, CascadeOutcome>,
    order: VecDeque<String>,
}

pub struct AnalysisCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl AnalysisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CascadeOutcome> {
        if !self.is_enabled() {
            return None;
        }
        self.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: String, outcome: CascadeOutcome) {
        if !self.is_enabled() || outcome.analysis.is_fallback() {
            return;
        }
        let mut inner = self.lock();
        if inner.entries.contains_key(&key) {
            return;
        }
        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, outcome);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
