// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for live token/fiat rates.
//!
//! Bounds request volume to the price API: a live rate is reused for the
//! TTL, then refetched. Keys are `(TOKEN, CURRENCY)` upper-cased.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use rust_decimal::Decimal;

/// Cached entry: rate + insertion timestamp.
struct CacheEntry {
    rate: Decimal,
    inserted_at: Instant,
}

/// In-process LRU cache for quoted rates.
pub struct RateCache {
    cache: Mutex<LruCache<(String, String), CacheEntry>>,
    ttl: Duration,
}

impl RateCache {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of (token, currency) pairs to cache.
    /// - `ttl`: Time-to-live for each cache entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Get a cached rate. Returns `None` if not cached or expired.
    pub fn get(&self, token: &str, currency: &str) -> Option<Decimal> {
        let key = cache_key(token, currency);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.rate);
            }
            // Expired
            cache.pop(&key);
        }
        None
    }

    pub fn put(&self, token: &str, currency: &str, rate: Decimal) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                cache_key(token, currency),
                CacheEntry {
                    rate,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, token: &str, currency: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&cache_key(token, currency));
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(token: &str, currency: &str) -> (String, String) {
    (
        token.trim().to_ascii_uppercase(),
        currency.trim().to_ascii_uppercase(),
    )
}
