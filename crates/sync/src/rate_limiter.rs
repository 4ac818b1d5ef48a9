// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Per-`(connection, path)` rate limiter for remote directory listings
//! (the write-path contract "Rate limiting", §4.6): a minimum inter-request
//! interval plus a short-TTL cache so UI-driven listing bursts never
//! reach the remote.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

struct Entry {
    last_request_at: Instant,
    cached: Option<(Instant, Value)>,
}

/// Keyed by `(connection_key, path)`. Default minimum interval is 2s,
/// matching the remote-browsing default in the write-path contract
pub struct RateLimiter {
    min_interval: Duration,
    cache_ttl: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, cache_ttl: Duration) -> Self {
        Self { min_interval, cache_ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn default_for_remote_browsing() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(2))
    }

    /// Returns a cached value for `(connection, path)` if one is still
    /// within TTL, without counting as a new request.
    pub fn cached(&self, connection: &str, path: &str) -> Option<Value> {
        let entries = self.entries.lock();
        let entry = entries.get(&(connection.to_string(), path.to_string()))?;
        let (cached_at, value) = entry.cached.as_ref()?;
        if cached_at.elapsed() < self.cache_ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    /// Returns `true` if a fresh request to `(connection, path)` is
    /// allowed right now; if so, records the attempt immediately so
    /// concurrent callers are also throttled.
    pub fn try_acquire(&self, connection: &str, path: &str) -> bool {
        let key = (connection.to_string(), path.to_string());
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(&key) {
            Some(entry) if now.duration_since(entry.last_request_at) < self.min_interval => false,
            Some(entry) => {
                entry.last_request_at = now;
                true
            }
            None => {
                entries.insert(key, Entry { last_request_at: now, cached: None });
                true
            }
        }
    }

    /// Record the result of a request that [`try_acquire`] admitted, so
    /// subsequent callers within the TTL window can be served from cache.
    ///
    /// [`try_acquire`]: Self::try_acquire
    pub fn store(&self, connection: &str, path: &str, value: Value) {
        let key = (connection.to_string(), path.to_string());
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| Entry {
            last_request_at: Instant::now(),
            cached: None,
        });
        entry.cached = Some((Instant::now(), value));
    }
}
