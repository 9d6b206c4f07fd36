use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::api::FetchOptions;

/// Identifies a cached response: path plus the options that shape the
/// response (method, body, header overrides). The bearer token is not part of
/// the key; the cache is cleared on logout instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(path: &str, options: &FetchOptions) -> Self {
        let mut key = format!("{} {}", options.method, path);
        if let Some(ref body) = options.body {
            // serde_json maps are sorted, so equal bodies render equally
            key.push_str(" body=");
            key.push_str(&body.to_string());
        }
        for (name, value) in &options.headers {
            if name == "authorization" {
                continue;
            }
            key.push_str(&format!(" {}={}", name, value));
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub cached_at: Instant,
}

impl CacheEntry {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            cached_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.cached_at)
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

/// Process-wide response cache shared by every call-site of one client.
///
/// Entries past the TTL are never returned; they are dropped on lookup.
///
/// Every [`clear`](Self::clear) starts a new epoch. A response whose request
/// was sent in an earlier epoch is not stored, so nothing fetched under a
/// previous identity survives a logout.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    epoch: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            epoch: AtomicU64::new(0),
        }
    }

    /// Current epoch; capture it before sending a request whose response
    /// goes through [`insert_if_current`](Self::insert_if_current).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let stale = match self.entries.get(key) {
            Some(entry) if !entry.is_stale(self.ttl) => {
                debug!(key = %key, age_ms = entry.age().as_millis() as u64, "Cache hit");
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            debug!(key = %key, "Cache entry expired");
            self.entries.remove(key);
        }
        None
    }

    /// Last write wins.
    pub fn insert(&self, key: CacheKey, payload: Value) {
        self.entries.insert(key, CacheEntry::new(payload));
    }

    /// Store `payload` only if the cache was not cleared since `epoch`.
    /// Returns whether the entry was kept.
    pub fn insert_if_current(&self, key: CacheKey, payload: Value, epoch: u64) -> bool {
        if self.epoch() != epoch {
            debug!(key = %key, "Dropping response from before cache clear");
            return false;
        }
        self.entries.insert(key.clone(), CacheEntry::new(payload));
        // A clear may have raced the insert
        if self.epoch() != epoch {
            self.entries.remove(&key);
            return false;
        }
        true
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    /// Number of stored entries, including any not yet found to be stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
