//! On-disk cache entry format

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current cache file format version
pub const CACHE_VERSION: u32 = 1;

/// A cached value together with the key it was stored under.
///
/// Entry files are named after a digest of the key, so the key itself is
/// kept in the payload for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub cached_at: DateTime<Utc>,
    pub version: u32,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
            cached_at: Utc::now(),
            version: CACHE_VERSION,
        }
    }

    /// Age of this entry in whole seconds
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.cached_at).num_seconds()
    }

    /// Whether this entry is older than `ttl`
    pub fn is_older_than(&self, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() > self.cached_at + ttl,
            Err(_) => false,
        }
    }
}
