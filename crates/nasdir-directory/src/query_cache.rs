//! Raw search result cache
//!
//! Non-paged searches are keyed by a digest of the filter, endpoint and
//! base DN. Results are kept in memory for the life of the handle and,
//! for persistent caches, on disk across invocations until the cache tree
//! is expired.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{sha256_hex, CacheEntry, CacheTier};
use crate::connection::SearchResult;
use crate::error::DirectoryResult;

struct Inner {
    memory: Mutex<HashMap<String, CacheEntry<SearchResult>>>,
    disk: Option<CacheTier<SearchResult>>,
    ttl: Option<Duration>,
}

/// Shared handle to a query cache. Clones see the same entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("dir", &self.inner.disk.as_ref().map(|d| d.dir().to_path_buf()))
            .field("ttl", &self.inner.ttl)
            .field("memory_entries", &self.inner.memory.lock().len())
            .finish()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl QueryCache {
    /// Cache that lives only as long as its handles.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                memory: Mutex::new(HashMap::new()),
                disk: None,
                ttl: None,
            }),
        }
    }

    /// Cache backed by `dir`. With `ttl` set, entries older than it are
    /// misses; without it they stay valid until cleared.
    pub fn persistent(dir: impl Into<PathBuf>, ttl: Option<Duration>) -> DirectoryResult<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                memory: Mutex::new(HashMap::new()),
                disk: Some(CacheTier::open(dir, None)?),
                ttl,
            }),
        })
    }

    /// Cache key for one query: `sha256(filter + host + port + base)`.
    pub fn key(filter: &str, host: &str, port: u16, base_dn: Option<&str>) -> String {
        sha256_hex(&format!(
            "{}{}{}{}",
            filter,
            host,
            port,
            base_dn.unwrap_or("")
        ))
    }

    fn expired(&self, entry: &CacheEntry<SearchResult>) -> bool {
        self.inner
            .ttl
            .is_some_and(|ttl| entry.is_older_than(ttl))
    }

    pub fn get(&self, key: &str) -> Option<SearchResult> {
        {
            let mut memory = self.inner.memory.lock();
            if let Some(entry) = memory.get(key) {
                if !self.expired(entry) {
                    return Some(entry.value.clone());
                }
                memory.remove(key);
            }
        }

        let disk = self.inner.disk.as_ref()?;
        let entry = disk.get_entry(key)?;
        if self.expired(&entry) {
            debug!(key = %key, "Cached query expired");
            if let Err(e) = disk.remove(key) {
                warn!(key = %key, error = %e, "Failed to remove expired query");
            }
            return None;
        }

        let value = entry.value.clone();
        self.inner.memory.lock().insert(key.to_string(), entry);
        Some(value)
    }

    pub fn put(&self, key: &str, value: SearchResult) {
        if let Some(disk) = &self.inner.disk {
            if let Err(e) = disk.put(key, &value) {
                warn!(key = %key, error = %e, "Failed to persist query result");
            }
        }
        self.inner
            .memory
            .lock()
            .insert(key.to_string(), CacheEntry::new(key, value));
    }

    /// Drop every entry, in memory and on disk. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut removed = {
            let mut memory = self.inner.memory.lock();
            let count = memory.len();
            memory.clear();
            count
        };
        if let Some(disk) = &self.inner.disk {
            removed = 0;
            for key in disk.keys() {
                match disk.remove(&key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Failed to remove cached query"),
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        match &self.inner.disk {
            Some(disk) => disk.len(),
            None => self.inner.memory.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
