//! One cache directory holding entries of a single value type.

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{DirectoryError, DirectoryResult};

use super::entry::CacheEntry;

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Write `contents` to `path` through a temporary file in the same
/// directory, so readers never observe a partial file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> DirectoryResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| DirectoryError::cache(format!("{} has no parent", path.display())))?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| {
        DirectoryError::cache(format!("failed to persist {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

/// Remove an unusable entry file; returns whether it was removed.
fn discard(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            false
        }
    }
}

/// A directory of `<sha256(key)>.json` entry files plus an optional
/// "fully loaded" sentinel file.
#[derive(Debug)]
pub struct CacheTier<V> {
    dir: PathBuf,
    sentinel: Option<&'static str>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for CacheTier<V> {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            sentinel: self.sentinel,
            _value: PhantomData,
        }
    }
}

impl<V> CacheTier<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Open (creating if needed) the tier stored in `dir`.
    pub fn open(dir: impl Into<PathBuf>, sentinel: Option<&'static str>) -> DirectoryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sentinel,
            _value: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sha256_hex(key)))
    }

    fn read_entry(path: &Path) -> Option<CacheEntry<V>> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache file");
                discard(path);
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<V>>(&contents) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cache file is corrupted, removing");
                discard(path);
                None
            }
        }
    }

    /// Stored entry for `key`. Unreadable or corrupt files are misses.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        Self::read_entry(&self.entry_path(key)).filter(|entry| entry.key == key)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    pub fn put(&self, key: &str, value: &V) -> DirectoryResult<()> {
        let entry = CacheEntry::new(key, value);
        let contents = serde_json::to_vec(&entry)?;
        write_atomic(&self.entry_path(key), &contents)
    }

    /// Remove `key`; returns whether an entry existed.
    pub fn remove(&self, key: &str) -> DirectoryResult<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Cache tier not readable");
                return Vec::new();
            }
        };
        read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }

    /// All readable entries, ordered by key.
    pub fn entries(&self) -> Vec<CacheEntry<V>> {
        let mut entries: Vec<CacheEntry<V>> = self
            .entry_files()
            .iter()
            .filter_map(|path| Self::read_entry(path))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|entry| entry.key).collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.entries().into_iter().map(|entry| entry.value).collect()
    }

    pub fn len(&self) -> usize {
        self.entry_files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the "fully loaded" sentinel is present.
    pub fn is_loaded(&self) -> bool {
        self.sentinel
            .map(|name| self.dir.join(name).is_file())
            .unwrap_or(false)
    }

    /// Write the "fully loaded" sentinel.
    pub fn mark_loaded(&self) -> DirectoryResult<()> {
        let Some(name) = self.sentinel else {
            return Ok(());
        };
        let stamp = chrono::Utc::now().to_rfc3339();
        write_atomic(&self.dir.join(name), stamp.as_bytes())
    }
}
