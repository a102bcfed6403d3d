//! Resolved and raw tiers of one identity class in one domain.

use tracing::{debug, warn};

use crate::config::CacheFlags;
use crate::connection::DirectoryEntry;
use crate::error::DirectoryResult;
use crate::identity::{IdentitySource, Identifier, LocalGroup, LocalRecord, LocalUser};

use super::{CacheTier, IdentityCacheStore, GROUPS_DIR, USERS_DIR};

/// Cache hooks for an identity class.
pub trait CachedClass: LocalRecord {
    const READ: CacheFlags;
    const WRITE: CacheFlags;
    /// Top-level directory of the resolved tier.
    const RESOLVED_DIR: &'static str;

    fn resolved_tier(
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<Self>>;

    fn raw_tier(
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<DirectoryEntry>>;
}

impl CachedClass for LocalUser {
    const READ: CacheFlags = CacheFlags::CACHE_READ_USER;
    const WRITE: CacheFlags = CacheFlags::CACHE_WRITE_USER;
    const RESOLVED_DIR: &'static str = USERS_DIR;

    fn resolved_tier(
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<Self>> {
        store.users(domain)
    }

    fn raw_tier(
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<DirectoryEntry>> {
        store.directory_users(domain)
    }
}

impl CachedClass for LocalGroup {
    const READ: CacheFlags = CacheFlags::CACHE_READ_GROUP;
    const WRITE: CacheFlags = CacheFlags::CACHE_WRITE_GROUP;
    const RESOLVED_DIR: &'static str = GROUPS_DIR;

    fn resolved_tier(
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<Self>> {
        store.groups(domain)
    }

    fn raw_tier(
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<DirectoryEntry>> {
        store.directory_groups(domain)
    }
}

/// Both tiers of one class for one domain, gated by the cache flags.
#[derive(Debug)]
pub struct DomainTiers<R> {
    resolved: CacheTier<R>,
    raw: CacheTier<DirectoryEntry>,
    flags: CacheFlags,
}

impl<R: CachedClass> DomainTiers<R> {
    /// Tiers for `domain`, or `None` when caching is off for this class or
    /// the cache cannot be opened.
    pub fn open(
        store: Option<&IdentityCacheStore>,
        domain: Option<&str>,
        flags: CacheFlags,
    ) -> Option<Self> {
        let store = store?;
        if !flags.contains(R::READ) && !flags.contains(R::WRITE) {
            return None;
        }
        let tiers = R::resolved_tier(store, domain)
            .and_then(|resolved| Ok((resolved, R::raw_tier(store, domain)?)));
        match tiers {
            Ok((resolved, raw)) => Some(Self {
                resolved,
                raw,
                flags,
            }),
            Err(e) => {
                warn!(kind = R::KIND, domain = ?domain, error = %e, "Identity cache unavailable");
                None
            }
        }
    }

    fn can_read(&self) -> bool {
        self.flags.contains(R::READ)
    }

    fn can_write(&self) -> bool {
        self.flags.contains(R::WRITE)
    }

    /// Every resolved record, when the resolved tier is fully loaded.
    pub fn loaded_records(&self) -> Option<Vec<R>> {
        (self.can_read() && self.resolved.is_loaded()).then(|| self.resolved.values())
    }

    /// Every raw entry, when the raw tier is fully loaded.
    pub fn loaded_entries(&self) -> Option<Vec<DirectoryEntry>> {
        (self.can_read() && self.raw.is_loaded()).then(|| self.raw.values())
    }

    pub fn record(&self, key: &str) -> Option<R> {
        if !self.can_read() {
            return None;
        }
        self.resolved.get(key)
    }

    pub fn entry(&self, raw_key: &str) -> Option<DirectoryEntry> {
        if !self.can_read() {
            return None;
        }
        self.raw.get(raw_key)
    }

    pub fn store_record(&self, key: &str, record: &R) {
        if !self.can_write() {
            return;
        }
        if let Err(e) = self.resolved.put(key, record) {
            warn!(kind = R::KIND, key = %key, error = %e, "Failed to cache record");
        }
    }

    pub fn store_entry(&self, raw_key: &str, entry: &DirectoryEntry) {
        if !self.can_write() {
            return;
        }
        if let Err(e) = self.raw.put(raw_key, entry) {
            warn!(kind = R::KIND, key = %raw_key, error = %e, "Failed to cache directory entry");
        }
    }

    /// Write the sentinels of both tiers.
    pub fn mark_loaded(&self) {
        if !self.can_write() {
            return;
        }
        for result in [self.raw.mark_loaded(), self.resolved.mark_loaded()] {
            if let Err(e) = result {
                warn!(kind = R::KIND, error = %e, "Failed to write cache sentinel");
            }
        }
    }

    pub fn resolved(&self) -> &CacheTier<R> {
        &self.resolved
    }

    pub fn raw(&self) -> &CacheTier<DirectoryEntry> {
        &self.raw
    }
}

/// Keys derived from one raw entry: where to store the entry itself and
/// which local name to resolve it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryNames {
    pub raw_key: String,
    pub lookup_name: String,
}

/// Resolve raw entries to local records, populating the tiers on the way.
///
/// Referrals and entries `names` rejects are skipped, as are entries with
/// no local account. Sentinels are written once every entry is processed.
pub fn resolve_entries<R, F>(
    entries: Vec<DirectoryEntry>,
    tiers: Option<&DomainTiers<R>>,
    source: &dyn IdentitySource,
    names: F,
) -> Vec<R>
where
    R: CachedClass,
    F: Fn(&DirectoryEntry) -> Option<EntryNames>,
{
    let mut records = Vec::new();
    for entry in entries.iter().filter(|e| !e.is_referral()) {
        let Some(EntryNames {
            raw_key,
            lookup_name,
        }) = names(entry)
        else {
            continue;
        };

        if let Some(tiers) = tiers {
            tiers.store_entry(&raw_key, entry);
        }

        let Some(record) = R::lookup(source, &Identifier::Name(lookup_name.clone())) else {
            debug!(kind = R::KIND, name = %lookup_name, "No local account");
            continue;
        };

        if let Some(tiers) = tiers {
            tiers.store_record(&lookup_name, &record);
        }
        records.push(record);
    }

    if let Some(tiers) = tiers {
        tiers.mark_loaded();
    }
    records
}
