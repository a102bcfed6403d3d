//! Identity cache
//!
//! Resolved local records and raw directory entries, persisted under one
//! root so later invocations can skip enumeration entirely. Each class has
//! its own top-level directory; Active Directory tiers get one further
//! subdirectory per NetBIOS domain.
//!
//! ```text
//! <root>/users/[NETBIOS/]            .ul
//! <root>/groups/[NETBIOS/]           .gl
//! <root>/directory-users/[NETBIOS/]  .dul
//! <root>/directory-groups/[NETBIOS/] .dgl
//! <root>/queries/
//! ```

mod domain;
mod entry;
mod tier;

pub use domain::{resolve_entries, CachedClass, DomainTiers, EntryNames};
pub use entry::{CacheEntry, CACHE_VERSION};
pub use tier::{sha256_hex, CacheTier};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::connection::DirectoryEntry;
use crate::error::DirectoryResult;
use crate::identity::{LocalGroup, LocalUser};
use crate::query_cache::QueryCache;

pub const USERS_DIR: &str = "users";
pub const GROUPS_DIR: &str = "groups";
pub const DIRECTORY_USERS_DIR: &str = "directory-users";
pub const DIRECTORY_GROUPS_DIR: &str = "directory-groups";
pub const QUERIES_DIR: &str = "queries";

pub const USER_SENTINEL: &str = ".ul";
pub const GROUP_SENTINEL: &str = ".gl";
pub const DIRECTORY_USER_SENTINEL: &str = ".dul";
pub const DIRECTORY_GROUP_SENTINEL: &str = ".dgl";

const TOP_LEVEL_DIRS: [&str; 5] = [
    USERS_DIR,
    GROUPS_DIR,
    DIRECTORY_USERS_DIR,
    DIRECTORY_GROUPS_DIR,
    QUERIES_DIR,
];

/// Owner of the cache tree. Pass it to backends explicitly; there is no
/// process-wide instance.
#[derive(Debug, Clone)]
pub struct IdentityCacheStore {
    root: PathBuf,
}

impl IdentityCacheStore {
    /// Open the cache rooted at `root`, creating the top-level layout.
    pub fn open(root: impl Into<PathBuf>) -> DirectoryResult<Self> {
        let root = root.into();
        for dir in TOP_LEVEL_DIRS {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tier_dir(&self, top: &str, domain: Option<&str>) -> PathBuf {
        let dir = self.root.join(top);
        match domain {
            Some(domain) if !domain.is_empty() => dir.join(domain),
            _ => dir,
        }
    }

    /// Resolved users, optionally for one NetBIOS domain.
    pub fn users(&self, domain: Option<&str>) -> DirectoryResult<CacheTier<LocalUser>> {
        CacheTier::open(self.tier_dir(USERS_DIR, domain), Some(USER_SENTINEL))
    }

    pub fn groups(&self, domain: Option<&str>) -> DirectoryResult<CacheTier<LocalGroup>> {
        CacheTier::open(self.tier_dir(GROUPS_DIR, domain), Some(GROUP_SENTINEL))
    }

    /// Raw directory user entries.
    pub fn directory_users(
        &self,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<DirectoryEntry>> {
        CacheTier::open(
            self.tier_dir(DIRECTORY_USERS_DIR, domain),
            Some(DIRECTORY_USER_SENTINEL),
        )
    }

    pub fn directory_groups(
        &self,
        domain: Option<&str>,
    ) -> DirectoryResult<CacheTier<DirectoryEntry>> {
        CacheTier::open(
            self.tier_dir(DIRECTORY_GROUPS_DIR, domain),
            Some(DIRECTORY_GROUP_SENTINEL),
        )
    }

    /// Query cache persisted under `queries/`.
    pub fn query_cache(&self, ttl: Option<Duration>) -> DirectoryResult<QueryCache> {
        QueryCache::persistent(self.root.join(QUERIES_DIR), ttl)
    }

    /// NetBIOS domains that have a users tier.
    pub fn domains(&self) -> Vec<String> {
        self.domains_in(USERS_DIR)
    }

    /// NetBIOS domains with a subdirectory under the top-level `top`.
    pub fn domains_in(&self, top: &str) -> Vec<String> {
        let Ok(read_dir) = fs::read_dir(self.root.join(top)) else {
            return Vec::new();
        };
        let mut domains: Vec<String> = read_dir
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        domains.sort();
        domains
    }

    /// Wipe every cached entry and sentinel.
    ///
    /// Top-level directories survive (other services keep handles on them);
    /// anything else directly under the root is removed. Returns the number
    /// of files deleted.
    pub fn expire(&self) -> DirectoryResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                removed += clear_dir(&path)?;
            } else {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!(root = %self.root.display(), removed, "Identity cache expired");
        Ok(removed)
    }
}

/// Remove everything below `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> DirectoryResult<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            removed += clear_dir(&path)?;
            if let Err(e) = fs::remove_dir(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove cache directory");
            }
        } else {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
