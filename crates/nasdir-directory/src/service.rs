//! Backend selection and the caller-facing lookup API
//!
//! [`DirectoryService`] is built once from a [`DirectoryConfig`] and
//! dispatches to the LDAP or Active Directory backend, or answers nothing
//! when no directory service is enabled. Collaborators (wire transport,
//! DNS, host account database, identity cache) come in through
//! [`DirectoryDeps`] so they can be replaced in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use crate::ad::ActiveDirectoryDirectory;
use crate::cache::IdentityCacheStore;
use crate::config::{CacheFlags, DirectoryConfig, ServiceKind};
use crate::connection::{Ldap3Transport, LdapTransport};
use crate::discovery::{HickoryResolver, SrvResolver};
use crate::error::{DirectoryError, DirectoryResult};
use crate::identity::{
    Identifier, IdentitySet, IdentitySource, LocalGroup, LocalUser, NssIdentitySource,
};
use crate::ldap::LdapDirectory;
use crate::query_cache::QueryCache;

/// External collaborators shared by the backends.
#[derive(Clone)]
pub struct DirectoryDeps {
    pub transport: Arc<dyn LdapTransport>,
    pub resolver: Arc<dyn SrvResolver>,
    pub identities: Arc<dyn IdentitySource>,
    /// Identity cache; `None` disables both tiers regardless of flags.
    pub store: Option<IdentityCacheStore>,
    pub query_cache: QueryCache,
}

impl DirectoryDeps {
    /// Dependencies with an in-memory query cache and no identity cache.
    pub fn new(
        transport: Arc<dyn LdapTransport>,
        resolver: Arc<dyn SrvResolver>,
        identities: Arc<dyn IdentitySource>,
    ) -> Self {
        Self {
            transport,
            resolver,
            identities,
            store: None,
            query_cache: QueryCache::in_memory(),
        }
    }

    /// Production dependencies: ldap3, the system resolver, NSS, and the
    /// cache tree configured in `config`.
    pub fn system(config: &DirectoryConfig) -> DirectoryResult<Self> {
        let store = IdentityCacheStore::open(&config.cache.root)?;
        let query_cache = if config.cache.persist_queries {
            store.query_cache(config.cache.query_ttl())?
        } else {
            QueryCache::in_memory()
        };
        Ok(Self {
            transport: Arc::new(Ldap3Transport::new()),
            resolver: Arc::new(HickoryResolver::from_system_conf()),
            identities: Arc::new(NssIdentitySource),
            store: Some(store),
            query_cache,
        })
    }

    pub fn with_store(mut self, store: Option<IdentityCacheStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_query_cache(mut self, query_cache: QueryCache) -> Self {
        self.query_cache = query_cache;
        self
    }
}

impl std::fmt::Debug for DirectoryDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryDeps")
            .field("store", &self.store)
            .field("query_cache", &self.query_cache)
            .finish_non_exhaustive()
    }
}

/// Enumerate and resolve directory identities as local accounts.
///
/// Directory failures never surface here: they show up as empty sets and
/// `None`, with the cause in the logs.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    fn kind(&self) -> ServiceKind;

    async fn get_users(&self) -> IdentitySet<LocalUser>;

    async fn get_groups(&self) -> IdentitySet<LocalGroup>;

    async fn get_user(&self, id: &Identifier) -> Option<LocalUser>;

    async fn get_group(&self, id: &Identifier) -> Option<LocalGroup>;

    async fn user_count(&self) -> usize;

    async fn group_count(&self) -> usize;
}

#[async_trait]
impl IdentityDirectory for LdapDirectory {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Ldap
    }

    async fn get_users(&self) -> IdentitySet<LocalUser> {
        LdapDirectory::get_users(self).await
    }

    async fn get_groups(&self) -> IdentitySet<LocalGroup> {
        LdapDirectory::get_groups(self).await
    }

    async fn get_user(&self, id: &Identifier) -> Option<LocalUser> {
        LdapDirectory::get_user(self, id).await
    }

    async fn get_group(&self, id: &Identifier) -> Option<LocalGroup> {
        LdapDirectory::get_group(self, id).await
    }

    async fn user_count(&self) -> usize {
        LdapDirectory::user_count(self).await
    }

    async fn group_count(&self) -> usize {
        LdapDirectory::group_count(self).await
    }
}

#[async_trait]
impl IdentityDirectory for ActiveDirectoryDirectory {
    fn kind(&self) -> ServiceKind {
        ServiceKind::ActiveDirectory
    }

    async fn get_users(&self) -> IdentitySet<LocalUser> {
        ActiveDirectoryDirectory::get_users(self).await
    }

    async fn get_groups(&self) -> IdentitySet<LocalGroup> {
        ActiveDirectoryDirectory::get_groups(self).await
    }

    async fn get_user(&self, id: &Identifier) -> Option<LocalUser> {
        ActiveDirectoryDirectory::get_user(self, id).await
    }

    async fn get_group(&self, id: &Identifier) -> Option<LocalGroup> {
        ActiveDirectoryDirectory::get_group(self, id).await
    }

    async fn user_count(&self) -> usize {
        ActiveDirectoryDirectory::user_count(self).await
    }

    async fn group_count(&self) -> usize {
        ActiveDirectoryDirectory::group_count(self).await
    }
}

/// The directory backend selected by configuration.
#[derive(Debug)]
pub enum DirectoryService {
    Ldap(LdapDirectory),
    ActiveDirectory(ActiveDirectoryDirectory),
    /// No directory service; NT4 and NIS also land here since the host
    /// resolves those accounts by itself.
    Disabled,
}

impl DirectoryService {
    /// Build the backend for `config.service`.
    ///
    /// Fails only when the enabled service has no settings block.
    #[instrument(skip_all, fields(service = ?config.service))]
    pub async fn from_config(config: &DirectoryConfig, deps: &DirectoryDeps) -> DirectoryResult<Self> {
        let service = match config.service {
            ServiceKind::Ldap => {
                let settings = config.ldap.clone().ok_or_else(|| {
                    DirectoryError::invalid_configuration("ldap service enabled without settings")
                })?;
                DirectoryService::Ldap(LdapDirectory::new(settings, config, deps))
            }
            ServiceKind::ActiveDirectory => {
                let settings = config.active_directory.clone().ok_or_else(|| {
                    DirectoryError::invalid_configuration(
                        "active directory service enabled without settings",
                    )
                })?;
                DirectoryService::ActiveDirectory(
                    ActiveDirectoryDirectory::connect(settings, config, deps).await,
                )
            }
            ServiceKind::Disabled | ServiceKind::Nt4 | ServiceKind::Nis => {
                DirectoryService::Disabled
            }
        };
        info!(kind = ?service.kind(), "Directory service ready");
        Ok(service)
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, DirectoryService::Disabled)
    }

    pub fn as_active_directory(&self) -> Option<&ActiveDirectoryDirectory> {
        match self {
            DirectoryService::ActiveDirectory(ad) => Some(ad),
            _ => None,
        }
    }

    fn backend(&self) -> Option<&dyn IdentityDirectory> {
        match self {
            DirectoryService::Ldap(ldap) => Some(ldap),
            DirectoryService::ActiveDirectory(ad) => Some(ad),
            DirectoryService::Disabled => None,
        }
    }
}

#[async_trait]
impl IdentityDirectory for DirectoryService {
    fn kind(&self) -> ServiceKind {
        self.backend()
            .map_or(ServiceKind::Disabled, |backend| backend.kind())
    }

    async fn get_users(&self) -> IdentitySet<LocalUser> {
        match self.backend() {
            Some(backend) => backend.get_users().await,
            None => IdentitySet::new(),
        }
    }

    async fn get_groups(&self) -> IdentitySet<LocalGroup> {
        match self.backend() {
            Some(backend) => backend.get_groups().await,
            None => IdentitySet::new(),
        }
    }

    async fn get_user(&self, id: &Identifier) -> Option<LocalUser> {
        self.backend()?.get_user(id).await
    }

    async fn get_group(&self, id: &Identifier) -> Option<LocalGroup> {
        self.backend()?.get_group(id).await
    }

    async fn user_count(&self) -> usize {
        match self.backend() {
            Some(backend) => backend.user_count().await,
            None => 0,
        }
    }

    async fn group_count(&self) -> usize {
        match self.backend() {
            Some(backend) => backend.group_count().await,
            None => 0,
        }
    }
}

/// Every directory user that has a local account.
pub async fn enumerate_users(directory: &dyn IdentityDirectory) -> Vec<LocalUser> {
    directory.get_users().await.into_vec()
}

pub async fn enumerate_groups(directory: &dyn IdentityDirectory) -> Vec<LocalGroup> {
    directory.get_groups().await.into_vec()
}

/// Resolve a user given by name or numeric id.
///
/// A missing identifier is a caller bug and the only error returned.
pub async fn resolve_user(
    directory: &dyn IdentityDirectory,
    name_or_id: Option<&str>,
) -> DirectoryResult<Option<LocalUser>> {
    let id = Identifier::parse(name_or_id, "user")?;
    Ok(directory.get_user(&id).await)
}

pub async fn resolve_group(
    directory: &dyn IdentityDirectory,
    name_or_id: Option<&str>,
) -> DirectoryResult<Option<LocalGroup>> {
    let id = Identifier::parse(name_or_id, "group")?;
    Ok(directory.get_group(&id).await)
}

/// Drop every cached identity and query result. Returns the number of
/// files removed.
pub fn cache_expire(deps: &DirectoryDeps) -> DirectoryResult<usize> {
    let mut removed = match &deps.store {
        Some(store) => store.expire()?,
        None => 0,
    };
    removed += deps.query_cache.clear();
    Ok(removed)
}

/// Outcome of a cache fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub users: usize,
    pub groups: usize,
}

/// Enumerate users and groups with cache writes on and reads off, so every
/// tier and sentinel is rebuilt from the directory.
#[instrument(skip_all)]
pub async fn cache_fill(config: &DirectoryConfig, deps: &DirectoryDeps) -> DirectoryResult<FillReport> {
    if deps.store.is_none() {
        return Err(DirectoryError::cache("no identity cache configured"));
    }
    let config = config
        .clone()
        .with_cache_flags(CacheFlags::CACHE_WRITE_USER | CacheFlags::CACHE_WRITE_GROUP);
    let service = DirectoryService::from_config(&config, deps).await?;

    let report = FillReport {
        users: service.get_users().await.len(),
        groups: service.get_groups().await.len(),
    };
    info!(users = report.users, groups = report.groups, "Identity cache filled");
    Ok(report)
}
