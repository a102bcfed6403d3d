//! LDAP backend
//!
//! Enumerates posix accounts and groups from an RFC 2307 directory and
//! resolves them through the host account database.

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::{resolve_entries, CachedClass, DomainTiers, EntryNames, IdentityCacheStore};
use crate::config::{CacheFlags, DirectoryConfig, LdapSettings, SearchScope, COUNT_PAGE_SIZE};
use crate::connection::{ConnectionContext, DirectoryConnection, DirectoryEntry, SearchResult};
use crate::error::DirectoryResult;
use crate::filter::{and_equals, and_present, escape_value};
use crate::identity::{Identifier, IdentitySet, IdentitySource, LocalGroup, LocalUser};
use crate::service::DirectoryDeps;

const USER_OBJECT: &str = "(|(objectclass=person)(objectclass=account))";
const GROUP_OBJECT: &str = "(objectclass=posixgroup)";

/// Where and how one identity class lives in the directory.
struct AccountClass {
    object: &'static str,
    /// Attribute holding the account name; also the RDN attribute.
    name_attr: &'static str,
    id_attr: &'static str,
    /// Attribute whose presence marks an enumerable entry.
    present_attr: &'static str,
}

const USERS: AccountClass = AccountClass {
    object: USER_OBJECT,
    name_attr: "uid",
    id_attr: "uidnumber",
    present_attr: "uid",
};

const GROUPS: AccountClass = AccountClass {
    object: GROUP_OBJECT,
    name_attr: "cn",
    id_attr: "gidnumber",
    present_attr: "gidnumber",
};

impl AccountClass {
    fn all_filter(&self) -> String {
        and_present(self.object, self.present_attr)
    }

    fn lookup_filter(&self, id: &Identifier) -> String {
        match id {
            Identifier::Id(n) => and_equals(self.object, self.id_attr, &n.to_string()),
            // users match on uid or cn, groups on cn only
            Identifier::Name(name) if self.name_attr != "cn" => {
                let value = escape_value(name);
                format!(
                    "(&{}(|({}={})(cn={})))",
                    self.object, self.name_attr, value, value
                )
            }
            Identifier::Name(name) => and_equals(self.object, self.name_attr, name),
        }
    }
}

/// Directory backend for a plain LDAP server.
pub struct LdapDirectory {
    settings: LdapSettings,
    connection: Mutex<DirectoryConnection>,
    identities: Arc<dyn IdentitySource>,
    store: Option<IdentityCacheStore>,
    flags: CacheFlags,
    page_size: u32,
    user_count: SyncMutex<Option<usize>>,
    group_count: SyncMutex<Option<usize>>,
}

impl LdapDirectory {
    pub fn new(settings: LdapSettings, config: &DirectoryConfig, deps: &DirectoryDeps) -> Self {
        let context = ConnectionContext::for_ldap(&settings, config);
        info!(uri = %context.uri(), base_dn = %settings.base_dn, "LDAP directory configured");
        let connection = DirectoryConnection::new(
            Arc::clone(&deps.transport),
            context,
            deps.query_cache.clone(),
        );
        Self {
            settings,
            connection: Mutex::new(connection),
            identities: Arc::clone(&deps.identities),
            store: deps.store.clone(),
            flags: config.cache.flags,
            page_size: config.page_size,
            user_count: SyncMutex::new(None),
            group_count: SyncMutex::new(None),
        }
    }

    pub fn settings(&self) -> &LdapSettings {
        &self.settings
    }

    /// Use different cache flags, e.g. write-only for a cache fill.
    pub fn with_cache_flags(mut self, flags: CacheFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Search with a one-off page size; the connection is opened for the
    /// call and closed afterwards.
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[&str],
        page_size: u32,
    ) -> DirectoryResult<SearchResult> {
        let mut conn = self.connection.lock().await;
        conn.save();
        let context = conn.context().clone().with_page_size(page_size);
        conn.repoint(context).await;
        let result = conn
            .search_once(Some(base), SearchScope::Subtree, filter, attributes)
            .await;
        conn.restore().await;
        result
    }

    async fn search_or_empty(
        &self,
        base: &str,
        filter: &str,
        attributes: &[&str],
        page_size: u32,
    ) -> SearchResult {
        match self.search(base, filter, attributes, page_size).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(base_dn = %base, filter = %filter, error = %e, "LDAP search failed");
                Vec::new()
            }
        }
    }

    /// Raw user entries, paged.
    pub async fn search_users(&self) -> SearchResult {
        self.search_or_empty(
            &self.settings.user_base(),
            &USERS.all_filter(),
            &[USERS.name_attr],
            self.page_size,
        )
        .await
    }

    /// Raw entry of one user, by name or uid number.
    pub async fn search_user(&self, id: &Identifier) -> Option<DirectoryEntry> {
        self.search_one(&USERS, &self.settings.user_base(), id).await
    }

    pub async fn search_groups(&self) -> SearchResult {
        self.search_or_empty(
            &self.settings.group_base(),
            &GROUPS.all_filter(),
            &[GROUPS.name_attr],
            self.page_size,
        )
        .await
    }

    pub async fn search_group(&self, id: &Identifier) -> Option<DirectoryEntry> {
        self.search_one(&GROUPS, &self.settings.group_base(), id).await
    }

    async fn search_one(
        &self,
        class: &AccountClass,
        base: &str,
        id: &Identifier,
    ) -> Option<DirectoryEntry> {
        self.search_or_empty(base, &class.lookup_filter(id), &[], 0)
            .await
            .into_iter()
            .find(|entry| !entry.is_referral())
    }

    /// Every user with a local account.
    #[instrument(skip(self))]
    pub async fn get_users(&self) -> IdentitySet<LocalUser> {
        self.users_with_page_size(self.page_size).await
    }

    async fn users_with_page_size(&self, page_size: u32) -> IdentitySet<LocalUser> {
        let users = self
            .enumerate::<LocalUser>(&USERS, &self.settings.user_base(), page_size)
            .await;
        *self.user_count.lock() = Some(users.len());
        IdentitySet::single(users)
    }

    /// Every group with a local counterpart.
    #[instrument(skip(self))]
    pub async fn get_groups(&self) -> IdentitySet<LocalGroup> {
        self.groups_with_page_size(self.page_size).await
    }

    async fn groups_with_page_size(&self, page_size: u32) -> IdentitySet<LocalGroup> {
        let groups = self
            .enumerate::<LocalGroup>(&GROUPS, &self.settings.group_base(), page_size)
            .await;
        *self.group_count.lock() = Some(groups.len());
        IdentitySet::single(groups)
    }

    async fn enumerate<R: CachedClass>(
        &self,
        class: &AccountClass,
        base: &str,
        page_size: u32,
    ) -> Vec<R> {
        let tiers = DomainTiers::<R>::open(self.store.as_ref(), None, self.flags);

        if let Some(records) = tiers.as_ref().and_then(DomainTiers::loaded_records) {
            debug!(kind = R::KIND, count = records.len(), "Served from identity cache");
            return records;
        }

        let entries = match tiers.as_ref().and_then(DomainTiers::loaded_entries) {
            Some(entries) => entries,
            None => {
                match self
                    .search(base, &class.all_filter(), &[class.name_attr], page_size)
                    .await
                {
                    Ok(entries) => entries,
                    Err(e) => {
                        // do not mark an incomplete enumeration as loaded
                        warn!(kind = R::KIND, base_dn = %base, error = %e, "Enumeration failed");
                        return Vec::new();
                    }
                }
            }
        };

        let records = resolve_entries(entries, tiers.as_ref(), self.identities.as_ref(), |entry| {
            let name = entry.first(class.name_attr)?;
            Some(EntryNames {
                raw_key: entry.dn.clone(),
                lookup_name: name.to_string(),
            })
        });
        info!(kind = R::KIND, count = records.len(), "Enumerated LDAP identities");
        records
    }

    /// Resolve one user. Falls back to a plain local lookup of `id` when
    /// the directory has no match.
    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &Identifier) -> Option<LocalUser> {
        self.lookup::<LocalUser>(&USERS, &self.settings.user_base(), id)
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_group(&self, id: &Identifier) -> Option<LocalGroup> {
        self.lookup::<LocalGroup>(&GROUPS, &self.settings.group_base(), id)
            .await
    }

    async fn lookup<R: CachedClass>(
        &self,
        class: &AccountClass,
        base: &str,
        id: &Identifier,
    ) -> Option<R> {
        let tiers = DomainTiers::<R>::open(self.store.as_ref(), None, self.flags);
        // only names are cache keys; numeric ids are resolved through the directory
        let name = id.as_name();

        if let Some(record) = name.and_then(|name| tiers.as_ref()?.record(name)) {
            return Some(record);
        }

        let cached = name.and_then(|name| {
            let raw_key = format!("{}={},{}", class.name_attr, name, base);
            tiers.as_ref()?.entry(&raw_key)
        });
        let entry = match cached {
            Some(entry) => Some(entry),
            None => self.search_one(class, base, id).await,
        };

        let resolved = entry.and_then(|entry| {
            let account = entry.first(class.name_attr)?.to_string();
            if let Some(tiers) = &tiers {
                tiers.store_entry(&entry.dn, &entry);
            }
            let record = R::lookup(self.identities.as_ref(), &Identifier::Name(account.clone()))?;
            Some((account, record))
        });

        match resolved {
            Some((account, record)) => {
                if let Some(tiers) = &tiers {
                    tiers.store_record(&account, &record);
                }
                Some(record)
            }
            None => {
                debug!(kind = R::KIND, id = %id, "Not in directory, trying local lookup");
                R::lookup(self.identities.as_ref(), id)
            }
        }
    }

    /// Number of resolvable users. Enumerates once with a large page size
    /// when no count is known yet.
    pub async fn user_count(&self) -> usize {
        let known = *self.user_count.lock();
        match known {
            Some(count) => count,
            None => self.users_with_page_size(COUNT_PAGE_SIZE).await.len(),
        }
    }

    pub async fn group_count(&self) -> usize {
        let known = *self.group_count.lock();
        match known {
            Some(count) => count,
            None => self.groups_with_page_size(COUNT_PAGE_SIZE).await.len(),
        }
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("settings", &self.settings)
            .field("flags", &self.flags)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
