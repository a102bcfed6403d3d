//! Active Directory backend
//!
//! Accounts are enumerated per domain of the forest. The forest layout comes
//! from the rootDSE and the configuration partition; other domains are
//! found through a global catalog and reached through their own domain
//! controllers. Names are qualified as `NETBIOS<sep>sAMAccountName` unless
//! the host maps directory accounts to bare names.

mod domains;

pub use domains::{crossref_for_naming_context, DomainDescriptor, PartitionFilter};

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::{resolve_entries, CachedClass, DomainTiers, EntryNames, IdentityCacheStore};
use crate::config::{
    ActiveDirectorySettings, BindCredentials, CacheFlags, DirectoryConfig, SearchScope,
    COUNT_PAGE_SIZE,
};
use crate::connection::{
    ConnectionContext, DirectoryConnection, DirectoryEntry, LdapTransport, SearchResult,
};
use crate::discovery::DomainDiscovery;
use crate::error::DirectoryResult;
use crate::filter::{and_equals, and_present};
use crate::identity::{Identifier, IdentitySet, IdentitySource, LocalGroup, LocalUser};
use crate::query_cache::QueryCache;
use crate::service::DirectoryDeps;

/// Name attribute of every AD security principal.
const ACCOUNT_NAME: &str = "sAMAccountName";

/// `sAMAccountType`/`groupType` bit marking entries that are not usable
/// security principals.
const NON_SECURITY_BIT: i64 = 0x1;

struct AccountClass {
    object: &'static str,
    type_attr: &'static str,
}

const USERS: AccountClass = AccountClass {
    object: "(|(objectclass=user)(objectclass=person))",
    type_attr: "sAMAccountType",
};

const GROUPS: AccountClass = AccountClass {
    object: "(objectclass=group)",
    type_attr: "groupType",
};

impl AccountClass {
    fn all_filter(&self) -> String {
        and_present(self.object, ACCOUNT_NAME)
    }

    fn name_filter(&self, name: &str) -> String {
        and_equals(self.object, ACCOUNT_NAME, name)
    }

    fn attributes(&self) -> [&'static str; 2] {
        [ACCOUNT_NAME, self.type_attr]
    }

    /// Entries without a type, or with the low bit set, are skipped.
    fn is_security_principal(&self, entry: &DirectoryEntry) -> bool {
        entry
            .first_int(self.type_attr)
            .is_some_and(|value| value & NON_SECURITY_BIT == 0)
    }
}

/// Directory backend for an Active Directory forest.
pub struct ActiveDirectoryDirectory {
    settings: ActiveDirectorySettings,
    connection: Mutex<DirectoryConnection>,
    discovery: DomainDiscovery,
    transport: Arc<dyn LdapTransport>,
    query_cache: QueryCache,
    /// Context the connection was built from, reused for global catalogs.
    template: ConnectionContext,
    identities: Arc<dyn IdentitySource>,
    store: Option<IdentityCacheStore>,
    flags: CacheFlags,
    page_size: u32,
    netbios_name: String,
    base_dn: String,
    user_count: SyncMutex<Option<usize>>,
    group_count: SyncMutex<Option<usize>>,
}

impl ActiveDirectoryDirectory {
    /// Locate a domain controller and fill in the base DN and NetBIOS name
    /// when they are not configured.
    ///
    /// Never fails: without a reachable controller every query returns no
    /// rows and lookups fall back to the host database.
    #[instrument(skip_all, fields(domain = %settings.domain_name))]
    pub async fn connect(
        settings: ActiveDirectorySettings,
        config: &DirectoryConfig,
        deps: &DirectoryDeps,
    ) -> Self {
        let template = ConnectionContext::for_active_directory(&settings, config);
        let discovery = DomainDiscovery::new(
            Arc::clone(&deps.resolver),
            Arc::clone(&deps.transport),
            deps.query_cache.clone(),
            template.clone(),
        );

        let mut context = template.clone();
        if context.host.is_none() {
            let bind = settings.bind_credentials();
            match discovery
                .dc_connect(&settings.domain_name, bind.as_ref())
                .await
            {
                Some((host, port)) => context = context.with_host(host).with_port(port),
                None => warn!(domain = %settings.domain_name, "No domain controller available"),
            }
        }

        let connection = DirectoryConnection::new(
            Arc::clone(&deps.transport),
            context,
            deps.query_cache.clone(),
        );
        let mut directory = Self {
            netbios_name: settings.workgroup.clone().unwrap_or_default(),
            base_dn: settings.base_dn.clone().unwrap_or_default(),
            settings,
            connection: Mutex::new(connection),
            discovery,
            transport: Arc::clone(&deps.transport),
            query_cache: deps.query_cache.clone(),
            template,
            identities: Arc::clone(&deps.identities),
            store: deps.store.clone(),
            flags: config.cache.flags,
            page_size: config.page_size,
            user_count: SyncMutex::new(None),
            group_count: SyncMutex::new(None),
        };

        if directory.base_dn.is_empty() {
            if let Some(base_dn) = directory.get_base_dn().await {
                let conn = directory.connection.get_mut();
                let context = conn.context().clone().with_base_dn(Some(base_dn.clone()));
                conn.repoint(context).await;
                directory.base_dn = base_dn;
            }
        }

        if directory.netbios_name.is_empty() {
            directory.netbios_name = match directory.get_netbios_name().await {
                Some(name) => name,
                None => {
                    let fallback = directory
                        .settings
                        .domain_name
                        .split('.')
                        .next()
                        .unwrap_or_default()
                        .to_uppercase();
                    warn!(netbios_name = %fallback, "NetBIOS name not found, deriving from domain");
                    fallback
                }
            };
        }

        info!(
            netbios_name = %directory.netbios_name,
            base_dn = %directory.base_dn,
            "Active Directory configured"
        );
        directory
    }

    pub fn settings(&self) -> &ActiveDirectorySettings {
        &self.settings
    }

    pub fn netbios_name(&self) -> &str {
        &self.netbios_name
    }

    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Use different cache flags, e.g. write-only for a cache fill.
    pub fn with_cache_flags(mut self, flags: CacheFlags) -> Self {
        self.flags = flags;
        self
    }

    fn bind(&self) -> Option<BindCredentials> {
        self.settings.bind_credentials()
    }

    /// Search through the main connection, optionally pointed at another
    /// server for the duration of the call.
    async fn search_at(
        &self,
        endpoint: Option<(String, u16)>,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
        page_size: u32,
    ) -> DirectoryResult<SearchResult> {
        let mut conn = self.connection.lock().await;
        conn.save();
        let mut context = conn.context().clone().with_page_size(page_size);
        if let Some((host, port)) = endpoint {
            context = context.with_host(host).with_port(port);
        }
        conn.repoint(context).await;
        let result = conn.search_once(Some(base), scope, filter, attributes).await;
        conn.restore().await;
        result
    }

    /// Unpaged search on the main connection; failures are logged and
    /// yield no rows.
    async fn query(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> SearchResult {
        match self.search_at(None, base, scope, filter, attributes, 0).await {
            Ok(rows) => rows.into_iter().filter(|e| !e.is_referral()).collect(),
            Err(e) => {
                warn!(base_dn = %base, filter = %filter, error = %e, "Active Directory search failed");
                Vec::new()
            }
        }
    }

    /// The rootDSE of the current domain controller.
    pub async fn get_root_dse(&self) -> Option<DirectoryEntry> {
        self.query("", SearchScope::Base, "(objectclass=*)", &[])
            .await
            .into_iter()
            .next()
    }

    async fn root_dse_value(&self, attr: &str) -> Option<String> {
        self.get_root_dse()
            .await?
            .first(attr)
            .map(str::to_string)
    }

    /// Naming context of the forest root domain.
    pub async fn get_root_dn(&self) -> Option<String> {
        self.root_dse_value("rootDomainNamingContext").await
    }

    /// Naming context of the domain the controller serves.
    pub async fn get_base_dn(&self) -> Option<String> {
        self.root_dse_value("defaultNamingContext").await
    }

    pub async fn get_config_dn(&self) -> Option<String> {
        self.root_dse_value("configurationNamingContext").await
    }

    /// NetBIOS name of our domain, read from its crossRef.
    pub async fn get_netbios_name(&self) -> Option<String> {
        let config_dn = self.get_config_dn().await?;
        let base_dn = if self.base_dn.is_empty() {
            self.get_base_dn().await?
        } else {
            self.base_dn.clone()
        };
        self.query(
            &config_dn,
            SearchScope::Subtree,
            &crossref_for_naming_context(&base_dn),
            &["nETBIOSName"],
        )
        .await
        .iter()
        .find_map(|entry| entry.first("nETBIOSName").map(str::to_string))
    }

    /// crossRef entries under `CN=Partitions`.
    pub async fn get_partitions(&self, filter: &PartitionFilter) -> Vec<DirectoryEntry> {
        let Some(config_dn) = self.get_config_dn().await else {
            return Vec::new();
        };
        let base = format!("CN=Partitions,{}", config_dn);
        self.query(&base, SearchScope::Subtree, &filter.partition_filter(), &[])
            .await
            .into_iter()
            .filter(|entry| !entry.dn.is_empty())
            .collect()
    }

    /// DNS name of the forest root domain.
    pub async fn get_root_domain(&self) -> Option<String> {
        let root_dn = self.get_root_dn().await?;
        self.get_domain(&PartitionFilter::NcName(root_dn)).await
    }

    /// DNS name of the first partition matching `filter`.
    pub async fn get_domain(&self, filter: &PartitionFilter) -> Option<String> {
        self.get_partitions(filter)
            .await
            .iter()
            .find_map(|entry| entry.first("dnsRoot").map(str::to_string))
    }

    async fn global_catalog(&self) -> Option<DirectoryConnection> {
        let bind = self.bind();
        if let Some((host, port)) = self.settings.gc_endpoint() {
            let context = self
                .template
                .clone()
                .with_host(host)
                .with_port(port)
                .with_bind(bind)
                .with_base_dn(None);
            let mut conn = DirectoryConnection::new(
                Arc::clone(&self.transport),
                context,
                self.query_cache.clone(),
            );
            return conn.open().await.then_some(conn);
        }

        let root = match self.get_root_domain().await {
            Some(root) => root,
            None => self.settings.domain_name.clone(),
        };
        self.discovery.gc_connect(&root, bind.as_ref()).await
    }

    /// Domains of the forest.
    ///
    /// With [`PartitionFilter::All`] the global catalog is asked for every
    /// domain and each is described by its crossRef; otherwise the first
    /// crossRef matching the filter is returned. Unless trusted domains are
    /// allowed, only our own domain is kept.
    #[instrument(skip(self))]
    pub async fn get_domains(&self, filter: &PartitionFilter) -> Vec<DomainDescriptor> {
        let Some(config_dn) = self.get_config_dn().await else {
            return Vec::new();
        };

        let mut domains = Vec::new();
        if filter.is_all() {
            let Some(mut gc) = self.global_catalog().await else {
                return Vec::new();
            };
            let rows = gc
                .search(Some(""), SearchScope::Subtree, "(objectclass=domain)", &["dn"])
                .await;
            gc.close().await;
            let rows = match rows {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "Global catalog search failed");
                    return Vec::new();
                }
            };

            for row in rows.iter().filter(|r| !r.is_referral() && !r.dn.is_empty()) {
                let crossref = self
                    .query(
                        &config_dn,
                        SearchScope::Subtree,
                        &crossref_for_naming_context(&row.dn),
                        &[],
                    )
                    .await;
                match crossref.iter().find_map(DomainDescriptor::from_entry) {
                    Some(domain) => domains.push(domain),
                    None => debug!(dn = %row.dn, "Domain without a crossRef"),
                }
            }
        } else {
            let crossref = self
                .query(&config_dn, SearchScope::Subtree, &filter.crossref_filter(), &[])
                .await;
            domains.extend(crossref.iter().find_map(DomainDescriptor::from_entry));
        }

        if !self.settings.allow_trusted_domains && !self.netbios_name.is_empty() {
            domains.retain(|d| d.netbios_name.eq_ignore_ascii_case(&self.netbios_name));
        }
        debug!(count = domains.len(), "Found domains");
        domains
    }

    /// Name a local account carries for `account` of `domain`.
    pub fn qualified_name(&self, domain: &str, account: &str) -> String {
        if self.settings.bare_names() {
            account.to_string()
        } else {
            format!("{}{}{}", domain, self.settings.separator, account)
        }
    }

    fn raw_key(&self, domain: &str, account: &str) -> String {
        format!("{}{}{}", domain, self.settings.separator, account).to_uppercase()
    }

    fn is_own_domain(&self, netbios_name: &str) -> bool {
        netbios_name.eq_ignore_ascii_case(&self.netbios_name)
    }

    fn local_domain(&self) -> DomainDescriptor {
        DomainDescriptor::local(
            self.netbios_name.clone(),
            self.settings.domain_name.clone(),
            self.base_dn.clone(),
        )
    }

    /// Server to search for `domain`: `None` for the current controller.
    /// `Err` when no controller of a foreign domain answers.
    async fn domain_endpoint(&self, domain: &DomainDescriptor) -> Result<Option<(String, u16)>, ()> {
        if self.is_own_domain(&domain.netbios_name) {
            return Ok(None);
        }
        let bind = self.bind();
        match self.discovery.dc_connect(&domain.dns_root, bind.as_ref()).await {
            Some(endpoint) => Ok(Some(endpoint)),
            None => Err(()),
        }
    }

    async fn account_dn(&self, class: &AccountClass, name: &str) -> Option<String> {
        if self.settings.bind_name.is_empty()
            || self.settings.bind_password.is_empty()
            || self.base_dn.is_empty()
        {
            return None;
        }
        let entry = self
            .query(
                &self.base_dn,
                SearchScope::Subtree,
                &class.name_filter(name),
                &["distinguishedName"],
            )
            .await
            .into_iter()
            .next()?;
        Some(
            entry
                .first("distinguishedName")
                .map(str::to_string)
                .unwrap_or(entry.dn),
        )
    }

    /// DN of the user `name` (a bare sAMAccountName) in our domain.
    pub async fn get_user_dn(&self, name: &str) -> Option<String> {
        self.account_dn(&USERS, name).await
    }

    pub async fn get_group_dn(&self, name: &str) -> Option<String> {
        self.account_dn(&GROUPS, name).await
    }

    /// Every security principal user with a local account, per domain.
    #[instrument(skip(self))]
    pub async fn get_users(&self) -> IdentitySet<LocalUser> {
        self.users_with_page_size(self.page_size).await
    }

    async fn users_with_page_size(&self, page_size: u32) -> IdentitySet<LocalUser> {
        let users = self.enumerate::<LocalUser>(&USERS, page_size).await;
        *self.user_count.lock() = Some(users.len());
        users
    }

    #[instrument(skip(self))]
    pub async fn get_groups(&self) -> IdentitySet<LocalGroup> {
        self.groups_with_page_size(self.page_size).await
    }

    async fn groups_with_page_size(&self, page_size: u32) -> IdentitySet<LocalGroup> {
        let groups = self.enumerate::<LocalGroup>(&GROUPS, page_size).await;
        *self.group_count.lock() = Some(groups.len());
        groups
    }

    /// Cached records of every domain in scope, when all of them are fully
    /// loaded.
    fn cached_set<R: CachedClass>(&self) -> Option<IdentitySet<R>> {
        let store = self.store.as_ref()?;
        let domains = if self.settings.allow_trusted_domains {
            store.domains_in(R::RESOLVED_DIR)
        } else {
            vec![self.netbios_name.clone()]
        };
        if domains.is_empty() {
            return None;
        }

        let mut set = IdentitySet::new();
        for domain in domains {
            let tiers = DomainTiers::<R>::open(Some(store), Some(&domain), self.flags)?;
            let records = tiers.loaded_records()?;
            set.push_domain(Some(domain), records);
        }
        Some(set)
    }

    async fn enumerate<R: CachedClass>(
        &self,
        class: &AccountClass,
        page_size: u32,
    ) -> IdentitySet<R> {
        if let Some(set) = self.cached_set::<R>() {
            debug!(kind = R::KIND, count = set.len(), "Served from identity cache");
            return set;
        }

        let mut domains = self.get_domains(&PartitionFilter::All).await;
        if domains.is_empty() {
            domains.push(self.local_domain());
        }

        let mut set = IdentitySet::new();
        for domain in domains {
            let records = self.enumerate_domain::<R>(class, &domain, page_size).await;
            info!(
                kind = R::KIND,
                domain = %domain.netbios_name,
                count = records.len(),
                "Enumerated Active Directory identities"
            );
            set.push_domain(Some(domain.netbios_name), records);
        }
        set
    }

    async fn enumerate_domain<R: CachedClass>(
        &self,
        class: &AccountClass,
        domain: &DomainDescriptor,
        page_size: u32,
    ) -> Vec<R> {
        let netbios = domain.netbios_name.as_str();
        let tiers = DomainTiers::<R>::open(self.store.as_ref(), Some(netbios), self.flags);

        if let Some(records) = tiers.as_ref().and_then(DomainTiers::loaded_records) {
            return records;
        }

        let entries = match tiers.as_ref().and_then(DomainTiers::loaded_entries) {
            Some(entries) => entries,
            None => {
                let Ok(endpoint) = self.domain_endpoint(domain).await else {
                    warn!(domain = %netbios, "No domain controller for domain, skipping");
                    return Vec::new();
                };
                match self
                    .search_at(
                        endpoint,
                        &domain.naming_context,
                        SearchScope::Subtree,
                        &class.all_filter(),
                        &class.attributes(),
                        page_size,
                    )
                    .await
                {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(domain = %netbios, error = %e, "Enumeration failed");
                        return Vec::new();
                    }
                }
            }
        };

        resolve_entries(entries, tiers.as_ref(), self.identities.as_ref(), |entry| {
            if !class.is_security_principal(entry) {
                return None;
            }
            let account = entry.first(ACCOUNT_NAME)?;
            Some(EntryNames {
                raw_key: self.raw_key(netbios, account),
                lookup_name: self.qualified_name(netbios, account),
            })
        })
    }

    /// Resolve one user given as `NETBIOS<sep>name`. Anything else, and
    /// any miss, falls back to a plain local lookup of `id`.
    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &Identifier) -> Option<LocalUser> {
        self.lookup::<LocalUser>(&USERS, id).await
    }

    #[instrument(skip(self))]
    pub async fn get_group(&self, id: &Identifier) -> Option<LocalGroup> {
        self.lookup::<LocalGroup>(&GROUPS, id).await
    }

    async fn lookup<R: CachedClass>(&self, class: &AccountClass, id: &Identifier) -> Option<R> {
        let found = match id {
            Identifier::Name(name) => self.lookup_qualified::<R>(class, name).await,
            Identifier::Id(_) => None,
        };
        found.or_else(|| {
            debug!(kind = R::KIND, id = %id, "Not in directory, trying local lookup");
            R::lookup(self.identities.as_ref(), id)
        })
    }

    async fn lookup_qualified<R: CachedClass>(&self, class: &AccountClass, name: &str) -> Option<R> {
        let (domain, account) = name.split_once(self.settings.separator)?;
        if domain.is_empty() || account.is_empty() {
            return None;
        }
        let domain = domain.to_uppercase();
        let tiers = DomainTiers::<R>::open(self.store.as_ref(), Some(&domain), self.flags);

        let lookup_name = self.qualified_name(&domain, account);
        if let Some(record) = tiers.as_ref().and_then(|t| t.record(&lookup_name)) {
            return Some(record);
        }

        let raw_key = self.raw_key(&domain, account);
        let cached = tiers.as_ref().and_then(|t| t.entry(&raw_key));
        let entry = match cached {
            Some(entry) => entry,
            None => self.search_account(class, &domain, account).await?,
        };
        if !class.is_security_principal(&entry) {
            return None;
        }
        // key both tiers by the directory's spelling, as enumeration does
        let account = entry.first(ACCOUNT_NAME).unwrap_or(account);
        if let Some(tiers) = &tiers {
            tiers.store_entry(&self.raw_key(&domain, account), &entry);
        }

        let lookup_name = self.qualified_name(&domain, account);
        let record = R::lookup(self.identities.as_ref(), &Identifier::Name(lookup_name.clone()))?;
        if let Some(tiers) = &tiers {
            tiers.store_record(&lookup_name, &record);
        }
        Some(record)
    }

    async fn search_account(
        &self,
        class: &AccountClass,
        domain: &str,
        account: &str,
    ) -> Option<DirectoryEntry> {
        let (endpoint, base) = if self.is_own_domain(domain) {
            (None, self.base_dn.clone())
        } else {
            let descriptor = self
                .get_domains(&PartitionFilter::NetbiosName(domain.to_string()))
                .await
                .into_iter()
                .next()?;
            let endpoint = self.domain_endpoint(&descriptor).await.ok()?;
            (endpoint, descriptor.naming_context)
        };

        match self
            .search_at(
                endpoint,
                &base,
                SearchScope::Subtree,
                &class.name_filter(account),
                &class.attributes(),
                0,
            )
            .await
        {
            Ok(rows) => rows.into_iter().find(|e| !e.is_referral()),
            Err(e) => {
                warn!(domain = %domain, account = %account, error = %e, "Account search failed");
                None
            }
        }
    }

    /// Number of resolvable users across the domains in scope.
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

impl std::fmt::Debug for ActiveDirectoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDirectoryDirectory")
            .field("settings", &self.settings)
            .field("netbios_name", &self.netbios_name)
            .field("base_dn", &self.base_dn)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
