//! Domain controller and global catalog discovery
//!
//! Servers are located through DNS SRV records and tried in
//! (priority, weight) order until one accepts a bind.

use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::{AsyncResolver, TokioAsyncResolver};
use tracing::{debug, info, instrument, warn};

use crate::config::{BindCredentials, Encryption, DEFAULT_GC_PORT, DEFAULT_LDAPS_PORT, DEFAULT_LDAP_PORT};
use crate::connection::{ConnectionContext, DirectoryConnection, LdapTransport};
use crate::error::{DirectoryError, DirectoryResult};
use crate::query_cache::QueryCache;

/// SSL global catalog port.
const GC_SSL_PORT: u16 = 3269;

/// One SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Target host without the trailing root dot.
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

impl SrvRecord {
    pub fn new(target: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            target: target.into(),
            port,
            priority,
            weight,
        }
    }
}

/// DNS SRV lookups.
#[async_trait]
pub trait SrvResolver: Send + Sync {
    async fn lookup_srv(&self, name: &str) -> DirectoryResult<Vec<SrvRecord>>;
}

/// SRV resolver on the system DNS configuration.
pub struct HickoryResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryResolver {
    /// Build from `/etc/resolv.conf`, falling back to the library default
    /// when it cannot be read.
    pub fn from_system_conf() -> Self {
        let (config, opts) = match read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "Cannot read system resolver configuration, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self {
            resolver: AsyncResolver::tokio(config, opts),
        }
    }
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl SrvResolver for HickoryResolver {
    async fn lookup_srv(&self, name: &str) -> DirectoryResult<Vec<SrvRecord>> {
        let lookup = self
            .resolver
            .srv_lookup(name)
            .await
            .map_err(|e| DirectoryError::Dns {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(lookup
            .iter()
            .map(|srv| {
                SrvRecord::new(
                    srv.target().to_utf8().trim_end_matches('.'),
                    srv.port(),
                    srv.priority(),
                    srv.weight(),
                )
            })
            .collect())
    }
}

/// Discovery and trial-connect of directory servers for a DNS domain.
pub struct DomainDiscovery {
    resolver: Arc<dyn SrvResolver>,
    transport: Arc<dyn LdapTransport>,
    query_cache: QueryCache,
    /// Encryption, CA and timeout settings applied to trial connections.
    template: ConnectionContext,
}

impl DomainDiscovery {
    pub fn new(
        resolver: Arc<dyn SrvResolver>,
        transport: Arc<dyn LdapTransport>,
        query_cache: QueryCache,
        template: ConnectionContext,
    ) -> Self {
        Self {
            resolver,
            transport,
            query_cache,
            template,
        }
    }

    async fn lookup_sorted(&self, name: &str) -> Vec<SrvRecord> {
        match self.resolver.lookup_srv(name).await {
            Ok(mut records) => {
                records.sort_by_key(|r| (r.priority, r.weight));
                records
            }
            Err(e) => {
                debug!(name = %name, error = %e, "No SRV records found");
                Vec::new()
            }
        }
    }

    /// `_ldap._tcp.<domain>` targets, best first. Empty on any failure.
    pub async fn get_domain_controllers(&self, domain: &str) -> Vec<SrvRecord> {
        if domain.is_empty() {
            return Vec::new();
        }
        self.lookup_sorted(&format!("_ldap._tcp.{}", domain)).await
    }

    /// `_gc._tcp.<domain>` targets, best first. Empty on any failure.
    pub async fn get_global_catalogs(&self, domain: &str) -> Vec<SrvRecord> {
        if domain.is_empty() {
            return Vec::new();
        }
        self.lookup_sorted(&format!("_gc._tcp.{}", domain)).await
    }

    fn candidate_context(
        &self,
        record: &SrvRecord,
        bind: Option<&BindCredentials>,
        global_catalog: bool,
    ) -> ConnectionContext {
        let port = match (self.template.encryption, global_catalog, record.port) {
            (Encryption::Ssl, false, DEFAULT_LDAP_PORT) => DEFAULT_LDAPS_PORT,
            (Encryption::Ssl, true, DEFAULT_GC_PORT) => GC_SSL_PORT,
            (_, _, port) => port,
        };
        self.template
            .clone()
            .with_host(record.target.clone())
            .with_port(port)
            .with_bind(bind.cloned())
            .with_base_dn(None)
    }

    /// Try every domain controller of `domain` in order and return the
    /// endpoint of the first one that binds.
    #[instrument(skip(self, bind))]
    pub async fn dc_connect(
        &self,
        domain: &str,
        bind: Option<&BindCredentials>,
    ) -> Option<(String, u16)> {
        for record in self.get_domain_controllers(domain).await {
            let context = self.candidate_context(&record, bind, false);
            debug!(host = %record.target, port = context.port, "Trying domain controller");

            let mut conn = DirectoryConnection::new(
                Arc::clone(&self.transport),
                context,
                self.query_cache.clone(),
            );
            let opened = conn.open().await;
            let endpoint = (record.target.clone(), conn.context().port);
            conn.close().await;

            if opened {
                info!(domain = %domain, host = %endpoint.0, port = endpoint.1, "Using domain controller");
                return Some(endpoint);
            }
        }

        warn!(domain = %domain, "Unable to connect to a domain controller");
        None
    }

    /// Open a connection to the first global catalog of `domain` that binds.
    #[instrument(skip(self, bind))]
    pub async fn gc_connect(
        &self,
        domain: &str,
        bind: Option<&BindCredentials>,
    ) -> Option<DirectoryConnection> {
        for record in self.get_global_catalogs(domain).await {
            let context = self.candidate_context(&record, bind, true);
            debug!(host = %record.target, port = context.port, "Trying global catalog");

            let mut conn = DirectoryConnection::new(
                Arc::clone(&self.transport),
                context,
                self.query_cache.clone(),
            );
            if conn.open().await {
                info!(domain = %domain, host = %record.target, "Using global catalog");
                return Some(conn);
            }
            conn.close().await;
        }

        warn!(domain = %domain, "Unable to connect to a global catalog");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryTransport, StaticResolver};

    fn discovery(resolver: StaticResolver, transport: Arc<MemoryTransport>) -> DomainDiscovery {
        DomainDiscovery::new(
            Arc::new(resolver),
            transport,
            QueryCache::in_memory(),
            ConnectionContext::default(),
        )
    }

    #[tokio::test]
    async fn test_controllers_sorted_by_priority_then_weight() {
        let resolver = StaticResolver::new().with_records(
            "_ldap._tcp.corp.example.com",
            vec![
                SrvRecord::new("dc3.corp.example.com", 389, 10, 0),
                SrvRecord::new("dc2.corp.example.com", 389, 0, 50),
                SrvRecord::new("dc1.corp.example.com", 389, 0, 10),
            ],
        );
        let discovery = discovery(resolver, Arc::new(MemoryTransport::new()));
        let hosts: Vec<String> = discovery
            .get_domain_controllers("corp.example.com")
            .await
            .into_iter()
            .map(|r| r.target)
            .collect();
        assert_eq!(
            hosts,
            vec![
                "dc1.corp.example.com",
                "dc2.corp.example.com",
                "dc3.corp.example.com"
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_is_empty() {
        let discovery = discovery(StaticResolver::new(), Arc::new(MemoryTransport::new()));
        assert!(discovery.get_domain_controllers("corp.example.com").await.is_empty());
        assert!(discovery.get_global_catalogs("").await.is_empty());
    }

    #[tokio::test]
    async fn test_dc_connect_all_fail() {
        let resolver = StaticResolver::new().with_records(
            "_ldap._tcp.corp.example.com",
            vec![SrvRecord::new("dc1.corp.example.com", 389, 0, 0)],
        );
        let transport = Arc::new(MemoryTransport::new().with_failing_host("dc1.corp.example.com"));
        let discovery = discovery(resolver, transport.clone());
        assert_eq!(discovery.dc_connect("corp.example.com", None).await, None);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_ssl_template_uses_ssl_ports() {
        let resolver = StaticResolver::new().with_records(
            "_ldap._tcp.corp.example.com",
            vec![SrvRecord::new("dc1.corp.example.com", 389, 0, 0)],
        );
        let transport = Arc::new(MemoryTransport::new());
        let discovery = DomainDiscovery::new(
            Arc::new(resolver),
            transport,
            QueryCache::in_memory(),
            ConnectionContext::default().with_encryption(Encryption::Ssl),
        );
        assert_eq!(
            discovery.dc_connect("corp.example.com", None).await,
            Some(("dc1.corp.example.com".to_string(), 636))
        );
    }

    #[tokio::test]
    async fn test_gc_connect_returns_open_connection() {
        let resolver = StaticResolver::new().with_records(
            "_gc._tcp.corp.example.com",
            vec![
                SrvRecord::new("gc1.corp.example.com", 3268, 0, 0),
                SrvRecord::new("gc2.corp.example.com", 3268, 1, 0),
            ],
        );
        let transport = Arc::new(MemoryTransport::new().with_failing_host("gc1.corp.example.com"));
        let discovery = discovery(resolver, transport);
        let conn = discovery.gc_connect("corp.example.com", None).await.unwrap();
        assert!(conn.is_open());
        assert_eq!(conn.context().host.as_deref(), Some("gc2.corp.example.com"));
        assert_eq!(conn.context().port, 3268);
    }
}
