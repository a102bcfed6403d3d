//! Immutable connection parameters.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    ActiveDirectorySettings, BindCredentials, DirectoryConfig, Encryption, LdapSettings,
    SearchScope, DEFAULT_CONNECT_TIMEOUT, DEFAULT_GC_PORT, DEFAULT_PAGE_SIZE,
};

/// Everything needed to reach and query one directory endpoint.
///
/// A context never changes once a connection holds it. To point a
/// connection somewhere else, derive a new context with the `with_*`
/// methods and hand it to [`DirectoryConnection::repoint`].
///
/// [`DirectoryConnection::repoint`]: super::DirectoryConnection::repoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub host: Option<String>,
    pub port: u16,
    pub bind: Option<BindCredentials>,
    pub base_dn: Option<String>,
    pub encryption: Encryption,
    pub scope: SearchScope,
    /// Entries per page; 0 disables paging.
    pub page_size: u32,
    pub paged_attributes: bool,
    pub ca_cert_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            host: None,
            port: Encryption::None.default_port(),
            bind: None,
            base_dn: None,
            encryption: Encryption::None,
            scope: SearchScope::Subtree,
            page_size: DEFAULT_PAGE_SIZE,
            paged_attributes: true,
            ca_cert_file: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionContext {
    /// Context for `host` on the default port of `encryption`.
    pub fn new(host: impl Into<String>, encryption: Encryption) -> Self {
        Self {
            host: Some(host.into()),
            port: encryption.default_port(),
            encryption,
            ..Default::default()
        }
    }

    /// Context for the configured LDAP server.
    pub fn for_ldap(settings: &LdapSettings, config: &DirectoryConfig) -> Self {
        let (host, port) = settings.endpoint();
        Self::new(host, settings.encryption)
            .with_port(port)
            .with_bind(settings.bind_credentials())
            .with_base_dn(Some(settings.base_dn.clone()))
            .with_directory_options(config)
    }

    /// Context template for an Active Directory server. The host is filled
    /// in by discovery or from the static DC setting.
    pub fn for_active_directory(
        settings: &ActiveDirectorySettings,
        config: &DirectoryConfig,
    ) -> Self {
        let mut context = Self {
            encryption: settings.encryption,
            port: settings.encryption.default_port(),
            ..Default::default()
        }
        .with_bind(settings.bind_credentials())
        .with_base_dn(settings.base_dn.clone())
        .with_directory_options(config);
        if let Some((host, port)) = settings.dc_endpoint() {
            context = context.with_host(host).with_port(port);
        }
        context
    }

    fn with_directory_options(mut self, config: &DirectoryConfig) -> Self {
        self.page_size = config.page_size;
        self.paged_attributes = config.attributes_on_paged_search;
        self.ca_cert_file = config.ca_cert_file.clone();
        self.connect_timeout = config.connect_timeout();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Point at the global catalog port of the current host.
    #[must_use]
    pub fn with_global_catalog(self) -> Self {
        self.with_port(DEFAULT_GC_PORT)
    }

    #[must_use]
    pub fn with_bind(mut self, bind: Option<BindCredentials>) -> Self {
        self.bind = bind;
        self
    }

    #[must_use]
    pub fn with_base_dn(mut self, base_dn: Option<String>) -> Self {
        self.base_dn = base_dn;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    #[must_use]
    pub fn with_ca_cert_file(mut self, path: Option<PathBuf>) -> Self {
        self.ca_cert_file = path;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `ldap://host:port` or `ldaps://host:port`.
    pub fn uri(&self) -> String {
        format!(
            "{}://{}:{}",
            self.encryption.scheme(),
            self.host.as_deref().unwrap_or(""),
            self.port
        )
    }

    /// Whether an open session under `self` can serve `other` as is.
    pub fn same_endpoint(&self, other: &ConnectionContext) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.encryption == other.encryption
            && self.bind == other.bind
            && self.ca_cert_file == other.ca_cert_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_scheme_follows_encryption() {
        let ctx = ConnectionContext::new("ldap.example.com", Encryption::None);
        assert_eq!(ctx.uri(), "ldap://ldap.example.com:389");

        let ctx = ConnectionContext::new("ldap.example.com", Encryption::StartTls);
        assert_eq!(ctx.uri(), "ldap://ldap.example.com:389");

        let ctx = ConnectionContext::new("ldap.example.com", Encryption::Ssl);
        assert_eq!(ctx.uri(), "ldaps://ldap.example.com:636");
    }

    #[test]
    fn test_with_methods_return_modified_copies() {
        let base = ConnectionContext::new("dc1", Encryption::None);
        let gc = base.clone().with_global_catalog();
        assert_eq!(base.port, 389);
        assert_eq!(gc.port, 3268);
        assert!(base.same_endpoint(&base.clone().with_base_dn(Some("dc=x".into()))));
        assert!(!base.same_endpoint(&gc));
    }

    #[test]
    fn test_for_ldap_uses_settings() {
        let settings = LdapSettings::new("ldap.example.com:1389", "dc=example,dc=com")
            .with_bind("cn=admin,dc=example,dc=com", "secret");
        let mut config = DirectoryConfig::ldap(settings.clone());
        config.attributes_on_paged_search = false;
        let ctx = ConnectionContext::for_ldap(&settings, &config);
        assert_eq!(ctx.uri(), "ldap://ldap.example.com:1389");
        assert_eq!(ctx.base_dn.as_deref(), Some("dc=example,dc=com"));
        assert_eq!(ctx.bind.unwrap().dn, "cn=admin,dc=example,dc=com");
        assert!(!ctx.paged_attributes);
        assert_eq!(ctx.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_for_active_directory_static_dc() {
        let settings = ActiveDirectorySettings::new("corp.example.com", "svc", "pw")
            .with_dc("dc1.corp.example.com:3890");
        let config = DirectoryConfig::active_directory(settings.clone());
        let ctx = ConnectionContext::for_active_directory(&settings, &config);
        assert_eq!(ctx.host.as_deref(), Some("dc1.corp.example.com"));
        assert_eq!(ctx.port, 3890);
        assert_eq!(ctx.bind.unwrap().dn, "svc@CORP.EXAMPLE.COM");
    }
}
