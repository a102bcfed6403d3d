//! Directory service configuration
//!
//! Typed configuration for the LDAP and Active Directory backends and the
//! on-disk caches. Loaded from a JSON document (the appliance configuration
//! export) with environment overrides for the file and cache locations.

use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// Plain LDAP port.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// LDAP over SSL port.
pub const DEFAULT_LDAPS_PORT: u16 = 636;
/// Active Directory global catalog port.
pub const DEFAULT_GC_PORT: u16 = 3268;
/// Page size used for bulk enumeration.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;
/// Page size used when an enumeration is only run to count entries.
pub const COUNT_PAGE_SIZE: u32 = 32768;
/// Separator between NetBIOS domain and account name.
pub const DEFAULT_AD_SEPARATOR: char = '\\';
/// Network connect timeout applied on every open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default root of the identity cache tree.
pub const DEFAULT_CACHE_ROOT: &str = "/var/tmp/.cache";

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "NASDIR_CONFIG";
/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "NASDIR_CACHE_DIR";

/// Transport security for a directory connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    /// Plain LDAP.
    #[default]
    None,
    /// Implicit TLS via the `ldaps://` scheme.
    Ssl,
    /// Plain connection upgraded with StartTLS.
    StartTls,
}

impl Encryption {
    /// Parse the appliance's legacy representation: `0`/`1`/`2`, `off`,
    /// `on` or `start_tls`. Unknown values mean no encryption.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "1" | "on" | "ssl" => Encryption::Ssl,
            "2" | "start_tls" | "starttls" => Encryption::StartTls,
            _ => Encryption::None,
        }
    }

    /// Whether a TLS context has to be configured before connecting.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Encryption::None)
    }

    /// URI scheme for this mode.
    pub fn scheme(&self) -> &'static str {
        match self {
            Encryption::Ssl => "ldaps",
            Encryption::None | Encryption::StartTls => "ldap",
        }
    }

    /// Default port for this mode.
    pub fn default_port(&self) -> u16 {
        match self {
            Encryption::Ssl => DEFAULT_LDAPS_PORT,
            Encryption::None | Encryption::StartTls => DEFAULT_LDAP_PORT,
        }
    }
}

/// LDAP search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

/// Credentials for a simple bind.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindCredentials {
    pub dn: String,
    pub password: String,
}

impl BindCredentials {
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: password.into(),
        }
    }

    /// Build credentials only when both parts are present and non-empty.
    pub fn from_parts(dn: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (dn, password) {
            (Some(dn), Some(password)) if !dn.is_empty() && !password.is_empty() => {
                Some(Self::new(dn, password))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for BindCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindCredentials")
            .field("dn", &self.dn)
            .field("password", &"***REDACTED***")
            .finish()
    }
}

/// Cache capability flags.
///
/// Read flags allow serving results from the on-disk tiers, write flags
/// allow populating them. `DB_INIT` marks a backend built from the stored
/// appliance configuration rather than from explicit arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheFlags(u32);

impl CacheFlags {
    pub const NONE: CacheFlags = CacheFlags(0);
    pub const CACHE_READ_USER: CacheFlags = CacheFlags(0x0000_0001);
    pub const CACHE_WRITE_USER: CacheFlags = CacheFlags(0x0000_0002);
    pub const CACHE_READ_GROUP: CacheFlags = CacheFlags(0x0000_0004);
    pub const CACHE_WRITE_GROUP: CacheFlags = CacheFlags(0x0000_0008);
    pub const DB_INIT: CacheFlags = CacheFlags(0x0001_0000);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        CacheFlags(bits)
    }

    pub const fn contains(&self, other: CacheFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Everything a fully cached deployment uses.
    pub fn all() -> Self {
        Self::CACHE_READ_USER | Self::CACHE_WRITE_USER | Self::CACHE_READ_GROUP | Self::CACHE_WRITE_GROUP
    }
}

impl BitOr for CacheFlags {
    type Output = CacheFlags;

    fn bitor(self, rhs: CacheFlags) -> CacheFlags {
        CacheFlags(self.0 | rhs.0)
    }
}

/// Which directory service the appliance is joined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Disabled,
    Ldap,
    ActiveDirectory,
    /// NT4 domains are resolved by winbind directly; no directory backend.
    Nt4,
    /// NIS maps are resolved by the OS; no directory backend.
    Nis,
}

/// LDAP backend settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LdapSettings {
    /// Server as `host` or `host:port`.
    pub hostname: String,

    /// Explicit port, overriding any port in `hostname`.
    #[serde(default)]
    pub port: Option<u16>,

    /// Search base, e.g. `dc=example,dc=com`.
    pub base_dn: String,

    /// DN used for binding when anonymous bind is off.
    #[serde(default)]
    pub root_bind_dn: Option<String>,

    #[serde(default)]
    pub root_bind_password: Option<String>,

    #[serde(default)]
    pub anonymous_bind: bool,

    /// RDN prepended to the base DN for user searches, e.g. `ou=People`.
    #[serde(default)]
    pub user_suffix: Option<String>,

    #[serde(default)]
    pub group_suffix: Option<String>,

    #[serde(default)]
    pub machine_suffix: Option<String>,

    #[serde(default)]
    pub password_suffix: Option<String>,

    /// Password hashing scheme the server expects (informational).
    #[serde(default)]
    pub pw_encryption: Option<String>,

    #[serde(default)]
    pub encryption: Encryption,
}

impl LdapSettings {
    pub fn new(hostname: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            base_dn: base_dn.into(),
            ..Default::default()
        }
    }

    /// Bind with the root DN.
    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.root_bind_dn = Some(dn.into());
        self.root_bind_password = Some(password.into());
        self.anonymous_bind = false;
        self
    }

    pub fn with_user_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.user_suffix = Some(suffix.into());
        self
    }

    pub fn with_group_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.group_suffix = Some(suffix.into());
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Host and port, with the port taken from `port`, then from
    /// `hostname`, then from the encryption default.
    pub fn endpoint(&self) -> (String, u16) {
        let (host, port) = split_host_port(&self.hostname);
        let port = self
            .port
            .or(port)
            .unwrap_or_else(|| self.encryption.default_port());
        (host, port)
    }

    /// Credentials to bind with; `None` means an anonymous bind.
    pub fn bind_credentials(&self) -> Option<BindCredentials> {
        if self.anonymous_bind {
            return None;
        }
        BindCredentials::from_parts(
            self.root_bind_dn.as_deref(),
            self.root_bind_password.as_deref(),
        )
    }

    /// Base DN for user searches.
    pub fn user_base(&self) -> String {
        join_suffix(self.user_suffix.as_deref(), &self.base_dn)
    }

    /// Base DN for group searches.
    pub fn group_base(&self) -> String {
        join_suffix(self.group_suffix.as_deref(), &self.base_dn)
    }

    fn validate(&self) -> DirectoryResult<()> {
        if self.hostname.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "ldap.hostname is required",
            ));
        }
        parse_host_port(&self.hostname)?;
        if self.base_dn.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "ldap.base_dn is required",
            ));
        }
        if !self.anonymous_bind && self.bind_credentials().is_none() {
            tracing::warn!("LDAP bind DN or password missing; binding anonymously");
        }
        Ok(())
    }
}

impl fmt::Debug for LdapSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapSettings")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("base_dn", &self.base_dn)
            .field("root_bind_dn", &self.root_bind_dn)
            .field(
                "root_bind_password",
                &self.root_bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("anonymous_bind", &self.anonymous_bind)
            .field("user_suffix", &self.user_suffix)
            .field("group_suffix", &self.group_suffix)
            .field("machine_suffix", &self.machine_suffix)
            .field("password_suffix", &self.password_suffix)
            .field("pw_encryption", &self.pw_encryption)
            .field("encryption", &self.encryption)
            .finish()
    }
}

fn default_separator() -> char {
    DEFAULT_AD_SEPARATOR
}

/// Active Directory backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ActiveDirectorySettings {
    /// DNS domain, e.g. `corp.example.com`.
    pub domain_name: String,

    /// NetBIOS name of our own domain. Looked up from the crossref
    /// partition when absent.
    #[serde(default)]
    pub workgroup: Option<String>,

    /// Account name used for binding; qualified as `name@DOMAIN`.
    pub bind_name: String,

    pub bind_password: String,

    /// Enumerate every domain in the forest instead of only our own.
    #[serde(default)]
    pub allow_trusted_domains: bool,

    /// Local accounts carry bare names (winbind "use default domain").
    #[serde(default)]
    pub use_default_domain: bool,

    /// Local accounts come from RFC2307 attributes and carry bare names.
    #[serde(default)]
    pub unix_extensions: bool,

    /// Static domain controller as `host[:port]`; discovered when absent.
    #[serde(default)]
    pub dc_name: Option<String>,

    /// Static global catalog as `host[:port]`; discovered when absent.
    #[serde(default)]
    pub gc_name: Option<String>,

    /// Search base; taken from the rootDSE when absent.
    #[serde(default)]
    pub base_dn: Option<String>,

    #[serde(default)]
    pub encryption: Encryption,

    #[serde(default = "default_separator")]
    pub separator: char,
}

impl ActiveDirectorySettings {
    pub fn new(
        domain_name: impl Into<String>,
        bind_name: impl Into<String>,
        bind_password: impl Into<String>,
    ) -> Self {
        Self {
            domain_name: domain_name.into(),
            workgroup: None,
            bind_name: bind_name.into(),
            bind_password: bind_password.into(),
            allow_trusted_domains: false,
            use_default_domain: false,
            unix_extensions: false,
            dc_name: None,
            gc_name: None,
            base_dn: None,
            encryption: Encryption::None,
            separator: DEFAULT_AD_SEPARATOR,
        }
    }

    pub fn with_workgroup(mut self, workgroup: impl Into<String>) -> Self {
        self.workgroup = Some(workgroup.into());
        self
    }

    pub fn with_dc(mut self, dc_name: impl Into<String>) -> Self {
        self.dc_name = Some(dc_name.into());
        self
    }

    pub fn with_gc(mut self, gc_name: impl Into<String>) -> Self {
        self.gc_name = Some(gc_name.into());
        self
    }

    #[must_use]
    pub fn with_default_domain(mut self, enabled: bool) -> Self {
        self.use_default_domain = enabled;
        self
    }

    #[must_use]
    pub fn with_unix_extensions(mut self, enabled: bool) -> Self {
        self.unix_extensions = enabled;
        self
    }

    #[must_use]
    pub fn with_trusted_domains(mut self, enabled: bool) -> Self {
        self.allow_trusted_domains = enabled;
        self
    }

    /// Bind principal, `name@DOMAIN`.
    pub fn bind_dn(&self) -> String {
        format!("{}@{}", self.bind_name, self.domain_name.to_uppercase())
    }

    pub fn bind_credentials(&self) -> Option<BindCredentials> {
        BindCredentials::from_parts(Some(&self.bind_dn()), Some(&self.bind_password))
    }

    /// Static domain controller endpoint, when configured.
    pub fn dc_endpoint(&self) -> Option<(String, u16)> {
        self.dc_name.as_deref().map(|name| {
            let (host, port) = split_host_port(name);
            (host, port.unwrap_or_else(|| self.encryption.default_port()))
        })
    }

    /// Static global catalog endpoint, when configured.
    pub fn gc_endpoint(&self) -> Option<(String, u16)> {
        self.gc_name.as_deref().map(|name| {
            let (host, port) = split_host_port(name);
            (host, port.unwrap_or(DEFAULT_GC_PORT))
        })
    }

    /// Whether local accounts carry bare (unqualified) names.
    pub fn bare_names(&self) -> bool {
        self.use_default_domain || self.unix_extensions
    }

    fn validate(&self) -> DirectoryResult<()> {
        if self.domain_name.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "active_directory.domain_name is required",
            ));
        }
        if self.bind_name.trim().is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "active_directory.bind_name is required",
            ));
        }
        for name in [&self.dc_name, &self.gc_name].into_iter().flatten() {
            parse_host_port(name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ActiveDirectorySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveDirectorySettings")
            .field("domain_name", &self.domain_name)
            .field("workgroup", &self.workgroup)
            .field("bind_name", &self.bind_name)
            .field("bind_password", &"***REDACTED***")
            .field("allow_trusted_domains", &self.allow_trusted_domains)
            .field("use_default_domain", &self.use_default_domain)
            .field("unix_extensions", &self.unix_extensions)
            .field("dc_name", &self.dc_name)
            .field("gc_name", &self.gc_name)
            .field("base_dn", &self.base_dn)
            .field("encryption", &self.encryption)
            .field("separator", &self.separator)
            .finish()
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_ROOT)
}

fn default_true() -> bool {
    true
}

/// Identity and query cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Root of the on-disk cache tree.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub flags: CacheFlags,

    /// Persist non-paged query results across runs.
    #[serde(default = "default_true")]
    pub persist_queries: bool,

    /// Maximum age of a cached query result. `None` keeps entries until
    /// the cache is explicitly expired.
    #[serde(default)]
    pub query_ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            flags: CacheFlags::NONE,
            persist_queries: true,
            query_ttl_secs: None,
        }
    }
}

impl CacheSettings {
    pub fn query_ttl(&self) -> Option<Duration> {
        self.query_ttl_secs.map(Duration::from_secs)
    }
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

/// Top-level directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub service: ServiceKind,

    #[serde(default)]
    pub ldap: Option<LdapSettings>,

    #[serde(default)]
    pub active_directory: Option<ActiveDirectorySettings>,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Page size for bulk enumeration.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Send the requested attribute list with paged searches. Some
    /// client/server combinations stall after a few pages when this is on;
    /// turning it off requests all attributes instead.
    #[serde(default = "default_true")]
    pub attributes_on_paged_search: bool,

    /// CA bundle used to verify SSL/StartTLS peers.
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            service: ServiceKind::Disabled,
            ldap: None,
            active_directory: None,
            cache: CacheSettings::default(),
            page_size: DEFAULT_PAGE_SIZE,
            attributes_on_paged_search: true,
            ca_cert_file: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

impl DirectoryConfig {
    /// LDAP-enabled configuration.
    pub fn ldap(settings: LdapSettings) -> Self {
        Self {
            service: ServiceKind::Ldap,
            ldap: Some(settings),
            ..Default::default()
        }
    }

    /// Active Directory-enabled configuration.
    pub fn active_directory(settings: ActiveDirectorySettings) -> Self {
        Self {
            service: ServiceKind::ActiveDirectory,
            active_directory: Some(settings),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache.root = root.into();
        self
    }

    #[must_use]
    pub fn with_cache_flags(mut self, flags: CacheFlags) -> Self {
        self.cache.flags = flags;
        self
    }

    /// Read a JSON configuration file and apply environment overrides.
    pub fn load(path: &Path) -> DirectoryResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::invalid_configuration(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: DirectoryConfig = serde_json::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `NASDIR_CONFIG`, or fall back to a
    /// disabled configuration when the variable is unset.
    pub fn from_env() -> DirectoryResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => {
                let mut config = Self::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.is_empty() {
                self.cache.root = PathBuf::from(dir);
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Check that the enabled service has the settings it needs.
    pub fn validate(&self) -> DirectoryResult<()> {
        match self.service {
            ServiceKind::Ldap => self
                .ldap
                .as_ref()
                .ok_or_else(|| {
                    DirectoryError::invalid_configuration("ldap service enabled without settings")
                })?
                .validate(),
            ServiceKind::ActiveDirectory => self
                .active_directory
                .as_ref()
                .ok_or_else(|| {
                    DirectoryError::invalid_configuration(
                        "active_directory service enabled without settings",
                    )
                })?
                .validate(),
            ServiceKind::Disabled | ServiceKind::Nt4 | ServiceKind::Nis => Ok(()),
        }
    }
}

/// Parse `host[:port]`, rejecting a port that is not a valid number.
pub fn parse_host_port(value: &str) -> DirectoryResult<(String, Option<u16>)> {
    let value = value.trim();
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse::<u16>().map_err(|_| {
                DirectoryError::invalid_configuration(format!("invalid port in {:?}", value))
            })?;
            Ok((host.to_string(), Some(port)))
        }
        _ => Ok((value.to_string(), None)),
    }
}

/// Split `host[:port]` for endpoint selection. Validated settings never
/// carry a bad port; one that slips through is logged and ignored.
pub fn split_host_port(value: &str) -> (String, Option<u16>) {
    parse_host_port(value).unwrap_or_else(|e| {
        tracing::warn!(value, error = %e, "Ignoring unparsable port");
        let host = value.trim().rsplit_once(':').map_or(value.trim(), |(host, _)| host);
        (host.to_string(), None)
    })
}

fn join_suffix(suffix: Option<&str>, base_dn: &str) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() && !base_dn.is_empty() => {
            format!("{},{}", suffix, base_dn)
        }
        _ => base_dn.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_parse_legacy_values() {
        assert_eq!(Encryption::parse("0"), Encryption::None);
        assert_eq!(Encryption::parse("off"), Encryption::None);
        assert_eq!(Encryption::parse("1"), Encryption::Ssl);
        assert_eq!(Encryption::parse("on"), Encryption::Ssl);
        assert_eq!(Encryption::parse("2"), Encryption::StartTls);
        assert_eq!(Encryption::parse("start_tls"), Encryption::StartTls);
        assert_eq!(Encryption::parse("7"), Encryption::None);
    }

    #[test]
    fn test_encryption_scheme_and_port() {
        assert_eq!(Encryption::None.scheme(), "ldap");
        assert_eq!(Encryption::StartTls.scheme(), "ldap");
        assert_eq!(Encryption::Ssl.scheme(), "ldaps");
        assert_eq!(Encryption::Ssl.default_port(), 636);
        assert_eq!(Encryption::StartTls.default_port(), 389);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("ldap.example.com:1389"),
            ("ldap.example.com".to_string(), Some(1389))
        );
        assert_eq!(
            split_host_port("ldap.example.com"),
            ("ldap.example.com".to_string(), None)
        );
        assert_eq!(
            split_host_port("ldap.example.com:abc"),
            ("ldap.example.com".to_string(), None)
        );
    }

    #[test]
    fn test_parse_host_port_rejects_bad_port() {
        assert_eq!(
            parse_host_port(" ldap.example.com:636 ").unwrap(),
            ("ldap.example.com".to_string(), Some(636))
        );
        assert!(matches!(
            parse_host_port("ldap.example.com:abc"),
            Err(DirectoryError::InvalidConfiguration { .. })
        ));
        assert!(parse_host_port("ldap.example.com:70000").is_err());
        assert!(parse_host_port("ldap.example.com:").is_err());
    }

    #[test]
    fn test_validate_rejects_unparsable_port() {
        let config = DirectoryConfig::ldap(LdapSettings::new("ldap:abc", "dc=example,dc=com"));
        assert!(config.validate().is_err());

        let ad = ActiveDirectorySettings::new("corp.example.com", "svc", "pw").with_gc("gc1:x");
        assert!(DirectoryConfig::active_directory(ad).validate().is_err());

        let ad = ActiveDirectorySettings::new("corp.example.com", "svc", "pw").with_dc("dc1:3268");
        assert!(DirectoryConfig::active_directory(ad).validate().is_ok());
    }

    #[test]
    fn test_ldap_endpoint_precedence() {
        let settings = LdapSettings::new("ldap.example.com:1389", "dc=example,dc=com");
        assert_eq!(settings.endpoint(), ("ldap.example.com".to_string(), 1389));

        let mut settings = settings.with_encryption(Encryption::Ssl);
        settings.hostname = "ldap.example.com".to_string();
        assert_eq!(settings.endpoint(), ("ldap.example.com".to_string(), 636));

        settings.port = Some(10636);
        assert_eq!(settings.endpoint(), ("ldap.example.com".to_string(), 10636));
    }

    #[test]
    fn test_ldap_bases_with_suffix() {
        let settings = LdapSettings::new("ldap", "dc=example,dc=com")
            .with_user_suffix("ou=People")
            .with_group_suffix("ou=Group");
        assert_eq!(settings.user_base(), "ou=People,dc=example,dc=com");
        assert_eq!(settings.group_base(), "ou=Group,dc=example,dc=com");

        let plain = LdapSettings::new("ldap", "dc=example,dc=com");
        assert_eq!(plain.user_base(), "dc=example,dc=com");
    }

    #[test]
    fn test_ldap_anonymous_bind_has_no_credentials() {
        let mut settings =
            LdapSettings::new("ldap", "dc=example,dc=com").with_bind("cn=admin", "secret");
        assert!(settings.bind_credentials().is_some());
        settings.anonymous_bind = true;
        assert!(settings.bind_credentials().is_none());
    }

    #[test]
    fn test_ad_bind_dn_uppercases_domain() {
        let settings = ActiveDirectorySettings::new("corp.example.com", "svc-nas", "pw");
        assert_eq!(settings.bind_dn(), "svc-nas@CORP.EXAMPLE.COM");
    }

    #[test]
    fn test_ad_static_endpoints() {
        let settings = ActiveDirectorySettings::new("corp.example.com", "svc", "pw")
            .with_dc("dc1.corp.example.com")
            .with_gc("gc1.corp.example.com:3269");
        assert_eq!(
            settings.dc_endpoint(),
            Some(("dc1.corp.example.com".to_string(), 389))
        );
        assert_eq!(
            settings.gc_endpoint(),
            Some(("gc1.corp.example.com".to_string(), 3269))
        );
    }

    #[test]
    fn test_cache_flags() {
        let flags = CacheFlags::CACHE_READ_USER | CacheFlags::CACHE_WRITE_USER;
        assert!(flags.contains(CacheFlags::CACHE_READ_USER));
        assert!(!flags.contains(CacheFlags::CACHE_READ_GROUP));
        assert!(CacheFlags::all().contains(CacheFlags::CACHE_WRITE_GROUP));
        assert!(!CacheFlags::all().contains(CacheFlags::DB_INIT));
    }

    #[test]
    fn test_validate_requires_settings_for_enabled_service() {
        let config = DirectoryConfig {
            service: ServiceKind::Ldap,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DirectoryConfig::ldap(LdapSettings::new("", "dc=example,dc=com"));
        assert!(config.validate().is_err());

        let config = DirectoryConfig::ldap(LdapSettings::new("ldap", "dc=example,dc=com"));
        assert!(config.validate().is_ok());

        assert!(DirectoryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let json = r#"{
            "service": "active_directory",
            "active_directory": {
                "domain_name": "corp.example.com",
                "bind_name": "svc",
                "bind_password": "pw"
            },
            "cache": { "root": "/tmp/cache", "flags": 15 }
        }"#;
        let config: DirectoryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.service, ServiceKind::ActiveDirectory);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.attributes_on_paged_search);
        assert_eq!(config.cache.flags, CacheFlags::all());
        assert_eq!(config.cache.query_ttl(), None);
        let ad = config.active_directory.unwrap();
        assert_eq!(ad.separator, '\\');
        assert!(!ad.bare_names());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let settings =
            LdapSettings::new("ldap", "dc=example,dc=com").with_bind("cn=admin", "hunter2");
        let output = format!("{:?}", settings);
        assert!(!output.contains("hunter2"));
        assert!(output.contains("REDACTED"));

        let ad = ActiveDirectorySettings::new("corp.example.com", "svc", "hunter2");
        assert!(!format!("{:?}", ad).contains("hunter2"));
    }
}
