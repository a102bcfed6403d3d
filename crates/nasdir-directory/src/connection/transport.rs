//! Wire protocol seam.
//!
//! [`DirectoryConnection`](super::DirectoryConnection) talks to servers only
//! through [`LdapTransport`] and [`LdapSession`]. [`Ldap3Transport`] is the
//! production implementation on top of `ldap3`; tests plug in the in-memory
//! transport from the `testing` module.

use std::path::Path;

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::config::{Encryption, SearchScope};
use crate::error::{DirectoryError, DirectoryResult};

use super::context::ConnectionContext;
use super::entry::DirectoryEntry;

/// One search request as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Requested attributes; empty requests all user attributes.
    pub attributes: Vec<String>,
}

/// Paged results control value for one round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub size: u32,
    pub cookie: Vec<u8>,
}

/// Rows of one round-trip plus the continuation cookie, if any.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub entries: Vec<DirectoryEntry>,
    pub cookie: Option<Vec<u8>>,
}

/// Factory for protocol sessions.
#[async_trait]
pub trait LdapTransport: Send + Sync {
    /// Connect to the endpoint described by `context`, negotiating SSL or
    /// StartTLS as requested. The returned session is not bound yet.
    async fn connect(&self, context: &ConnectionContext) -> DirectoryResult<Box<dyn LdapSession>>;
}

/// A connected protocol session.
#[async_trait]
pub trait LdapSession: Send {
    /// Simple bind; empty DN and password bind anonymously.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()>;

    /// Run one search request, with the paged results control when `page`
    /// is given.
    async fn search(
        &mut self,
        request: &SearchRequest,
        page: Option<&PageRequest>,
    ) -> DirectoryResult<SearchPage>;

    async fn unbind(&mut self) -> DirectoryResult<()>;
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// `ldap3`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct Ldap3Transport;

impl Ldap3Transport {
    pub fn new() -> Self {
        Self
    }

    fn tls_connector(ca_cert_file: &Path) -> DirectoryResult<native_tls::TlsConnector> {
        let pem = std::fs::read(ca_cert_file).map_err(|e| DirectoryError::TlsFailed {
            message: format!("cannot read CA file {}: {}", ca_cert_file.display(), e),
        })?;
        let certificate =
            native_tls::Certificate::from_pem(&pem).map_err(|e| DirectoryError::TlsFailed {
                message: format!("invalid CA file {}: {}", ca_cert_file.display(), e),
            })?;
        native_tls::TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|e| DirectoryError::TlsFailed {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl LdapTransport for Ldap3Transport {
    async fn connect(&self, context: &ConnectionContext) -> DirectoryResult<Box<dyn LdapSession>> {
        let uri = context.uri();

        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(context.connect_timeout)
            .set_starttls(context.encryption == Encryption::StartTls);
        if context.encryption.uses_tls() {
            if let Some(ca_cert_file) = &context.ca_cert_file {
                settings = settings.set_connector(Self::tls_connector(ca_cert_file)?);
            }
        }

        debug!(uri = %uri, encryption = ?context.encryption, "Connecting to directory server");

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &uri)
            .await
            .map_err(|e| DirectoryError::connection_failed_with_source(&uri, e.to_string(), e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(Box::new(Ldap3Session { ldap }))
    }
}

struct Ldap3Session {
    ldap: Ldap,
}

#[async_trait]
impl LdapSession for Ldap3Session {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| DirectoryError::protocol_with_source("bind request failed", e))?;

        if result.rc != 0 {
            return Err(DirectoryError::BindFailed {
                dn: dn.to_string(),
                rc: result.rc,
                message: result.text,
            });
        }
        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        page: Option<&PageRequest>,
    ) -> DirectoryResult<SearchPage> {
        let attributes: Vec<&str> = if request.attributes.is_empty() {
            vec!["*"]
        } else {
            request.attributes.iter().map(String::as_str).collect()
        };

        let ldap = match page {
            Some(page) => self.ldap.with_controls(PagedResults {
                size: i32::try_from(page.size).unwrap_or(i32::MAX),
                cookie: page.cookie.clone(),
            }),
            None => &mut self.ldap,
        };

        let ldap3::SearchResult(rows, result) = ldap
            .search(
                &request.base,
                request.scope.into(),
                &request.filter,
                attributes,
            )
            .await
            .map_err(|e| DirectoryError::protocol_with_source("search request failed", e))?;

        if result.rc != 0 {
            return Err(DirectoryError::SearchFailed {
                rc: result.rc,
                message: result.text,
            });
        }

        let cookie = result.ctrls.iter().find_map(|ctrl| match ctrl {
            Control(Some(ControlType::PagedResults), raw) => {
                Some(raw.parse::<PagedResults>().cookie)
            }
            _ => None,
        });

        let entries = rows
            .into_iter()
            .filter(|row| !row.is_intermediate())
            .map(|row| {
                if row.is_ref() {
                    DirectoryEntry::referral()
                } else {
                    SearchEntry::construct(row).into()
                }
            })
            .collect();

        Ok(SearchPage { entries, cookie })
    }

    async fn unbind(&mut self) -> DirectoryResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| DirectoryError::protocol_with_source("unbind failed", e))
    }
}
