//! In-memory collaborators for tests
//!
//! [`MemoryTransport`] plays the directory server, [`StaticResolver`] the
//! DNS and [`MemoryIdentitySource`] the host account database. All of them
//! count calls so tests can assert on network traffic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{
    ConnectionContext, DirectoryEntry, LdapSession, LdapTransport, PageRequest, SearchPage,
    SearchRequest,
};
use crate::discovery::{SrvRecord, SrvResolver};
use crate::error::{DirectoryError, DirectoryResult};
use crate::identity::{IdentitySource, LocalGroup, LocalUser};

#[derive(Debug, Clone)]
struct Response {
    host: Option<String>,
    base: Option<String>,
    filter: String,
    entries: Vec<DirectoryEntry>,
}

#[derive(Debug, Default)]
struct ServerState {
    default_entries: Vec<DirectoryEntry>,
    responses: Vec<Response>,
    passwords: HashMap<String, String>,
    failing_hosts: HashSet<String>,
    connects: Vec<String>,
    binds: Vec<String>,
    requests: Vec<SearchRequest>,
    unbinds: usize,
}

impl ServerState {
    fn entries_for(&self, host: &str, request: &SearchRequest) -> Vec<DirectoryEntry> {
        self.responses
            .iter()
            .find(|r| {
                r.filter == request.filter
                    && r.host.as_deref().map_or(true, |h| h == host)
                    && r.base.as_deref().map_or(true, |b| b == request.base)
            })
            .map(|r| r.entries.clone())
            .unwrap_or_else(|| self.default_entries.clone())
    }
}

/// Scripted directory server.
///
/// Searches return the first registered response whose filter (and host
/// and base, when given) match, or the default entries. Paged requests
/// are served in slices with a decimal offset as the cookie.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries returned for any search without a more specific response.
    pub fn with_entries(self, entries: Vec<DirectoryEntry>) -> Self {
        self.state.lock().default_entries = entries;
        self
    }

    /// Entries returned for `filter` on any host and base.
    pub fn with_response(self, filter: &str, entries: Vec<DirectoryEntry>) -> Self {
        self.state.lock().responses.push(Response {
            host: None,
            base: None,
            filter: filter.to_string(),
            entries,
        });
        self
    }

    /// Entries returned for `filter` on one host, optionally under one base.
    pub fn with_response_for(
        self,
        host: &str,
        base: Option<&str>,
        filter: &str,
        entries: Vec<DirectoryEntry>,
    ) -> Self {
        self.state.lock().responses.push(Response {
            host: Some(host.to_string()),
            base: base.map(str::to_string),
            filter: filter.to_string(),
            entries,
        });
        self
    }

    /// Require `password` for binds as `dn`. Unknown DNs bind freely.
    pub fn with_password(self, dn: &str, password: &str) -> Self {
        self.state
            .lock()
            .passwords
            .insert(dn.to_string(), password.to_string());
        self
    }

    /// Refuse connections to `host`.
    pub fn with_failing_host(self, host: &str) -> Self {
        self.state.lock().failing_hosts.insert(host.to_string());
        self
    }

    /// `host:port` of every connection attempt, in order.
    pub fn connects(&self) -> Vec<String> {
        self.state.lock().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    /// Bind DNs, in order; anonymous binds appear as empty strings.
    pub fn binds(&self) -> Vec<String> {
        self.state.lock().binds.clone()
    }

    /// Every search round-trip, in order.
    pub fn requests(&self) -> Vec<SearchRequest> {
        self.state.lock().requests.clone()
    }

    pub fn search_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn unbind_count(&self) -> usize {
        self.state.lock().unbinds
    }
}

#[async_trait]
impl LdapTransport for MemoryTransport {
    async fn connect(&self, context: &ConnectionContext) -> DirectoryResult<Box<dyn LdapSession>> {
        let host = context.host.clone().unwrap_or_default();
        let mut state = self.state.lock();
        state.connects.push(format!("{}:{}", host, context.port));
        if state.failing_hosts.contains(&host) {
            return Err(DirectoryError::connection_failed(
                context.uri(),
                "connection refused",
            ));
        }
        Ok(Box::new(MemorySession {
            host,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    host: String,
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl LdapSession for MemorySession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        state.binds.push(dn.to_string());
        match state.passwords.get(dn) {
            Some(expected) if expected != password => Err(DirectoryError::BindFailed {
                dn: dn.to_string(),
                rc: 49,
                message: "invalid credentials".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        page: Option<&PageRequest>,
    ) -> DirectoryResult<SearchPage> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());
        let entries = state.entries_for(&self.host, request);

        let Some(page) = page else {
            return Ok(SearchPage {
                entries,
                cookie: None,
            });
        };

        let offset: usize = std::str::from_utf8(&page.cookie)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let size = (page.size as usize).max(1);
        let end = (offset + size).min(entries.len());
        let slice = entries.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let cookie = if end < entries.len() {
            end.to_string().into_bytes()
        } else {
            Vec::new()
        };

        Ok(SearchPage {
            entries: slice,
            cookie: Some(cookie),
        })
    }

    async fn unbind(&mut self) -> DirectoryResult<()> {
        self.state.lock().unbinds += 1;
        Ok(())
    }
}

/// Fixed SRV answers. Unknown names fail like NXDOMAIN.
#[derive(Debug, Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<SrvRecord>>,
    lookups: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, name: &str, records: Vec<SrvRecord>) -> Self {
        self.records.insert(name.to_string(), records);
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl SrvResolver for StaticResolver {
    async fn lookup_srv(&self, name: &str) -> DirectoryResult<Vec<SrvRecord>> {
        self.lookups.lock().push(name.to_string());
        self.records.get(name).cloned().ok_or_else(|| DirectoryError::Dns {
            name: name.to_string(),
            message: "no records".to_string(),
        })
    }
}

/// Host account database held in memory.
#[derive(Debug, Default)]
pub struct MemoryIdentitySource {
    users: Vec<LocalUser>,
    groups: Vec<LocalGroup>,
    lookups: Mutex<usize>,
}

impl MemoryIdentitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: &str, uid: u32) -> Self {
        self.users.push(LocalUser {
            name: name.to_string(),
            uid,
            gid: uid,
            gecos: String::new(),
            home_dir: format!("/home/{}", name),
            shell: "/bin/sh".to_string(),
        });
        self
    }

    pub fn with_group(mut self, name: &str, gid: u32) -> Self {
        self.groups.push(LocalGroup {
            name: name.to_string(),
            gid,
            members: Vec::new(),
        });
        self
    }

    pub fn lookup_count(&self) -> usize {
        *self.lookups.lock()
    }

    fn count(&self) {
        *self.lookups.lock() += 1;
    }
}

impl IdentitySource for MemoryIdentitySource {
    fn user_by_name(&self, name: &str) -> Option<LocalUser> {
        self.count();
        self.users.iter().find(|u| u.name == name).cloned()
    }

    fn user_by_id(&self, uid: u32) -> Option<LocalUser> {
        self.count();
        self.users.iter().find(|u| u.uid == uid).cloned()
    }

    fn group_by_name(&self, name: &str) -> Option<LocalGroup> {
        self.count();
        self.groups.iter().find(|g| g.name == name).cloned()
    }

    fn group_by_id(&self, gid: u32) -> Option<LocalGroup> {
        self.count();
        self.groups.iter().find(|g| g.gid == gid).cloned()
    }
}
