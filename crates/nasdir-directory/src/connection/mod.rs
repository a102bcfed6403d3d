//! Directory connection
//!
//! A [`DirectoryConnection`] owns at most one protocol session to one
//! endpoint. It opens and binds on demand, runs plain or paged searches,
//! and can be pointed at another endpoint temporarily with
//! [`save`](DirectoryConnection::save) / [`restore`](DirectoryConnection::restore).
//!
//! Failures are returned as [`DirectoryError`]s; `open()` and the backends
//! above it log them and carry on with empty results.

mod context;
mod entry;
pub mod transport;

pub use context::ConnectionContext;
pub use entry::{DirectoryEntry, SearchResult};
pub use transport::{
    Ldap3Transport, LdapSession, LdapTransport, PageRequest, SearchPage, SearchRequest,
};

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::SearchScope;
use crate::error::{DirectoryError, DirectoryResult};
use crate::query_cache::QueryCache;

struct SavedState {
    context: Arc<ConnectionContext>,
    was_open: bool,
}

/// Session lifecycle and search for one directory endpoint.
pub struct DirectoryConnection {
    transport: Arc<dyn LdapTransport>,
    context: Arc<ConnectionContext>,
    session: Option<Box<dyn LdapSession>>,
    query_cache: QueryCache,
    saved: Vec<SavedState>,
}

impl DirectoryConnection {
    pub fn new(
        transport: Arc<dyn LdapTransport>,
        context: ConnectionContext,
        query_cache: QueryCache,
    ) -> Self {
        Self {
            transport,
            context: Arc::new(context),
            session: None,
            query_cache,
            saved: Vec::new(),
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn transport(&self) -> Arc<dyn LdapTransport> {
        Arc::clone(&self.transport)
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.query_cache
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Open and bind. Returns true when the connection is usable.
    ///
    /// Already open is a no-op. Failures are logged and reported as false;
    /// use [`try_open`](Self::try_open) to get the error.
    pub async fn open(&mut self) -> bool {
        match self.try_open().await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    uri = %self.context.uri(),
                    rc = ?e.result_code(),
                    error = %e,
                    "Failed to open directory connection"
                );
                false
            }
        }
    }

    /// Open and bind, reporting why it failed.
    #[instrument(skip(self), fields(uri = %self.context.uri()))]
    pub async fn try_open(&mut self) -> DirectoryResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        if self.context.host.as_deref().map_or(true, str::is_empty) {
            return Err(DirectoryError::connection_failed(
                self.context.uri(),
                "no host configured",
            ));
        }

        let mut session = self.transport.connect(&self.context).await?;

        let (dn, password) = match &self.context.bind {
            Some(bind) => (bind.dn.as_str(), bind.password.as_str()),
            None => ("", ""),
        };
        if dn.is_empty() {
            debug!("Binding anonymously");
        } else {
            debug!(bind_dn = %dn, "Binding");
        }

        if let Err(e) = session.simple_bind(dn, password).await {
            if let Err(unbind) = session.unbind().await {
                debug!(error = %unbind, "Unbind after failed bind also failed");
            }
            return Err(e);
        }

        info!(uri = %self.context.uri(), "Directory connection established");
        self.session = Some(session);
        Ok(())
    }

    /// Unbind and drop the session. Safe to call when already closed.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.unbind().await {
                debug!(error = %e, "Unbind failed");
            }
            debug!(uri = %self.context.uri(), "Directory connection closed");
        }
    }

    /// Search under `base` (the context base DN when `None`).
    ///
    /// Returns no rows when the connection is not open. With a page size of
    /// zero the search is a single request served through the query cache;
    /// otherwise pages are fetched until the server returns an empty cookie.
    #[instrument(skip(self, attributes), fields(host = ?self.context.host, page_size = self.context.page_size))]
    pub async fn search(
        &mut self,
        base: Option<&str>,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> DirectoryResult<SearchResult> {
        let Some(session) = self.session.as_mut() else {
            debug!("Search on a closed connection");
            return Ok(Vec::new());
        };

        let base = base
            .map(str::to_string)
            .or_else(|| self.context.base_dn.clone())
            .unwrap_or_default();
        let page_size = self.context.page_size;

        let attributes: Vec<String> = if page_size > 0 && !self.context.paged_attributes {
            Vec::new()
        } else {
            attributes.iter().map(|a| a.to_string()).collect()
        };
        let request = SearchRequest {
            base,
            scope,
            filter: filter.to_string(),
            attributes,
        };

        if page_size == 0 {
            let key = QueryCache::key(
                filter,
                self.context.host.as_deref().unwrap_or(""),
                self.context.port,
                Some(&request.base),
            );
            if let Some(cached) = self.query_cache.get(&key) {
                debug!(base_dn = %request.base, filter = %filter, "Query cache hit");
                return Ok(cached);
            }

            let page = session.search(&request, None).await?;
            debug!(base_dn = %request.base, filter = %filter, entries = page.entries.len(), "Search complete");
            self.query_cache.put(&key, page.entries.clone());
            return Ok(page.entries);
        }

        let mut entries = Vec::new();
        let mut cookie = Vec::new();
        let mut pages = 0u32;
        loop {
            let control = PageRequest {
                size: page_size,
                cookie: std::mem::take(&mut cookie),
            };
            let page = session.search(&request, Some(&control)).await?;
            pages += 1;
            debug!(page = pages, entries = page.entries.len(), "Fetched page");
            entries.extend(page.entries);

            match page.cookie {
                Some(next) if !next.is_empty() => cookie = next,
                _ => break,
            }
        }

        debug!(
            base_dn = %request.base,
            filter = %filter,
            pages,
            entries = entries.len(),
            "Paged search complete"
        );
        Ok(entries)
    }

    /// Search, opening the connection for this call if it was closed and
    /// closing it again afterwards.
    pub async fn search_once(
        &mut self,
        base: Option<&str>,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> DirectoryResult<SearchResult> {
        let was_open = self.is_open();
        if !was_open {
            self.try_open().await?;
        }
        let result = self.search(base, scope, filter, attributes).await;
        if !was_open {
            self.close().await;
        }
        result
    }

    /// Remember the current context and open state.
    pub fn save(&mut self) {
        self.saved.push(SavedState {
            context: Arc::clone(&self.context),
            was_open: self.is_open(),
        });
    }

    /// Swap in a new context. An open session is closed when the endpoint
    /// or credentials change.
    pub async fn repoint(&mut self, context: ConnectionContext) {
        if !self.context.same_endpoint(&context) {
            self.close().await;
        }
        self.context = Arc::new(context);
    }

    /// Return to the most recently saved context and open state. Does
    /// nothing when nothing was saved.
    pub async fn restore(&mut self) {
        let Some(saved) = self.saved.pop() else {
            return;
        };

        if !self.context.same_endpoint(&saved.context) {
            self.close().await;
        }
        self.context = saved.context;

        if saved.was_open && !self.is_open() {
            self.open().await;
        } else if !saved.was_open && self.is_open() {
            self.close().await;
        }
    }
}

impl std::fmt::Debug for DirectoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConnection")
            .field("uri", &self.context.uri())
            .field("open", &self.is_open())
            .field("saved", &self.saved.len())
            .finish()
    }
}
