//! Integration tests for the directory connection and query cache.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{people, LDAP_BASE, LDAP_HOST};
use nasdir_directory::config::SearchScope;
use nasdir_directory::testing::MemoryTransport;
use nasdir_directory::{ConnectionContext, DirectoryConnection, Encryption, QueryCache};

fn connection(transport: &Arc<MemoryTransport>, context: ConnectionContext) -> DirectoryConnection {
    DirectoryConnection::new(transport.clone(), context, QueryCache::in_memory())
}

fn context() -> ConnectionContext {
    ConnectionContext::new(LDAP_HOST, Encryption::None).with_base_dn(Some(LDAP_BASE.to_string()))
}

#[test]
fn test_query_cache_key_is_deterministic() {
    let inputs = [
        ("(uid=*)", "ldap.example.com", 389, Some("dc=example,dc=com")),
        ("(cn=staff)", "dc1.acme.com", 636, None),
        ("", "", 0, Some("")),
    ];
    for (filter, host, port, base) in inputs {
        let first = QueryCache::key(filter, host, port, base);
        assert_eq!(first, QueryCache::key(filter, host, port, base));
        assert_eq!(first.len(), 64);
    }
    assert_ne!(
        QueryCache::key("(uid=*)", "a", 389, None),
        QueryCache::key("(uid=*)", "a", 636, None)
    );
    // a missing base hashes like an empty one
    assert_eq!(
        QueryCache::key("(uid=*)", "a", 389, None),
        QueryCache::key("(uid=*)", "a", 389, Some(""))
    );
}

#[tokio::test]
async fn test_paged_search_returns_every_page() {
    let transport = Arc::new(MemoryTransport::new().with_entries(people(5)));
    let mut conn = connection(&transport, context().with_page_size(2));
    assert!(conn.open().await);

    let rows = conn
        .search(None, SearchScope::Subtree, "(uid=*)", &["uid"])
        .await
        .unwrap();

    assert_eq!(transport.search_count(), 3);
    assert_eq!(rows.len(), 5);
    let unique: HashSet<&str> = rows.iter().map(|r| r.dn.as_str()).collect();
    assert_eq!(unique.len(), 5);
}

#[tokio::test]
async fn test_paged_search_bypasses_query_cache() {
    let transport = Arc::new(MemoryTransport::new().with_entries(people(3)));
    let cache = QueryCache::in_memory();
    let mut conn =
        DirectoryConnection::new(transport.clone(), context().with_page_size(2), cache.clone());
    assert!(conn.open().await);

    conn.search(None, SearchScope::Subtree, "(uid=*)", &[]).await.unwrap();
    conn.search(None, SearchScope::Subtree, "(uid=*)", &[]).await.unwrap();
    assert_eq!(transport.search_count(), 4);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_open_and_close_are_idempotent() {
    let transport = Arc::new(MemoryTransport::new());
    let mut conn = connection(&transport, context());

    assert!(conn.open().await);
    assert!(conn.open().await);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.binds().len(), 1);

    conn.close().await;
    conn.close().await;
    assert!(!conn.is_open());
    assert_eq!(transport.unbind_count(), 1);
}

#[tokio::test]
async fn test_anonymous_bind_without_credentials() {
    let transport = Arc::new(MemoryTransport::new());
    let mut conn = connection(&transport, context().with_bind(None));
    assert!(conn.open().await);
    assert_eq!(transport.binds(), vec![String::new()]);
}

#[tokio::test]
async fn test_unpaged_search_served_from_persistent_cache() {
    let dir = tempfile::TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new().with_entries(people(2)));

    for _ in 0..2 {
        // a fresh cache handle over the same directory, as in a new process
        let cache = QueryCache::persistent(dir.path(), None).unwrap();
        let mut conn =
            DirectoryConnection::new(transport.clone(), context().with_page_size(0), cache);
        let rows = conn
            .search_once(None, SearchScope::Subtree, "(uid=*)", &["uid"])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
    assert_eq!(transport.search_count(), 1);
}
