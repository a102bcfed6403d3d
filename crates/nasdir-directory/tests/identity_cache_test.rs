//! Integration tests for the identity cache tiers and their sentinels.

mod common;

use std::sync::Arc;

use common::{
    ad_settings, ad_user, deps, ldap_settings, people, AD_USERS_FILTER, LDAP_USERS_FILTER,
    NORMAL_USER_ACCOUNT,
};
use nasdir_directory::testing::{MemoryIdentitySource, MemoryTransport, StaticResolver};
use nasdir_directory::{
    ActiveDirectoryDirectory, CacheFlags, DirectoryConfig, Identifier, IdentityCacheStore,
    LdapDirectory, LocalGroup, LocalUser,
};
use tempfile::TempDir;

fn identities() -> MemoryIdentitySource {
    MemoryIdentitySource::new()
        .with_user("user0", 1000)
        .with_user("user1", 1001)
        .with_user("user2", 1002)
}

#[tokio::test]
async fn test_loaded_sentinel_skips_the_network() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_response(LDAP_USERS_FILTER, people(3)));
    let config = DirectoryConfig::ldap(ldap_settings()).with_cache_flags(CacheFlags::all());

    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let first = LdapDirectory::new(ldap_settings(), &config, &deps).get_users().await;
    assert_eq!(first.len(), 3);
    let searches = transport.search_count();
    let connects = transport.connect_count();

    // a new backend over the same cache tree
    let reopened = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let deps = common::deps(&transport, StaticResolver::new(), identities(), Some(reopened));
    let second = LdapDirectory::new(ldap_settings(), &config, &deps).get_users().await;

    let mut first: Vec<LocalUser> = first.into_vec();
    let mut second: Vec<LocalUser> = second.into_vec();
    first.sort_by_key(|u| u.uid);
    second.sort_by_key(|u| u.uid);
    assert_eq!(first, second);
    assert_eq!(transport.search_count(), searches);
    assert_eq!(transport.connect_count(), connects);
}

#[tokio::test]
async fn test_raw_sentinel_skips_search_but_resolves_again() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let raw = store.directory_users(None).unwrap();
    for entry in people(2) {
        raw.put(&entry.dn.clone(), &entry).unwrap();
    }
    raw.mark_loaded().unwrap();

    let transport = Arc::new(MemoryTransport::new());
    let config = DirectoryConfig::ldap(ldap_settings()).with_cache_flags(CacheFlags::all());
    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let users = LdapDirectory::new(ldap_settings(), &config, &deps).get_users().await;

    assert_eq!(users.len(), 2);
    assert_eq!(transport.search_count(), 0);
    assert!(store.users(None).unwrap().is_loaded());
}

#[tokio::test]
async fn test_cache_disabled_always_searches() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_response(LDAP_USERS_FILTER, people(1)));
    let config = DirectoryConfig::ldap(ldap_settings()).with_cache_flags(CacheFlags::NONE);
    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let directory = LdapDirectory::new(ldap_settings(), &config, &deps);

    directory.get_users().await;
    directory.get_users().await;
    assert_eq!(transport.search_count(), 2);
    assert!(store.users(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_active_directory_sentinel_skips_the_network() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let transport = Arc::new(
        MemoryTransport::new().with_response(AD_USERS_FILTER, vec![ad_user("jdoe", NORMAL_USER_ACCOUNT)]),
    );
    let config = DirectoryConfig::active_directory(ad_settings()).with_cache_flags(CacheFlags::all());
    let identities = || MemoryIdentitySource::new().with_user("ACME\\jdoe", 10001);

    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let first = ActiveDirectoryDirectory::connect(ad_settings(), &config, &deps)
        .await
        .get_users()
        .await;
    assert_eq!(first.domains(), vec![Some("ACME")]);
    assert!(store.users(Some("ACME")).unwrap().is_loaded());
    assert!(store.directory_users(Some("ACME")).unwrap().contains("ACME\\JDOE"));
    let searches = transport.search_count();

    let deps = common::deps(&transport, StaticResolver::new(), identities(), Some(store));
    let second = ActiveDirectoryDirectory::connect(ad_settings(), &config, &deps)
        .await
        .get_users()
        .await;
    assert_eq!(first, second);
    assert_eq!(transport.search_count(), searches);
}

fn names(users: Vec<LocalUser>) -> Vec<String> {
    let mut names: Vec<String> = users.into_iter().map(|u| u.name).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_lookup_by_id_keeps_cached_enumeration_intact() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let user0 = people(1).remove(0);
    let transport = Arc::new(
        MemoryTransport::new()
            .with_response(LDAP_USERS_FILTER, people(2))
            .with_response(
                "(&(|(objectclass=person)(objectclass=account))(uidnumber=1000))",
                vec![user0],
            ),
    );
    let config = DirectoryConfig::ldap(ldap_settings()).with_cache_flags(CacheFlags::all());

    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let directory = LdapDirectory::new(ldap_settings(), &config, &deps);
    assert_eq!(directory.get_users().await.len(), 2);

    let found = directory.get_user(&Identifier::Id(1000)).await.unwrap();
    assert_eq!(found.name, "user0");

    let users = store.users(None).unwrap();
    assert_eq!(users.keys(), vec!["user0".to_string(), "user1".to_string()]);
    assert_eq!(
        store.directory_users(None).unwrap().keys(),
        vec![
            "uid=user0,dc=example,dc=com".to_string(),
            "uid=user1,dc=example,dc=com".to_string(),
        ]
    );

    let deps = common::deps(&transport, StaticResolver::new(), identities(), Some(store));
    let cached = LdapDirectory::new(ldap_settings(), &config, &deps).get_users().await;
    assert_eq!(names(cached.into_vec()), vec!["user0", "user1"]);
}

#[tokio::test]
async fn test_lookup_by_name_is_served_from_filled_cache() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_response(LDAP_USERS_FILTER, people(2)));
    let config = DirectoryConfig::ldap(ldap_settings()).with_cache_flags(CacheFlags::all());

    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let directory = LdapDirectory::new(ldap_settings(), &config, &deps);
    directory.get_users().await;
    let searches = transport.search_count();

    let found = directory.get_user(&Identifier::from("user1")).await.unwrap();
    assert_eq!(found.uid, 1001);
    assert_eq!(transport.search_count(), searches);
    assert_eq!(store.users(None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_active_directory_lookup_keys_by_qualified_name() {
    let cache_dir = TempDir::new().unwrap();
    let store = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let transport = Arc::new(
        MemoryTransport::new().with_response(AD_USERS_FILTER, vec![ad_user("jdoe", NORMAL_USER_ACCOUNT)]),
    );
    let config = DirectoryConfig::active_directory(ad_settings()).with_cache_flags(CacheFlags::all());
    let identities = || MemoryIdentitySource::new().with_user("ACME\\jdoe", 10001);

    let deps = deps(&transport, StaticResolver::new(), identities(), Some(store.clone()));
    let directory = ActiveDirectoryDirectory::connect(ad_settings(), &config, &deps).await;
    let first = directory.get_users().await;
    let searches = transport.search_count();

    // different case than the directory entry; served from the raw tier
    let found = directory.get_user(&Identifier::from("acme\\JDOE")).await.unwrap();
    assert_eq!(found.name, "ACME\\jdoe");
    assert_eq!(transport.search_count(), searches);

    assert_eq!(store.users(Some("ACME")).unwrap().keys(), vec!["ACME\\jdoe".to_string()]);
    assert_eq!(
        store.directory_users(Some("ACME")).unwrap().keys(),
        vec!["ACME\\JDOE".to_string()]
    );

    let deps = common::deps(&transport, StaticResolver::new(), identities(), Some(store));
    let second = ActiveDirectoryDirectory::connect(ad_settings(), &config, &deps)
        .await
        .get_users()
        .await;
    assert_eq!(first, second);
}

#[test]
fn test_resolved_record_round_trip_across_stores() {
    let cache_dir = TempDir::new().unwrap();
    let group = LocalGroup {
        name: "ACME\\Domain Users".to_string(),
        gid: 20513,
        members: vec!["ACME\\jdoe".to_string(), "ACME\\asmith".to_string()],
    };

    IdentityCacheStore::open(cache_dir.path())
        .unwrap()
        .groups(Some("ACME"))
        .unwrap()
        .put(&group.name, &group)
        .unwrap();

    let fresh = IdentityCacheStore::open(cache_dir.path()).unwrap();
    let tier = fresh.groups(Some("ACME")).unwrap();
    assert_eq!(tier.get("ACME\\Domain Users"), Some(group));
    assert_eq!(tier.keys(), vec!["ACME\\Domain Users".to_string()]);
}
