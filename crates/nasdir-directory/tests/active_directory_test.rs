//! Integration tests for the Active Directory backend and DC discovery.

mod common;

use std::sync::Arc;

use common::{
    ad_group, ad_settings, ad_user, deps, srv, AD_GROUPS_FILTER, AD_USERS_FILTER,
    GLOBAL_SECURITY_GROUP, LOW_BIT_GROUP, NORMAL_USER_ACCOUNT,
};
use nasdir_directory::discovery::DomainDiscovery;
use nasdir_directory::testing::{MemoryIdentitySource, MemoryTransport, StaticResolver};
use nasdir_directory::{
    ActiveDirectoryDirectory, CacheFlags, ConnectionContext, DirectoryConfig, Identifier,
    QueryCache,
};

async fn directory(
    settings: nasdir_directory::ActiveDirectorySettings,
    transport: &Arc<MemoryTransport>,
    identities: MemoryIdentitySource,
) -> ActiveDirectoryDirectory {
    let config = DirectoryConfig::active_directory(settings.clone()).with_cache_flags(CacheFlags::NONE);
    let deps = deps(transport, StaticResolver::new(), identities, None);
    ActiveDirectoryDirectory::connect(settings, &config, &deps).await
}

#[tokio::test]
async fn test_qualified_names() {
    let transport = Arc::new(MemoryTransport::new());

    let qualified = directory(ad_settings(), &transport, MemoryIdentitySource::new()).await;
    assert_eq!(qualified.qualified_name("ACME", "jdoe"), "ACME\\jdoe");

    let default_domain = directory(
        ad_settings().with_default_domain(true),
        &transport,
        MemoryIdentitySource::new(),
    )
    .await;
    assert_eq!(default_domain.qualified_name("ACME", "jdoe"), "jdoe");

    let unix = directory(
        ad_settings().with_unix_extensions(true),
        &transport,
        MemoryIdentitySource::new(),
    )
    .await;
    assert_eq!(unix.qualified_name("ACME", "jdoe"), "jdoe");
}

#[tokio::test]
async fn test_custom_separator() {
    let transport = Arc::new(MemoryTransport::new());
    let mut settings = ad_settings();
    settings.separator = '+';
    let dir = directory(settings, &transport, MemoryIdentitySource::new()).await;
    assert_eq!(dir.qualified_name("ACME", "jdoe"), "ACME+jdoe");
}

#[tokio::test]
async fn test_enumeration_excludes_low_bit_principals() {
    let transport = Arc::new(
        MemoryTransport::new()
            .with_response(
                AD_USERS_FILTER,
                vec![
                    ad_user("jdoe", NORMAL_USER_ACCOUNT),
                    ad_user("trust$", NORMAL_USER_ACCOUNT | 0x1),
                ],
            )
            .with_response(
                AD_GROUPS_FILTER,
                vec![
                    ad_group("Engineering", GLOBAL_SECURITY_GROUP),
                    ad_group("Newsletter", LOW_BIT_GROUP),
                ],
            ),
    );
    let identities = MemoryIdentitySource::new()
        .with_user("ACME\\jdoe", 10001)
        .with_user("ACME\\trust$", 10002)
        .with_group("ACME\\Engineering", 20001)
        .with_group("ACME\\Newsletter", 20002);
    let dir = directory(ad_settings(), &transport, identities).await;

    let users: Vec<String> = dir.get_users().await.into_iter().map(|u| u.name).collect();
    assert_eq!(users, vec!["ACME\\jdoe".to_string()]);

    let groups: Vec<String> = dir.get_groups().await.into_iter().map(|g| g.name).collect();
    assert_eq!(groups, vec!["ACME\\Engineering".to_string()]);
}

#[tokio::test]
async fn test_single_lookup_of_low_bit_principal_falls_back() {
    let filter = "(&(objectclass=group)(sAMAccountName=Newsletter))";
    let transport = Arc::new(
        MemoryTransport::new().with_response(filter, vec![ad_group("Newsletter", LOW_BIT_GROUP)]),
    );
    let identities = MemoryIdentitySource::new().with_group("ACME\\Newsletter", 20002);
    let dir = directory(ad_settings(), &transport, identities).await;

    // the directory rejects it, the literal local name still resolves
    let group = dir.get_group(&Identifier::from("ACME\\Newsletter")).await;
    assert_eq!(group.map(|g| g.gid), Some(20002));
}

#[tokio::test]
async fn test_dc_failover_stops_at_first_success() {
    let resolver = StaticResolver::new().with_records(
        "_ldap._tcp.acme.com",
        vec![
            srv("dc3.acme.com", 30),
            srv("dc1.acme.com", 10),
            srv("dc2.acme.com", 20),
        ],
    );
    let transport = Arc::new(
        MemoryTransport::new()
            .with_failing_host("dc1.acme.com")
            .with_failing_host("dc2.acme.com"),
    );
    let discovery = DomainDiscovery::new(
        Arc::new(resolver),
        transport.clone(),
        QueryCache::in_memory(),
        ConnectionContext::default(),
    );

    let found = discovery.dc_connect("acme.com", None).await;
    assert_eq!(found, Some(("dc3.acme.com".to_string(), 389)));
    assert_eq!(
        transport.connects(),
        vec![
            "dc1.acme.com:389".to_string(),
            "dc2.acme.com:389".to_string(),
            "dc3.acme.com:389".to_string()
        ]
    );
}

#[tokio::test]
async fn test_connect_uses_discovered_controller() {
    let mut settings = ad_settings();
    settings.dc_name = None;
    let resolver = StaticResolver::new().with_records(
        "_ldap._tcp.acme.com",
        vec![srv("dc1.acme.com", 0), srv("dc2.acme.com", 10)],
    );
    let transport = Arc::new(
        MemoryTransport::new()
            .with_failing_host("dc1.acme.com")
            .with_response_for("dc2.acme.com", None, AD_USERS_FILTER, vec![ad_user("jdoe", NORMAL_USER_ACCOUNT)]),
    );
    let identities = MemoryIdentitySource::new().with_user("ACME\\jdoe", 10001);
    let config = DirectoryConfig::active_directory(settings.clone());
    let deps = deps(&transport, resolver, identities, None);
    let dir = ActiveDirectoryDirectory::connect(settings, &config, &deps).await;

    assert_eq!(dir.get_users().await.len(), 1);
    assert_eq!(dir.user_count().await, 1);
}
