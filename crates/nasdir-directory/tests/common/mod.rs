//! Shared fixtures for nasdir-directory integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use nasdir_directory::discovery::SrvRecord;
use nasdir_directory::testing::{MemoryIdentitySource, MemoryTransport, StaticResolver};
use nasdir_directory::{
    ActiveDirectorySettings, DirectoryDeps, DirectoryEntry, IdentityCacheStore, LdapSettings,
};

pub const LDAP_HOST: &str = "ldap.example.com";
pub const LDAP_BASE: &str = "dc=example,dc=com";
pub const LDAP_USERS_FILTER: &str = "(&(|(objectclass=person)(objectclass=account))(uid=*))";
pub const LDAP_GROUPS_FILTER: &str = "(&(objectclass=posixgroup)(gidnumber=*))";

pub const AD_USERS_FILTER: &str = "(&(|(objectclass=user)(objectclass=person))(sAMAccountName=*))";
pub const AD_GROUPS_FILTER: &str = "(&(objectclass=group)(sAMAccountName=*))";

/// `sAMAccountType` of a normal user account.
pub const NORMAL_USER_ACCOUNT: i64 = 0x3000_0000;
/// `groupType` of a global security group.
pub const GLOBAL_SECURITY_GROUP: i64 = -2_147_483_646;
/// `groupType` of a distribution group with the low bit set.
pub const LOW_BIT_GROUP: i64 = -2_147_483_643;

pub fn ldap_settings() -> LdapSettings {
    LdapSettings::new(LDAP_HOST, LDAP_BASE).with_bind("cn=admin,dc=example,dc=com", "secret")
}

pub fn ad_settings() -> ActiveDirectorySettings {
    let mut settings = ActiveDirectorySettings::new("acme.com", "admin", "secret")
        .with_workgroup("ACME")
        .with_dc("dc1.acme.com");
    settings.base_dn = Some("DC=acme,DC=com".to_string());
    settings
}

/// `count` posix accounts named `user0..`.
pub fn people(count: usize) -> Vec<DirectoryEntry> {
    (0..count)
        .map(|i| {
            DirectoryEntry::new(format!("uid=user{},{}", i, LDAP_BASE))
                .with_attr("uid", format!("user{}", i))
        })
        .collect()
}

pub fn ad_user(sam: &str, account_type: i64) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={},CN=Users,DC=acme,DC=com", sam))
        .with_attr("sAMAccountName", sam)
        .with_attr("sAMAccountType", account_type.to_string())
}

pub fn ad_group(sam: &str, group_type: i64) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={},CN=Users,DC=acme,DC=com", sam))
        .with_attr("sAMAccountName", sam)
        .with_attr("groupType", group_type.to_string())
}

pub fn srv(target: &str, priority: u16) -> SrvRecord {
    SrvRecord::new(target, 389, priority, 0)
}

pub fn deps(
    transport: &Arc<MemoryTransport>,
    resolver: StaticResolver,
    identities: MemoryIdentitySource,
    store: Option<IdentityCacheStore>,
) -> DirectoryDeps {
    DirectoryDeps::new(transport.clone(), Arc::new(resolver), Arc::new(identities)).with_store(store)
}
