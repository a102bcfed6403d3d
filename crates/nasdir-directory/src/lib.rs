//! # Directory identity layer
//!
//! Resolves LDAP and Active Directory accounts to the local users and
//! groups the host knows about, with an on-disk identity cache so most
//! lookups never touch the network.
//!
//! ## Features
//!
//! - LDAP v3 with SSL/TLS and STARTTLS
//! - Paged search and a persistent query cache
//! - Domain controller and global catalog discovery through DNS SRV
//! - Multi-domain Active Directory enumeration
//! - Two-tier identity cache (raw entries and resolved records)
//!
//! ## Example
//!
//! ```ignore
//! use nasdir_directory::{DirectoryConfig, DirectoryDeps, DirectoryService, resolve_user};
//!
//! let config = DirectoryConfig::from_env()?;
//! let deps = DirectoryDeps::system(&config)?;
//! let directory = DirectoryService::from_config(&config, &deps).await?;
//!
//! if let Some(user) = resolve_user(&directory, Some("ACME\\jdoe")).await? {
//!     println!("{} has uid {}", user.name, user.uid);
//! }
//! ```

pub mod ad;
pub mod cache;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod identity;
pub mod ldap;
pub mod query_cache;
pub mod service;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports
pub use ad::{ActiveDirectoryDirectory, DomainDescriptor, PartitionFilter};
pub use cache::IdentityCacheStore;
pub use config::{
    ActiveDirectorySettings, CacheFlags, DirectoryConfig, Encryption, LdapSettings, ServiceKind,
};
pub use connection::{ConnectionContext, DirectoryConnection, DirectoryEntry};
pub use discovery::DomainDiscovery;
pub use error::{DirectoryError, DirectoryResult};
pub use identity::{Identifier, IdentitySet, LocalGroup, LocalUser};
pub use ldap::LdapDirectory;
pub use query_cache::QueryCache;
pub use service::{
    cache_expire, cache_fill, enumerate_groups, enumerate_users, resolve_group, resolve_user,
    DirectoryDeps, DirectoryService, FillReport, IdentityDirectory,
};
