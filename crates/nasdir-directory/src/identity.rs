//! Local OS identity records and lookups
//!
//! Directory entries are only useful once they map to an account the host
//! knows about. [`IdentitySource`] is that lookup; [`NssIdentitySource`]
//! goes through the system user and group databases, so winbind and
//! nss-ldap accounts resolve the same way local ones do.

use std::fmt;

use nix::unistd::{Gid, Group, Uid, User};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult};

/// A resolved local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home_dir: String,
    pub shell: String,
}

/// A resolved local group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGroup {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl From<User> for LocalUser {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            gecos: user.gecos.to_string_lossy().into_owned(),
            home_dir: user.dir.to_string_lossy().into_owned(),
            shell: user.shell.to_string_lossy().into_owned(),
        }
    }
}

impl From<Group> for LocalGroup {
    fn from(group: Group) -> Self {
        Self {
            name: group.name,
            gid: group.gid.as_raw(),
            members: group.mem,
        }
    }
}

/// How a caller names a user or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Name(String),
    Id(u32),
}

impl Identifier {
    /// Parse an optional caller argument. All-digit input is a numeric id.
    ///
    /// A missing identifier is a programming error on the caller's side and
    /// is the one lookup failure that is reported instead of swallowed.
    pub fn parse(value: Option<&str>, kind: &'static str) -> DirectoryResult<Self> {
        let value = value.ok_or(DirectoryError::MissingIdentifier { kind })?;
        Ok(Self::from(value))
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Identifier::Name(name) => Some(name),
            Identifier::Id(_) => None,
        }
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        match value.parse::<u32>() {
            Ok(id) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                Identifier::Id(id)
            }
            _ => Identifier::Name(value.to_string()),
        }
    }
}

impl From<u32> for Identifier {
    fn from(id: u32) -> Self {
        Identifier::Id(id)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Name(name) => f.write_str(name),
            Identifier::Id(id) => write!(f, "{}", id),
        }
    }
}

/// A local account record that can be looked up by name or id.
pub trait LocalRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// `"user"` or `"group"`.
    const KIND: &'static str;

    fn lookup(source: &dyn IdentitySource, id: &Identifier) -> Option<Self>;
}

impl LocalRecord for LocalUser {
    const KIND: &'static str = "user";

    fn lookup(source: &dyn IdentitySource, id: &Identifier) -> Option<Self> {
        source.user(id)
    }
}

impl LocalRecord for LocalGroup {
    const KIND: &'static str = "group";

    fn lookup(source: &dyn IdentitySource, id: &Identifier) -> Option<Self> {
        source.group(id)
    }
}

/// Resolved records grouped by NetBIOS domain. LDAP results live in a
/// single `None` domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySet<T> {
    domains: Vec<(Option<String>, Vec<T>)>,
}

impl<T> Default for IdentitySet<T> {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
        }
    }
}

impl<T> IdentitySet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding only `records`, without a domain.
    pub fn single(records: Vec<T>) -> Self {
        let mut set = Self::new();
        set.push_domain(None, records);
        set
    }

    pub fn push_domain(&mut self, domain: Option<String>, records: Vec<T>) {
        self.domains.push((domain, records));
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.domains.iter().flat_map(|(_, records)| records.iter())
    }

    pub fn len(&self) -> usize {
        self.domains.iter().map(|(_, records)| records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn domains(&self) -> Vec<Option<&str>> {
        self.domains.iter().map(|(d, _)| d.as_deref()).collect()
    }

    /// Records of one domain.
    pub fn domain(&self, name: Option<&str>) -> &[T] {
        self.domains
            .iter()
            .find(|(d, _)| d.as_deref() == name)
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[])
    }

    pub fn into_vec(self) -> Vec<T> {
        self.domains
            .into_iter()
            .flat_map(|(_, records)| records)
            .collect()
    }
}

impl<T> IntoIterator for IdentitySet<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

/// Host user/group database.
///
/// A miss is a normal outcome (the directory knows an account the host
/// does not), so lookups return `Option` rather than an error.
pub trait IdentitySource: Send + Sync {
    fn user_by_name(&self, name: &str) -> Option<LocalUser>;
    fn user_by_id(&self, uid: u32) -> Option<LocalUser>;
    fn group_by_name(&self, name: &str) -> Option<LocalGroup>;
    fn group_by_id(&self, gid: u32) -> Option<LocalGroup>;

    fn user(&self, id: &Identifier) -> Option<LocalUser> {
        match id {
            Identifier::Name(name) => self.user_by_name(name),
            Identifier::Id(uid) => self.user_by_id(*uid),
        }
    }

    fn group(&self, id: &Identifier) -> Option<LocalGroup> {
        match id {
            Identifier::Name(name) => self.group_by_name(name),
            Identifier::Id(gid) => self.group_by_id(*gid),
        }
    }
}

/// Lookups through `getpwnam(3)`/`getgrnam(3)` and friends.
#[derive(Debug, Clone, Copy, Default)]
pub struct NssIdentitySource;

impl IdentitySource for NssIdentitySource {
    fn user_by_name(&self, name: &str) -> Option<LocalUser> {
        match User::from_name(name) {
            Ok(user) => user.map(LocalUser::from),
            Err(e) => {
                debug!(name = %name, error = %e, "getpwnam failed");
                None
            }
        }
    }

    fn user_by_id(&self, uid: u32) -> Option<LocalUser> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(user) => user.map(LocalUser::from),
            Err(e) => {
                debug!(uid, error = %e, "getpwuid failed");
                None
            }
        }
    }

    fn group_by_name(&self, name: &str) -> Option<LocalGroup> {
        match Group::from_name(name) {
            Ok(group) => group.map(LocalGroup::from),
            Err(e) => {
                debug!(name = %name, error = %e, "getgrnam failed");
                None
            }
        }
    }

    fn group_by_id(&self, gid: u32) -> Option<LocalGroup> {
        match Group::from_gid(Gid::from_raw(gid)) {
            Ok(group) => group.map(LocalGroup::from),
            Err(e) => {
                debug!(gid, error = %e, "getgrgid failed");
                None
            }
        }
    }
}
