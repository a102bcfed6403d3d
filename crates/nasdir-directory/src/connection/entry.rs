//! Search result rows.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// One row of a search result.
///
/// Directory attributes are multi-valued, so every attribute maps to an
/// ordered list. A row with an empty DN is a referral, not an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

/// Ordered rows returned by a search.
pub type SearchResult = Vec<DirectoryEntry>;

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Referral placeholder row.
    pub fn referral() -> Self {
        Self::default()
    }

    /// Builder helper appending one value to an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn is_referral(&self) -> bool {
        self.dn.is_empty()
    }

    /// All values of an attribute. Attribute names match case-insensitively,
    /// as they do on the server.
    pub fn values(&self, attr: &str) -> &[String] {
        if let Some(values) = self.attrs.get(attr) {
            return values;
        }
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value of an attribute.
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }

    /// First value parsed as an integer.
    pub fn first_int(&self, attr: &str) -> Option<i64> {
        self.first(attr).and_then(|v| v.trim().parse().ok())
    }
}

impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        let attrs: HashMap<String, Vec<String>> = entry.attrs;
        Self {
            dn: entry.dn,
            attrs: attrs.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_case_insensitive() {
        let entry = DirectoryEntry::new("cn=jdoe,dc=example,dc=com")
            .with_attr("sAMAccountName", "jdoe")
            .with_attr("memberOf", "cn=a")
            .with_attr("memberOf", "cn=b");
        assert_eq!(entry.first("samaccountname"), Some("jdoe"));
        assert_eq!(entry.values("memberof").len(), 2);
        assert!(entry.values("mail").is_empty());
        assert_eq!(entry.first("mail"), None);
    }

    #[test]
    fn test_referral_row() {
        assert!(DirectoryEntry::referral().is_referral());
        assert!(!DirectoryEntry::new("dc=example,dc=com").is_referral());
    }

    #[test]
    fn test_first_int() {
        let entry = DirectoryEntry::new("cn=g").with_attr("groupType", "-2147483646");
        assert_eq!(entry.first_int("groupType"), Some(-2147483646));
        assert_eq!(entry.first_int("gidNumber"), None);
    }
}
