//! Forest partitions and domain descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::connection::DirectoryEntry;
use crate::filter::escape_value;

/// One domain of the forest, as described by its crossRef object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDescriptor {
    pub netbios_name: String,
    /// DNS name of the domain, e.g. `corp.example.com`.
    pub dns_root: String,
    /// Domain naming context, e.g. `DC=corp,DC=example,DC=com`.
    pub naming_context: String,
    /// First value of every attribute of the crossRef entry.
    pub attributes: BTreeMap<String, String>,
}

impl DomainDescriptor {
    /// Build from a crossRef entry. Entries lacking the NetBIOS name, DNS
    /// root or naming context do not describe a usable domain.
    pub fn from_entry(entry: &DirectoryEntry) -> Option<Self> {
        let netbios_name = entry.first("nETBIOSName")?.to_string();
        let dns_root = entry.first("dnsRoot")?.to_string();
        let naming_context = entry.first("nCName")?.to_string();
        let attributes = entry
            .attrs
            .iter()
            .filter_map(|(name, values)| Some((name.clone(), values.first()?.clone())))
            .collect();
        Some(Self {
            netbios_name,
            dns_root,
            naming_context,
            attributes,
        })
    }

    /// Descriptor assembled from local settings when the forest cannot be
    /// queried.
    pub fn local(
        netbios_name: impl Into<String>,
        dns_root: impl Into<String>,
        naming_context: impl Into<String>,
    ) -> Self {
        Self {
            netbios_name: netbios_name.into(),
            dns_root: dns_root.into(),
            naming_context: naming_context.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Selects partitions (crossRef entries) by one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PartitionFilter {
    #[default]
    All,
    NetbiosName(String),
    Name(String),
    Cn(String),
    DistinguishedName(String),
    NcName(String),
}

impl PartitionFilter {
    fn term(&self) -> Option<(&'static str, &str)> {
        match self {
            PartitionFilter::All => None,
            PartitionFilter::NetbiosName(v) => Some(("nETBIOSName", v)),
            PartitionFilter::Name(v) => Some(("name", v)),
            PartitionFilter::Cn(v) => Some(("cn", v)),
            PartitionFilter::DistinguishedName(v) => Some(("distinguishedName", v)),
            PartitionFilter::NcName(v) => Some(("nCName", v)),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PartitionFilter::All)
    }

    /// Filter for a search of `CN=Partitions`.
    pub fn partition_filter(&self) -> String {
        match self.term() {
            Some((attr, value)) => format!("({}={})", attr, escape_value(value)),
            None => "(cn=*)".to_string(),
        }
    }

    /// crossRef filter for the configuration partition.
    pub fn crossref_filter(&self) -> String {
        match self.term() {
            Some((attr, value)) => format!(
                "(&(objectcategory=crossref)({}={}))",
                attr,
                escape_value(value)
            ),
            None => "(objectcategory=crossref)".to_string(),
        }
    }
}

/// crossRef filter for the domain whose naming context is `dn`.
pub fn crossref_for_naming_context(dn: &str) -> String {
    PartitionFilter::NcName(dn.to_string()).crossref_filter()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crossref() -> DirectoryEntry {
        DirectoryEntry::new("CN=ACME,CN=Partitions,CN=Configuration,DC=acme,DC=com")
            .with_attr("nETBIOSName", "ACME")
            .with_attr("dnsRoot", "acme.com")
            .with_attr("nCName", "DC=acme,DC=com")
            .with_attr("cn", "ACME")
    }

    #[test]
    fn test_descriptor_from_crossref() {
        let desc = DomainDescriptor::from_entry(&crossref()).unwrap();
        assert_eq!(desc.netbios_name, "ACME");
        assert_eq!(desc.dns_root, "acme.com");
        assert_eq!(desc.naming_context, "DC=acme,DC=com");
        assert_eq!(desc.attributes.get("cn").map(String::as_str), Some("ACME"));
    }

    #[test]
    fn test_descriptor_requires_netbios_name() {
        let entry = DirectoryEntry::new("CN=x").with_attr("dnsRoot", "x.com");
        assert!(DomainDescriptor::from_entry(&entry).is_none());
    }

    #[test]
    fn test_partition_filters() {
        assert_eq!(PartitionFilter::All.partition_filter(), "(cn=*)");
        assert_eq!(
            PartitionFilter::NetbiosName("ACME".into()).partition_filter(),
            "(nETBIOSName=ACME)"
        );
        assert_eq!(
            crossref_for_naming_context("DC=acme,DC=com"),
            "(&(objectcategory=crossref)(nCName=DC=acme,DC=com))"
        );
        assert!(PartitionFilter::default().is_all());
    }
}
