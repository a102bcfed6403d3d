//! Active Directory forest listing

use std::io::{self, Write};

use clap::Args;
use nasdir_directory::{DomainDescriptor, PartitionFilter};

use crate::context::CliContext;
use crate::error::{CliError, CliResult};

#[derive(Args, Debug)]
pub struct DomainsArgs {
    /// Only the domain with this NetBIOS name
    #[arg(long)]
    pub netbios_name: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: DomainsArgs, ctx: &CliContext) -> CliResult<()> {
    let service = ctx.service(&ctx.config).await?;
    let ad = service.as_active_directory().ok_or_else(|| {
        CliError::Validation("domains are only available with Active Directory".to_string())
    })?;

    let filter = match args.netbios_name {
        Some(name) => PartitionFilter::NetbiosName(name),
        None => PartitionFilter::All,
    };
    let domains = ad.get_domains(&filter).await;

    let mut out = io::stdout();
    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&domains)?)?;
    } else {
        write_table(&mut out, &domains)?;
    }
    Ok(())
}

fn write_table(out: &mut impl Write, domains: &[DomainDescriptor]) -> io::Result<()> {
    if domains.is_empty() {
        return writeln!(out, "No domains found.");
    }
    writeln!(
        out,
        "{:<16} | {:<24} | Naming context",
        "NetBIOS", "DNS root"
    )?;
    writeln!(out, "{}", "-".repeat(72))?;
    for domain in domains {
        writeln!(
            out,
            "{:<16} | {:<24} | {}",
            domain.netbios_name, domain.dns_root, domain.naming_context
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_table() {
        let domains = vec![
            DomainDescriptor::local("ACME", "acme.com", "DC=acme,DC=com"),
            DomainDescriptor::local("EMEA", "emea.acme.com", "DC=emea,DC=acme,DC=com"),
        ];
        let mut buf = Vec::new();
        write_table(&mut buf, &domains).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("ACME "));
        assert!(lines[3].ends_with("| DC=emea,DC=acme,DC=com"));
    }

    #[test]
    fn test_write_table_empty() {
        let mut buf = Vec::new();
        write_table(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "No domains found.\n");
    }
}
