//! Identity cache maintenance commands

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use clap::{Args, Subcommand};
use nasdir_directory::cache::CacheTier;
use nasdir_directory::{
    cache_expire, cache_fill, CacheFlags, IdentityCacheStore, IdentityDirectory, LocalGroup,
    LocalUser,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::context::CliContext;
use crate::error::CliResult;
use crate::output::{group_line, user_line};

/// Identity cache commands
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Enumerate users and groups and write every cache tier
    Fill,
    /// Delete every cached entry, keeping the directory layout
    Expire,
    /// Enumerate users and groups from the cache
    Dump(DumpArgs),
    /// List the keys of every cache tier
    Keys,
    /// Print key=value for every entry of every cache tier
    Rawdump,
    /// Print selected entries (u=NAME, g=NAME, du=KEY, dg=KEY)
    Check(CheckArgs),
    /// Count the entries of every cache tier
    Count,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(required = true)]
    pub queries: Vec<CheckQuery>,
}

/// The four tiers of one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Users,
    Groups,
    DirectoryUsers,
    DirectoryGroups,
}

impl TierKind {
    pub const ALL: [TierKind; 4] = [
        TierKind::Users,
        TierKind::Groups,
        TierKind::DirectoryUsers,
        TierKind::DirectoryGroups,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            TierKind::Users => "u",
            TierKind::Groups => "g",
            TierKind::DirectoryUsers => "du",
            TierKind::DirectoryGroups => "dg",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Every entry as `(key, JSON value)`, ordered by key.
    fn entries(
        &self,
        store: &IdentityCacheStore,
        domain: Option<&str>,
    ) -> CliResult<Vec<(String, String)>> {
        match self {
            TierKind::Users => rendered(&store.users(domain)?),
            TierKind::Groups => rendered(&store.groups(domain)?),
            TierKind::DirectoryUsers => rendered(&store.directory_users(domain)?),
            TierKind::DirectoryGroups => rendered(&store.directory_groups(domain)?),
        }
    }

    fn value(
        &self,
        store: &IdentityCacheStore,
        domain: Option<&str>,
        key: &str,
    ) -> CliResult<Option<String>> {
        match self {
            TierKind::Users => rendered_value(&store.users(domain)?, key),
            TierKind::Groups => rendered_value(&store.groups(domain)?, key),
            TierKind::DirectoryUsers => rendered_value(&store.directory_users(domain)?, key),
            TierKind::DirectoryGroups => rendered_value(&store.directory_groups(domain)?, key),
        }
    }
}

fn rendered<V>(tier: &CacheTier<V>) -> CliResult<Vec<(String, String)>>
where
    V: Serialize + DeserializeOwned,
{
    tier.entries()
        .into_iter()
        .map(|entry| -> CliResult<(String, String)> {
            Ok((entry.key, serde_json::to_string(&entry.value)?))
        })
        .collect()
}

fn rendered_value<V>(tier: &CacheTier<V>, key: &str) -> CliResult<Option<String>>
where
    V: Serialize + DeserializeOwned,
{
    tier.get(key)
        .map(|value| serde_json::to_string(&value))
        .transpose()
        .map_err(Into::into)
}

/// One `check` argument: a tier prefix and the key to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckQuery {
    pub kind: TierKind,
    pub key: String,
}

impl FromStr for CheckQuery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, key) = s
            .split_once('=')
            .ok_or_else(|| format!("expected u=|g=|du=|dg=KEY, got '{s}'"))?;
        let kind = TierKind::from_prefix(prefix)
            .ok_or_else(|| format!("unknown cache tier '{prefix}'"))?;
        Ok(Self {
            kind,
            key: key.to_string(),
        })
    }
}

impl fmt::Display for CheckQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind.prefix(), self.key)
    }
}

/// Execute cache commands
pub async fn execute(args: CacheArgs, ctx: &CliContext) -> CliResult<()> {
    let mut out = io::stdout();

    match args.command {
        CacheCommands::Fill => {
            let report = cache_fill(&ctx.config, &ctx.deps).await?;
            writeln!(
                out,
                "Cached {} users and {} groups",
                report.users, report.groups
            )?;
        }
        CacheCommands::Expire => {
            let removed = cache_expire(&ctx.deps)?;
            writeln!(out, "Removed {} cache files", removed)?;
        }
        CacheCommands::Dump(dump) => execute_dump(dump, ctx, &mut out).await?,
        CacheCommands::Keys => {
            let domains = ctx.cache_domains().await?;
            write_keys(&mut out, ctx.store()?, &domains)?;
        }
        CacheCommands::Rawdump => {
            let domains = ctx.cache_domains().await?;
            write_rawdump(&mut out, ctx.store()?, &domains)?;
        }
        CacheCommands::Check(check) => {
            let domains = ctx.cache_domains().await?;
            let separator = ctx
                .config
                .active_directory
                .as_ref()
                .filter(|_| domains.iter().any(Option::is_some))
                .map(|settings| settings.separator);
            write_check(&mut out, ctx.store()?, &domains, separator, &check.queries)?;
        }
        CacheCommands::Count => {
            let domains = ctx.cache_domains().await?;
            write_count(&mut out, ctx.store()?, &domains)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Dump<'a> {
    users: &'a [LocalUser],
    groups: &'a [LocalGroup],
}

async fn execute_dump(args: DumpArgs, ctx: &CliContext, out: &mut impl Write) -> CliResult<()> {
    let config = ctx
        .config
        .clone()
        .with_cache_flags(
            CacheFlags::DB_INIT | CacheFlags::CACHE_READ_USER | CacheFlags::CACHE_READ_GROUP,
        );
    let service = ctx.service(&config).await?;

    let users = service.get_users().await.into_vec();
    let groups = service.get_groups().await.into_vec();
    info!(users = users.len(), groups = groups.len(), "Cache dump");

    if args.json {
        let dump = Dump {
            users: &users,
            groups: &groups,
        };
        writeln!(out, "{}", serde_json::to_string_pretty(&dump)?)?;
        return Ok(());
    }

    writeln!(out, "Users:")?;
    for user in &users {
        writeln!(out, "    {}", user_line(user))?;
    }
    writeln!(out)?;
    writeln!(out, "Groups:")?;
    for group in &groups {
        writeln!(out, "    {}", group_line(group))?;
    }
    Ok(())
}

fn write_domain_header(out: &mut impl Write, domain: Option<&str>) -> io::Result<()> {
    match domain {
        Some(domain) => writeln!(out, "w: {}", domain),
        None => Ok(()),
    }
}

pub fn write_keys(
    out: &mut impl Write,
    store: &IdentityCacheStore,
    domains: &[Option<String>],
) -> CliResult<()> {
    for domain in domains.iter().map(Option::as_deref) {
        write_domain_header(out, domain)?;
        for kind in TierKind::ALL {
            for (key, _) in kind.entries(store, domain)? {
                writeln!(out, "{} key: {}", kind.prefix(), key)?;
            }
        }
    }
    Ok(())
}

pub fn write_rawdump(
    out: &mut impl Write,
    store: &IdentityCacheStore,
    domains: &[Option<String>],
) -> CliResult<()> {
    for domain in domains.iter().map(Option::as_deref) {
        write_domain_header(out, domain)?;
        for kind in TierKind::ALL {
            for (key, value) in kind.entries(store, domain)? {
                writeln!(out, "{}: {}={}", kind.prefix(), key, value)?;
            }
        }
    }
    Ok(())
}

pub fn write_count(
    out: &mut impl Write,
    store: &IdentityCacheStore,
    domains: &[Option<String>],
) -> CliResult<()> {
    for domain in domains.iter().map(Option::as_deref) {
        if let Some(domain) = domain {
            writeln!(out, "w:  {}", domain)?;
        }
        writeln!(out, "u:  {}", store.users(domain)?.len())?;
        writeln!(out, "g:  {}", store.groups(domain)?.len())?;
        writeln!(out, "du: {}", store.directory_users(domain)?.len())?;
        writeln!(out, "dg: {}", store.directory_groups(domain)?.len())?;
        writeln!(out)?;
    }
    Ok(())
}

/// Print the entries named by `queries`.
///
/// With a `separator` (Active Directory), `u=` and `g=` keys must be
/// qualified with one of `domains` and are looked up in that domain only;
/// `du=` and `dg=` keys are looked up in every domain.
pub fn write_check(
    out: &mut impl Write,
    store: &IdentityCacheStore,
    domains: &[Option<String>],
    separator: Option<char>,
    queries: &[CheckQuery],
) -> CliResult<()> {
    for query in queries {
        let scopes: Vec<Option<&str>> = match (query.kind, separator) {
            (TierKind::Users | TierKind::Groups, Some(separator)) => {
                let Some((domain, _)) = query.key.split_once(separator) else {
                    continue;
                };
                if !domains.iter().any(|d| d.as_deref() == Some(domain)) {
                    continue;
                }
                vec![Some(domain)]
            }
            _ => domains.iter().map(Option::as_deref).collect(),
        };

        for domain in scopes {
            if let Some(value) = query.kind.value(store, domain, &query.key)? {
                writeln!(out, "{}: {}", query.key, value)?;
            }
        }
    }
    Ok(())
}
