//! nasdir - directory identity cache tool
//!
//! - Fill, expire and inspect the identity cache
//! - Resolve one user or group through the configured directory
//! - List the domains of an Active Directory forest

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use nasdir_cli::commands;
use nasdir_cli::context::CliContext;
use nasdir_cli::error::CliResult;
use nasdir_cli::logging::init_logging;

/// Directory identity cache tool
#[derive(Parser)]
#[command(name = "nasdir")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory configuration file (defaults to $NASDIR_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root of the identity cache tree
    #[arg(long, global = true, env = "NASDIR_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Maintain the identity cache
    Cache(commands::cache::CacheArgs),

    /// Resolve a user by name or uid
    User(commands::lookup::LookupArgs),

    /// Resolve a group by name or gid
    Group(commands::lookup::LookupArgs),

    /// List Active Directory domains
    Domains(commands::domains::DomainsArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let ctx = CliContext::load(cli.config.as_deref(), cli.cache_dir)?;

    match cli.command {
        Commands::Cache(args) => commands::cache::execute(args, &ctx).await,
        Commands::User(args) => commands::lookup::execute_user(args, &ctx).await,
        Commands::Group(args) => commands::lookup::execute_group(args, &ctx).await,
        Commands::Domains(args) => commands::domains::execute(args, &ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use nasdir_cli::commands::cache::{CacheCommands, TierKind};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cache_check() {
        let cli = Cli::try_parse_from([
            "nasdir",
            "--cache-dir",
            "/tmp/cache",
            "cache",
            "check",
            "u=ACME\\jdoe",
            "dg=cn=staff",
        ])
        .unwrap();
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/cache")));
        let Commands::Cache(args) = cli.command else {
            panic!("expected cache command");
        };
        let CacheCommands::Check(check) = args.command else {
            panic!("expected check");
        };
        assert_eq!(check.queries.len(), 2);
        assert_eq!(check.queries[1].kind, TierKind::DirectoryGroups);
    }

    #[test]
    fn test_parse_rejects_bad_check_query() {
        let result = Cli::try_parse_from(["nasdir", "cache", "check", "x=1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["nasdir", "user", "jdoe", "--json", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        let Commands::User(args) = cli.command else {
            panic!("expected user command");
        };
        assert_eq!(args.name, "jdoe");
        assert!(args.json);
    }
}
