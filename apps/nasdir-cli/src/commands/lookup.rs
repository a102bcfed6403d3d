//! Single user and group resolution

use std::io::{self, Write};

use clap::Args;
use nasdir_directory::{resolve_group, resolve_user, DirectoryService};

use crate::context::CliContext;
use crate::error::{CliError, CliResult};
use crate::output::{group_line, user_line};

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Account name (DOMAIN\name for Active Directory) or numeric id
    pub name: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

async fn enabled_service(ctx: &CliContext) -> CliResult<DirectoryService> {
    let service = ctx.service(&ctx.config).await?;
    if !service.is_enabled() {
        return Err(CliError::ServiceDisabled);
    }
    Ok(service)
}

pub async fn execute_user(args: LookupArgs, ctx: &CliContext) -> CliResult<()> {
    let service = enabled_service(ctx).await?;
    let user = resolve_user(&service, Some(&args.name))
        .await?
        .ok_or_else(|| CliError::NotFound(format!("user '{}'", args.name)))?;

    let mut out = io::stdout();
    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&user)?)?;
    } else {
        writeln!(out, "{}", user_line(&user))?;
    }
    Ok(())
}

pub async fn execute_group(args: LookupArgs, ctx: &CliContext) -> CliResult<()> {
    let service = enabled_service(ctx).await?;
    let group = resolve_group(&service, Some(&args.name))
        .await?
        .ok_or_else(|| CliError::NotFound(format!("group '{}'", args.name)))?;

    let mut out = io::stdout();
    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&group)?)?;
    } else {
        writeln!(out, "{}", group_line(&group))?;
    }
    Ok(())
}
