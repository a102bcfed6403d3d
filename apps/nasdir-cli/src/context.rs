//! Configuration and dependencies shared by every command.

use std::path::{Path, PathBuf};

use nasdir_directory::{
    DirectoryConfig, DirectoryDeps, DirectoryService, IdentityCacheStore, PartitionFilter,
};
use tracing::debug;

use crate::error::{CliError, CliResult};

pub struct CliContext {
    pub config: DirectoryConfig,
    pub deps: DirectoryDeps,
}

impl CliContext {
    /// Load the configuration (from `config_path`, else `NASDIR_CONFIG`)
    /// and build the system dependencies.
    pub fn load(config_path: Option<&Path>, cache_dir: Option<PathBuf>) -> CliResult<Self> {
        let config = load_config(config_path, cache_dir)?;
        let deps = DirectoryDeps::system(&config)?;
        Ok(Self { config, deps })
    }

    pub fn new(config: DirectoryConfig, deps: DirectoryDeps) -> Self {
        Self { config, deps }
    }

    pub fn store(&self) -> CliResult<&IdentityCacheStore> {
        self.deps
            .store
            .as_ref()
            .ok_or_else(|| CliError::Config("no identity cache configured".to_string()))
    }

    /// Connect the configured backend with the given cache flags.
    pub async fn service(&self, config: &DirectoryConfig) -> CliResult<DirectoryService> {
        Ok(DirectoryService::from_config(config, &self.deps).await?)
    }

    /// Domains whose tiers the cache commands walk: every AD domain of the
    /// forest by NetBIOS name, or the single unnamed domain otherwise.
    pub async fn cache_domains(&self) -> CliResult<Vec<Option<String>>> {
        let service = self.service(&self.config).await?;
        let Some(ad) = service.as_active_directory() else {
            return Ok(vec![None]);
        };
        let mut domains: Vec<Option<String>> = ad
            .get_domains(&PartitionFilter::All)
            .await
            .into_iter()
            .map(|domain| Some(domain.netbios_name))
            .collect();
        if domains.is_empty() {
            domains.push(Some(ad.netbios_name().to_string()));
        }
        debug!(?domains, "Cache domains");
        Ok(domains)
    }
}

fn load_config(config_path: Option<&Path>, cache_dir: Option<PathBuf>) -> CliResult<DirectoryConfig> {
    let config = match config_path {
        Some(path) => DirectoryConfig::load(path),
        None => DirectoryConfig::from_env(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(match cache_dir {
        Some(dir) => config.with_cache_root(dir),
        None => config,
    })
}
