//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` and can be set via the
//! `-f` flag or `BRANCHCTL_CONFIG`.
//!
//! Sources are merged in order (later overrides earlier):
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - `BRANCHCTL_` prefixed, `__` for nesting
//!    (e.g. `BRANCHCTL_POOLS__GLOBAL_BUDGET=200`)
//! 3. **DATABASE_URL** - overrides `database.url` if set

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;
use crate::pool::PoolConfig;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "BRANCHCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Convenience override for `database.url`, fed by `DATABASE_URL`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    pub branching: BranchingConfig,
    pub pools: PoolsConfig,
    pub provisioning: ProvisioningConfig,
    pub sweep: SweepConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3100,
            database_url: None,
            database: DatabaseConfig::default(),
            branching: BranchingConfig::default(),
            pools: PoolsConfig::default(),
            provisioning: ProvisioningConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

/// Metadata store and branch database cluster settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Storage backend: `postgres` for production, `memory` for local
    /// development and tests (no durability, no physical provisioning).
    pub storage: StorageKind,
    /// Connection string for the metadata database
    pub url: String,
    /// Connection string used for provisioning (CREATE/DROP DATABASE);
    /// defaults to `url`. Must have CREATEDB privilege.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,
    /// Prefix for physical branch database names
    pub database_prefix: String,
    /// Pool size for the metadata database itself
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Postgres,
            url: "postgresql://localhost/branchctl".to_string(),
            admin_url: None,
            database_prefix: "branch_".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn admin_url(&self) -> &str {
        self.admin_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Postgres,
    Memory,
}

/// Branch lifecycle policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BranchingConfig {
    /// Master switch; when false, branch creation returns 503
    pub enabled: bool,
    /// Non-main branches any single user may have at once
    pub max_branches_per_user: i64,
    /// Non-main branches the project may have at once
    pub max_branches_total: i64,
    /// TTL applied to preview branches that don't request one, e.g. "72h"
    #[serde(with = "humantime_serde")]
    pub default_preview_ttl: Option<Duration>,
}

impl Default for BranchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_branches_per_user: 10,
            max_branches_total: 50,
            default_preview_ttl: Some(Duration::from_secs(72 * 3600)),
        }
    }
}

/// Per-branch pool sizing and the global connection budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolsConfig {
    pub max_per_branch: usize,
    pub global_budget: usize,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            max_per_branch: 10,
            global_budget: 100,
            acquire_timeout: Duration::from_secs(5),
            idle_ttl: Duration::from_secs(300),
        }
    }
}

impl From<&PoolsConfig> for PoolConfig {
    fn from(config: &PoolsConfig) -> Self {
        PoolConfig {
            max_per_branch: config.max_per_branch,
            global_budget: config.global_budget,
            acquire_timeout: config.acquire_timeout,
            idle_ttl: config.idle_ttl,
        }
    }
}

/// Physical provisioning bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Upper bound on one provision/reset/teardown operation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

/// Background sweep intervals.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    /// How often overdue branches are expired
    #[serde(with = "humantime_serde")]
    pub expiration_interval: Duration,
    /// How often idle pooled connections are reaped
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            expiration_interval: Duration::from_secs(60),
            idle_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;
        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("BRANCHCTL_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.pools.max_per_branch == 0 {
            return Err(Error::validation("pools.max_per_branch must be at least 1"));
        }
        if self.pools.global_budget < self.pools.max_per_branch {
            return Err(Error::validation(
                "pools.global_budget must be at least pools.max_per_branch",
            ));
        }
        if self.branching.max_branches_per_user > self.branching.max_branches_total {
            return Err(Error::validation(
                "branching.max_branches_per_user cannot exceed branching.max_branches_total",
            ));
        }
        if self.database.storage == StorageKind::Postgres && self.database.url.is_empty() {
            return Err(Error::validation("database.url is required for postgres storage"));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_budget_must_cover_one_pool() {
        let mut config = Config::default();
        config.pools.global_budget = 5;
        config.pools.max_per_branch = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip_with_humantime() {
        let yaml = r#"
port: 4000
branching:
  max_branches_per_user: 3
  default_preview_ttl: 48h
pools:
  acquire_timeout: 250ms
"#;
        let config: Config = figment::Figment::new()
            .merge(figment::providers::Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.branching.max_branches_per_user, 3);
        assert_eq!(config.branching.default_preview_ttl, Some(Duration::from_secs(48 * 3600)));
        assert_eq!(config.pools.acquire_timeout, Duration::from_millis(250));
    }
}
