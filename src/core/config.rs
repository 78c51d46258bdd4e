//! Configuration parsing and validation.
//!
//! Hostplane configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the master's components: the access cache, the sync gate,
//! table-driven invalidation rules, telemetry, and filesystem paths.

use crate::control::cache::ResourceClass;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level Hostplane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Access cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Sync gate configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Extra table to resource-class dependency rules.
    #[serde(default)]
    pub invalidation: InvalidationConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathConfig,
}

/// Access cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached entry in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Largest plausible remaining lifetime of an entry in seconds.
    ///
    /// Entries whose expiry lies further in the future than this were written
    /// before a backwards clock jump and are treated as expired. Defaults to
    /// the TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,

    /// Interval between background sweeps of expired entries.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
            max_age_seconds: None,
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Clock-jump guard bound.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds.unwrap_or(self.ttl_seconds))
    }

    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Upper bound on the configured drain timeout.
pub const MAX_DRAIN_TIMEOUT_SECONDS: u64 = 86_400;

/// Sync gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Default bound on `await_drain` in seconds.
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_timeout_seconds: default_drain_timeout_seconds(),
        }
    }
}

impl SyncConfig {
    /// Default drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

/// Table-driven invalidation rules layered over the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Table id to resource-class tags, e.g. `domains = ["host-topology"]`.
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<String>>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Filesystem path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Static metadata snapshot (accounts, hosts, users, descriptors).
    #[serde(default = "default_metadata_path")]
    pub metadata: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            metadata: default_metadata_path(),
        }
    }
}

// Default value functions

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_drain_timeout_seconds() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metadata_path() -> String {
    "config/metadata.toml".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref metadata) = overrides.metadata {
            self.paths.metadata = metadata.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_cache()?;
        self.validate_sync()?;
        self.validate_invalidation()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_cache(&self) -> Result<()> {
        if self.cache.ttl_seconds == 0 {
            anyhow::bail!("cache.ttl_seconds must be > 0");
        }
        if let Some(max_age) = self.cache.max_age_seconds {
            if max_age < self.cache.ttl_seconds {
                anyhow::bail!(
                    "cache.max_age_seconds ({}) cannot be below cache.ttl_seconds ({})",
                    max_age,
                    self.cache.ttl_seconds
                );
            }
        }
        if self.cache.sweep_interval_seconds == 0 {
            anyhow::bail!("cache.sweep_interval_seconds must be > 0");
        }
        Ok(())
    }

    fn validate_sync(&self) -> Result<()> {
        if self.sync.drain_timeout_seconds == 0 {
            anyhow::bail!("sync.drain_timeout_seconds must be > 0");
        }
        if self.sync.drain_timeout_seconds > MAX_DRAIN_TIMEOUT_SECONDS {
            anyhow::bail!(
                "sync.drain_timeout_seconds must be at most {}",
                MAX_DRAIN_TIMEOUT_SECONDS
            );
        }
        Ok(())
    }

    fn validate_invalidation(&self) -> Result<()> {
        for (table, tags) in &self.invalidation.tables {
            if table.is_empty() {
                anyhow::bail!("invalidation.tables contains an empty table id");
            }
            for tag in tags {
                tag.parse::<ResourceClass>().with_context(|| {
                    format!("invalidation.tables.{} has invalid resource class", table)
                })?;
            }
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    /// Parsed extra invalidation rules.
    pub fn invalidation_rules(&self) -> Result<Vec<(String, Vec<ResourceClass>)>> {
        self.invalidation
            .tables
            .iter()
            .map(|(table, tags)| {
                let classes = tags
                    .iter()
                    .map(|t| t.parse::<ResourceClass>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("invalid resource class for table {}", table))?;
                Ok((table.clone(), classes))
            })
            .collect()
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override metadata snapshot path.
    pub metadata: Option<String>,
}
