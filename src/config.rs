// src/config.rs

//! Manages server configuration: loading from TOML, defaults, validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for access control.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AclConfig {
    /// When false, every ACL check resolves to the universal ACL and
    /// requests carry the distinct acls-disabled identity.
    #[serde(default)]
    pub enabled: bool,
    /// Bound on the compiled-policy cache.
    #[serde(default = "default_policy_cache_size")]
    pub policy_cache_size: usize,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy_cache_size: default_policy_cache_size(),
        }
    }
}

fn default_policy_cache_size() -> usize {
    512
}

/// Configuration for TLS identity verification. Termination happens outside
/// the core; only the verification flag and peer names reach it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    /// When true, server-only and client-only authentication require the
    /// region's certificate common names.
    #[serde(default)]
    pub verify: bool,
}

/// Configuration for the volume claim watcher and its batcher.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VolumeWatcherConfig {
    /// Timer interval between claim batch flushes.
    #[serde(default = "default_batch_duration", with = "humantime_serde")]
    pub batch_duration: Duration,
    /// How long an idle per-volume worker lingers before stopping.
    #[serde(default = "default_quiescent_timeout", with = "humantime_serde")]
    pub quiescent_timeout: Duration,
}

impl Default for VolumeWatcherConfig {
    fn default() -> Self {
        Self {
            batch_duration: default_batch_duration(),
            quiescent_timeout: default_quiescent_timeout(),
        }
    }
}

fn default_batch_duration() -> Duration {
    Duration::from_millis(250)
}

fn default_quiescent_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Configuration for snapshot persistence.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Persist a snapshot on graceful shutdown.
    #[serde(default = "default_snapshot_on_shutdown")]
    pub snapshot_on_shutdown: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_on_shutdown: default_snapshot_on_shutdown(),
        }
    }
}

fn default_data_dir() -> String {
    "drover_data".to_string()
}

fn default_snapshot_on_shutdown() -> bool {
    true
}

/// The server's configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Region name, propagated into auth and RPC routing.
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// The process-local shared secret for internal leader RPCs. Generated
    /// at startup when unset.
    #[serde(default)]
    pub leader_acl: Option<String>,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub volume_watcher: VolumeWatcherConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            log_level: default_log_level(),
            leader_acl: None,
            acl: AclConfig::default(),
            tls: TlsConfig::default(),
            volume_watcher: VolumeWatcherConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

fn default_region() -> String {
    "global".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads configuration from a TOML file layered over the defaults.
    pub fn from_file(path: &str) -> Result<Config> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let cfg: Config = settings
            .try_deserialize()
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.region.is_empty(), "region must not be empty");
        anyhow::ensure!(
            self.volume_watcher.batch_duration >= Duration::from_millis(10),
            "volume_watcher.batch_duration must be at least 10ms"
        );
        Ok(())
    }
}
