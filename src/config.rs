use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::core_types::Network;
use crate::scanner::ScannerConfig;
use crate::settlement::SettlementConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Extra `EnvFilter` directives appended to the default filter
    #[serde(default)]
    pub log_directives: Vec<String>,
    /// PostgreSQL connection URL. Without it the ledger lives in memory.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub vault: VaultConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub scan_interval_ms: u64,
    pub settlement_interval_ms: u64,
    pub confirmation_interval_ms: u64,
    /// Concurrent per-wallet / per-withdrawal units of work
    pub max_concurrency: usize,
    pub scan_batch_limit: usize,
    pub adapter_timeout_ms: u64,
    pub ambiguity_window_secs: u64,
    pub stale_broadcast_secs: u64,
    pub history_page_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 15_000,
            settlement_interval_ms: 10_000,
            confirmation_interval_ms: 30_000,
            max_concurrency: 8,
            scan_batch_limit: 100,
            adapter_timeout_ms: 10_000,
            ambiguity_window_secs: 300,
            stale_broadcast_secs: 3600,
            history_page_size: 200,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 0 = trust the node's own finality flag
    #[serde(default)]
    pub required_confirmations: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VaultConfig {
    /// Environment variable holding the hex key-encryption key
    pub key_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_env: "CUSTODY_VAULT_KEK".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_networks() -> Vec<NetworkConfig> {
    Network::all()
        .into_iter()
        .map(|network| NetworkConfig {
            network,
            enabled: true,
            required_confirmations: 0,
        })
        .collect()
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn enabled_networks(&self) -> Vec<Network> {
        self.networks
            .iter()
            .filter(|n| n.enabled)
            .map(|n| n.network)
            .collect()
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        let required_confirmations: HashMap<Network, i32> = self
            .networks
            .iter()
            .filter(|n| n.required_confirmations > 0)
            .map(|n| (n.network, n.required_confirmations))
            .collect();
        ScannerConfig {
            batch_limit: self.scheduler.scan_batch_limit,
            adapter_timeout: Duration::from_millis(self.scheduler.adapter_timeout_ms),
            required_confirmations,
        }
    }

    pub fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            adapter_timeout: Duration::from_millis(self.scheduler.adapter_timeout_ms),
            batch_size: self.scheduler.scan_batch_limit,
            max_concurrency: self.scheduler.max_concurrency,
            ambiguity_window: Duration::from_secs(self.scheduler.ambiguity_window_secs),
            stale_broadcast: Duration::from_secs(self.scheduler.stale_broadcast_secs),
            history_page_size: self.scheduler.history_page_size,
        }
    }
}
