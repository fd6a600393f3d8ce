//! Configuration module for the EVM committer
//!
//! This module handles configuration loading from TOML files, `.env` files
//! and environment variables, and provides structured configuration types.

use crate::committer::{CommitterConfig, KeySource};
use crate::rpc_manager::rpc_config::parse_node_list;
use crate::rpc_manager::{ConfigError, RpcManagerConfig};
use crate::types::ContractSet;
use ethers::types::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// EVM node pool
    pub rpc: RpcManagerConfig,

    /// Sending account and submission settings
    #[serde(default)]
    pub committer: CommitterSection,

    /// Deployed contract addresses
    #[serde(default)]
    pub contracts: ContractSet,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

fn secret<'de, D>(deserializer: D) -> Result<Option<Zeroizing<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(Zeroizing::new))
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CommitterSection {
    /// Sending account when the key comes from the keystore
    #[serde(default)]
    pub from_address: Option<Address>,

    #[serde(default, deserialize_with = "secret", skip_serializing)]
    pub from_passphrase: Option<Zeroizing<String>>,

    /// Hex private key; takes precedence over the keystore
    #[serde(default, deserialize_with = "secret", skip_serializing)]
    pub from_private_key: Option<Zeroizing<String>>,

    /// Directory holding encrypted JSON keystore files
    #[serde(default)]
    pub keystore_dir: Option<PathBuf>,

    #[serde(flatten)]
    pub settings: CommitterConfig,
}

impl std::fmt::Debug for CommitterSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitterSection")
            .field("from_address", &self.from_address)
            .field("from_passphrase", &self.from_passphrase.as_ref().map(|_| "***"))
            .field("from_private_key", &self.from_private_key.as_ref().map(|_| "***"))
            .field("keystore_dir", &self.keystore_dir)
            .field("settings", &self.settings)
            .finish()
    }
}

impl CommitterSection {
    /// Pick the key source: a private key wins over the keystore
    pub fn key_source(&self) -> Result<KeySource, ConfigError> {
        if let Some(key) = &self.from_private_key {
            return Ok(KeySource::PrivateKey(key.clone()));
        }

        let address = self.from_address.ok_or_else(|| {
            ConfigError::ValidationError(
                "committer.from_address or committer.from_private_key is required".to_string(),
            )
        })?;
        let dir = self.keystore_dir.clone().ok_or_else(|| {
            ConfigError::ValidationError(
                "committer.keystore_dir is required when signing from the keystore".to_string(),
            )
        })?;

        Ok(KeySource::KeyStore {
            dir,
            address,
            passphrase: self
                .from_passphrase
                .clone()
                .unwrap_or_else(|| Zeroizing::new(String::new())),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Emit JSON log lines instead of text
    #[serde(default)]
    pub json_logs: bool,

    /// Collect Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            enable_metrics: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the environment alone
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EVM_*` overrides read through `lookup`
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(nodes) = lookup("EVM_RPC_NODES") {
            self.rpc.nodes = parse_node_list(&nodes);
        }
        if let Some(address) = lookup("EVM_FROM_ADDRESS") {
            let address = address.trim().parse::<Address>().map_err(|_| {
                ConfigError::ParseError(format!("EVM_FROM_ADDRESS is not an address: {}", address))
            })?;
            self.committer.from_address = Some(address);
        }
        if let Some(passphrase) = lookup("EVM_FROM_PASSPHRASE") {
            self.committer.from_passphrase = Some(Zeroizing::new(passphrase));
        }
        if let Some(key) = lookup("EVM_FROM_PK").filter(|k| !k.is_empty()) {
            self.committer.from_private_key = Some(Zeroizing::new(key));
        }
        if let Some(dir) = lookup("EVM_KEYSTORE_DIR") {
            self.committer.keystore_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc.validate()?;
        if self.committer.settings.gas_limit == 0 {
            return Err(ConfigError::ValidationError(
                "committer.gas_limit must be > 0".to_string(),
            ));
        }
        if self.committer.settings.submit_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "committer.submit_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcManagerConfig::from_urls(&["http://localhost:8545".to_string()]),
            committer: CommitterSection::default(),
            contracts: ContractSet::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}
