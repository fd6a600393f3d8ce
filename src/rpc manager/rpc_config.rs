use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

fn default_failure_threshold() -> u32 {
    3
}

fn default_revival_delay_secs() -> u64 {
    300
}

fn default_dial_backoff_ms() -> u64 {
    3000
}

fn default_gas_limit() -> u64 {
    6_000_000
}

fn default_log_poll_interval_ms() -> u64 {
    2000
}

fn default_chain_id() -> u64 {
    888
}

/// RPC node pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcManagerConfig {
    /// EVM node addresses (`http(s)://` or `ws(s)://`)
    pub nodes: Vec<String>,

    /// Consecutive dial failures before a node leaves the ring
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cool-down before a removed node is added back
    #[serde(default = "default_revival_delay_secs")]
    pub revival_delay_secs: u64,

    /// Pause between dial attempts after a failure
    #[serde(default = "default_dial_backoff_ms")]
    pub dial_backoff_ms: u64,

    /// Gas ceiling advertised by the provider
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Poll interval of log subscriptions
    #[serde(default = "default_log_poll_interval_ms")]
    pub log_poll_interval_ms: u64,

    /// Chain id used until a node reports the real one
    #[serde(default = "default_chain_id")]
    pub fallback_chain_id: u64,
}

impl RpcManagerConfig {
    /// Create a default configuration from a list of URLs
    pub fn from_urls(urls: &[String]) -> Self {
        Self {
            nodes: urls.to_vec(),
            failure_threshold: default_failure_threshold(),
            revival_delay_secs: default_revival_delay_secs(),
            dial_backoff_ms: default_dial_backoff_ms(),
            gas_limit: default_gas_limit(),
            log_poll_interval_ms: default_log_poll_interval_ms(),
            fallback_chain_id: default_chain_id(),
        }
    }

    /// Load node list from environment variables
    /// Expected format: EVM_RPC_NODES=url1,url2,url3
    pub fn from_env() -> Result<Self, ConfigError> {
        let nodes_str = std::env::var("EVM_RPC_NODES")
            .map_err(|_| ConfigError::MissingEnvVar("EVM_RPC_NODES".to_string()))?;

        let config = Self::from_urls(&parse_node_list(&nodes_str));
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one EVM RPC node must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate RPC node: {}",
                    node
                )));
            }
            if !["http://", "https://", "ws://", "wss://"]
                .iter()
                .any(|scheme| node.starts_with(scheme))
            {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid node address: {}",
                    node
                )));
            }
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be > 0".to_string(),
            ));
        }

        if self.log_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "log_poll_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn revival_delay(&self) -> Duration {
        Duration::from_secs(self.revival_delay_secs)
    }

    pub fn dial_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_backoff_ms)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }
}

/// Split a comma separated node list
pub fn parse_node_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Configuration-related errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}
