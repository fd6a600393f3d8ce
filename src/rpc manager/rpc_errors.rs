use ethers::providers::{ProviderError, RpcError};
use thiserror::Error;

/// Comprehensive RPC Manager error types
///
/// Node responses are classified into these variants once, at the client
/// boundary, so callers branch on variants rather than on message text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcManagerError {
    /// Transport-level errors (network, connection, dial)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// RPC response errors that fit no other category
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Every node in the pool is down or the pool is empty
    #[error("no EVM node available")]
    NodeUnavailable,

    /// The pool has been closed
    #[error("EVM provider closed")]
    Closed,

    /// The requested object was not found
    #[error("the requested object not found")]
    NotFound,

    #[error("nonce is too low: {message}")]
    NonceTooLow { message: String },

    #[error("nonce is too high: {message}")]
    NonceTooHigh { message: String },

    /// The node rejected the nonce without saying which way it is off
    #[error("the tx doesn't have the correct nonce: {message}")]
    IncorrectNonce { message: String },

    /// The exact signed payload was already seen by the node
    #[error("known transaction: {message}")]
    KnownTransaction { message: String },

    /// Signature does not recover to an authorized sender
    #[error("invalid sender: {message}")]
    InvalidSender { message: String },

    /// EVM execution reverted; gas and nonce are consumed on chain
    #[error("VM Exception: {message}")]
    ExecutionReverted { message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RpcManagerError {
    /// Classify a node error message (and optional JSON-RPC code)
    pub fn from_response(endpoint: &str, code: Option<i64>, message: &str) -> Self {
        let message = message.to_string();
        let lower = message.to_lowercase();

        if lower.contains("invalid sender") {
            RpcManagerError::InvalidSender { message }
        } else if lower.contains("nonce is too low") || lower.contains("nonce too low") {
            RpcManagerError::NonceTooLow { message }
        } else if lower.contains("nonce is too high") || lower.contains("nonce too high") {
            RpcManagerError::NonceTooHigh { message }
        } else if lower.contains("the tx doesn't have the correct nonce") {
            RpcManagerError::IncorrectNonce { message }
        } else if lower.contains("known transaction") || lower.contains("already known") {
            RpcManagerError::KnownTransaction { message }
        } else if lower.contains("vm exception") || lower.contains("execution reverted") {
            RpcManagerError::ExecutionReverted { message }
        } else {
            RpcManagerError::RpcResponse {
                endpoint: endpoint.to_string(),
                message,
                code,
            }
        }
    }

    /// Create from an ethers provider error with context
    pub fn from_provider_error(err: ProviderError, endpoint: &str) -> Self {
        if let Some(resp) = err.as_error_response() {
            return Self::from_response(endpoint, Some(resp.code), &resp.message);
        }
        match err {
            ProviderError::HTTPError(e) => RpcManagerError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            },
            ProviderError::SerdeJson(e) => RpcManagerError::RpcResponse {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
                code: None,
            },
            other => Self::from_response(endpoint, None, &other.to_string()),
        }
    }

    /// Nonce conflicts are recovered by a single resync
    pub fn is_nonce_conflict(&self) -> bool {
        matches!(
            self,
            RpcManagerError::NonceTooLow { .. }
                | RpcManagerError::NonceTooHigh { .. }
                | RpcManagerError::IncorrectNonce { .. }
        )
    }

    /// Check if this error is retryable on another node
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcManagerError::Transport { .. }
                | RpcManagerError::Timeout { .. }
                | RpcManagerError::NodeUnavailable
        )
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcManagerError::Transport { endpoint, .. } => Some(endpoint),
            RpcManagerError::Timeout { endpoint, .. } => Some(endpoint),
            RpcManagerError::RpcResponse { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }
}

pub type RpcResult<T> = Result<T, RpcManagerError>;
