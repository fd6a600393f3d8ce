//! EVM transaction commit engine
//!
//! Submits 0x coordinator and futures transactions into EVM-compatible
//! networks through a consistent-hash pool of JSON-RPC nodes, keeping a
//! per-account nonce cache consistent under concurrent commits.

pub mod committer;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod test_utils;
pub mod types;
pub mod uniquify;
pub mod wallet;

// Component modules with non-standard paths (directories with spaces)
#[path = "nonce manager/mod.rs"]
pub mod nonce_manager;

#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

// Re-export commonly used types
pub use committer::{CommitError, EthCommitter, EvmCommitter};
pub use nonce_manager::NonceCache;
pub use rpc_manager::{EthProvider, EvmProvider, RpcManagerError};
pub use uniquify::Uniquify;
