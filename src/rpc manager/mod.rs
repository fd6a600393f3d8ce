//! RPC Manager Module
//!
//! Pool of EVM JSON-RPC nodes behind a consistent-hash ring, with failure
//! tracking, delayed revival and close-aware cancellation.

use crate::types::{BlockHeader, TxInfo, TxReceipt};
use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Filter, Log, H256, U256,
};
use std::sync::Arc;

// Submodules
pub mod rpc_client;
pub mod rpc_config;
pub mod rpc_errors;
pub mod rpc_pool;
pub mod rpc_ring;

// Re-exports for convenience
pub use rpc_client::{EthersClient, EthersDialer};
pub use rpc_config::{ConfigError, RpcManagerConfig};
pub use rpc_errors::{RpcManagerError, RpcResult};
pub use rpc_pool::{EthProvider, LogSubscription};
pub use rpc_ring::HashRing;

/// JSON-RPC surface of a single EVM node
///
/// Implementations classify node errors into [`RpcManagerError`] variants.
/// `block: None` means the latest block.
#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug {
    /// Address this client is connected to
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> RpcResult<u64>;
    async fn block_number(&self) -> RpcResult<u64>;
    async fn balance(&self, account: Address, block: Option<BlockNumber>) -> RpcResult<U256>;
    async fn pending_nonce(&self, account: Address) -> RpcResult<u64>;
    async fn code_at(&self, account: Address, block: Option<BlockNumber>) -> RpcResult<Bytes>;
    async fn call(&self, tx: &TypedTransaction, block: Option<BlockNumber>) -> RpcResult<Bytes>;
    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256>;
    async fn gas_price(&self) -> RpcResult<U256>;
    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256>;
    async fn transaction_by_hash(&self, hash: H256) -> RpcResult<Option<TxInfo>>;
    async fn transaction_receipt(&self, hash: H256) -> RpcResult<Option<TxReceipt>>;
    async fn block_header(&self, block: Option<BlockNumber>) -> RpcResult<Option<BlockHeader>>;
    async fn logs(&self, filter: &Filter) -> RpcResult<Vec<Log>>;
}

/// Opens connections to node addresses
#[async_trait]
pub trait NodeDialer: Send + Sync {
    async fn dial(&self, addr: &str) -> RpcResult<Arc<dyn ChainClient>>;
}

/// Chain access as seen by the committer and other callers
///
/// Lookups that find nothing return [`RpcManagerError::NotFound`].
#[async_trait]
pub trait EvmProvider: Send + Sync {
    fn chain_id(&self) -> u64;
    fn gas_limit(&self) -> u64;
    /// Nodes currently in the active ring
    fn nodes(&self) -> Vec<String>;

    async fn balance(&self, account: Address) -> RpcResult<U256>;
    async fn balance_at(&self, account: Address, block: u64) -> RpcResult<U256>;
    async fn pending_nonce(&self, account: Address) -> RpcResult<u64>;
    async fn pending_code(&self, account: Address) -> RpcResult<Bytes>;
    async fn code_at(&self, account: Address, block: Option<u64>) -> RpcResult<Bytes>;
    async fn call(&self, tx: &TypedTransaction, block: Option<u64>) -> RpcResult<Bytes>;
    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256>;
    async fn gas_price(&self) -> RpcResult<U256>;
    async fn block_number(&self) -> RpcResult<u64>;
    async fn transaction_by_hash(&self, hash: H256) -> RpcResult<TxInfo>;
    async fn transaction_receipt(&self, hash: H256) -> RpcResult<TxReceipt>;
    async fn block_header(&self, block: Option<u64>) -> RpcResult<BlockHeader>;
    async fn filter_logs(&self, filter: &Filter) -> RpcResult<Vec<Log>>;
    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256>;

    /// Cancels in-flight calls and waits for background tasks
    async fn close(&self);
}

pub(crate) fn block_arg(block: Option<u64>) -> Option<BlockNumber> {
    block.map(|n| BlockNumber::Number(n.into()))
}
