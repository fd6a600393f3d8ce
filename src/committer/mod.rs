//! Transaction committer
//!
//! Submits 0x coordinator transactions and futures payloads into Ethereum,
//! Matic and other EVM-compatible networks, keeping the sender's nonce
//! consistent across concurrent commits.

use crate::types::SignedZeroExTransaction;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};

pub mod errors;
pub mod eth_committer;
pub mod fees;
pub mod signer;

pub use errors::{CommitError, CommitResult, SignerError};
pub use eth_committer::{CommitterConfig, EthCommitter, KeySource, UnknownErrorPolicy};
pub use signer::{LocalKeySigner, TxSigner};

#[async_trait]
pub trait EvmCommitter: Send + Sync {
    /// Sending account
    fn from_address(&self) -> Address;
    fn coordinator_address(&self) -> Address;
    fn exchange_address(&self) -> Address;

    /// Execute a signed 0x transaction through the coordinator contract
    async fn commit_zero_ex_tx(
        &self,
        tx: &SignedZeroExTransaction,
        approval_signature: Bytes,
    ) -> CommitResult<H256>;

    /// Send raw calldata to the futures contract
    async fn commit_futures_tx(&self, payload: Bytes) -> CommitResult<H256>;
}
