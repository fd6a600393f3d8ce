//! Error types for the transaction committer
//!
//! Submission failures arrive already classified as
//! [`RpcManagerError`] variants; the committer either recovers from them
//! (nonce conflicts, known transactions) or surfaces them through
//! [`CommitError::Rpc`].

use crate::nonce_manager::NonceError;
use crate::rpc_manager::RpcManagerError;
use crate::wallet::WalletError;
use ethers::types::Address;
use thiserror::Error;

/// Errors from signers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignerError {
    /// The key material could not be parsed
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The signer holds a key for a different account
    #[error("not authorized to sign for {requested:?} (signer is {signer:?})")]
    Unauthorized { signer: Address, requested: Address },

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Errors returned by commit operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    /// Signing failed locally or the node rejected the sender
    ///
    /// The allocated nonce has been rolled back.
    #[error("failed to sign transaction: {0}")]
    SigningFailed(String),

    /// The node still disagreed on the nonce after one resync
    #[error("nonce {nonce} mismatch: {source}")]
    NonceMismatch {
        nonce: u64,
        #[source]
        source: RpcManagerError,
    },

    /// Too many consecutive known-transaction replies
    #[error("gave up after {skips} known-transaction nonce skips")]
    KnownTransactionLimit { skips: u32 },

    /// The cached counter went negative; the allocation was rolled back
    #[error(transparent)]
    NegativeNonce(#[from] NonceError),

    /// Submission failed with a terminal RPC error
    #[error(transparent)]
    Rpc(#[from] RpcManagerError),

    /// The submission did not finish within the attempt timeout
    #[error("submission timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Committer could not be set up
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl From<SignerError> for CommitError {
    fn from(err: SignerError) -> Self {
        CommitError::SigningFailed(err.to_string())
    }
}

pub type CommitResult<T> = Result<T, CommitError>;
