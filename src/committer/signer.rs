//! Transaction signers
//!
//! The committer signs through [`TxSigner`], so keys may live in process
//! memory, in an unlocked keystore entry, or behind a remote service.

use super::errors::SignerError;
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Signature};

/// Async signer for EVM transactions
#[async_trait]
pub trait TxSigner: Send + Sync + std::fmt::Debug {
    /// Account whose transactions this signer can sign
    fn address(&self) -> Address;

    /// Sign `tx` on behalf of `from`
    ///
    /// The chain id is taken from the transaction.
    async fn sign(&self, from: Address, tx: &TypedTransaction) -> Result<Signature, SignerError>;
}

/// Signer backed by an in-memory secp256k1 key
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    wallet: LocalWallet,
}

impl LocalKeySigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Parse a hex private key, with or without the `0x` prefix
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { wallet })
    }
}

#[async_trait]
impl TxSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, from: Address, tx: &TypedTransaction) -> Result<Signature, SignerError> {
        if from != self.wallet.address() {
            return Err(SignerError::Unauthorized {
                signer: self.wallet.address(),
                requested: from,
            });
        }
        self.wallet
            .sign_transaction_sync(tx)
            .map_err(|e| SignerError::Signing(e.to_string()))
    }
}
