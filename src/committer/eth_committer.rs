//! Transaction committer for EVM-compatible networks
//!
//! Each commit runs under the sender's nonce lock: allocate a nonce, sign,
//! submit, and on failure decide between rolling the nonce back, resyncing
//! it from the chain once, skipping ahead, or giving up.

use super::errors::{CommitError, CommitResult};
use super::fees::{execute_transaction_calldata, protocol_fee, PROTOCOL_FEE_MULTIPLIER};
use super::signer::{LocalKeySigner, TxSigner};
use super::EvmCommitter;
use crate::metrics::{FuncTimer, Tags, Telemetry};
use crate::nonce_manager::{NonceCache, NonceError, SyncOutcome};
use crate::rpc_manager::{EvmProvider, RpcManagerError};
use crate::types::{ContractSet, SignedZeroExTransaction};
use crate::wallet::KeyStore;
use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, H256, U256,
};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use zeroize::Zeroizing;

const MODULE: &str = "eth_committer";

fn default_gas_limit() -> u64 {
    6_000_000
}

fn default_futures_gas_price() -> u64 {
    1_000_000_000
}

fn default_submit_timeout_secs() -> u64 {
    20
}

fn default_protocol_fee_multiplier() -> u64 {
    PROTOCOL_FEE_MULTIPLIER
}

fn default_max_known_tx_skips() -> u32 {
    16
}

/// Submission settings of the committer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitterConfig {
    /// Gas ceiling of every submitted transaction
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Gas price of futures transactions, in wei
    #[serde(default = "default_futures_gas_price")]
    pub futures_gas_price: u64,

    /// Per-attempt submission timeout
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    #[serde(default = "default_protocol_fee_multiplier")]
    pub protocol_fee_multiplier: u64,

    /// Consecutive known-transaction replies tolerated per commit
    #[serde(default = "default_max_known_tx_skips")]
    pub max_known_tx_skips: u32,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            futures_gas_price: default_futures_gas_price(),
            submit_timeout_secs: default_submit_timeout_secs(),
            protocol_fee_multiplier: default_protocol_fee_multiplier(),
            max_known_tx_skips: default_max_known_tx_skips(),
        }
    }
}

impl CommitterConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

/// Where the sending key comes from
#[derive(Clone)]
pub enum KeySource {
    /// Hex private key held in memory; the sender is the key's address
    PrivateKey(Zeroizing<String>),
    /// Encrypted keystore entry unlocked with a passphrase
    KeyStore {
        dir: PathBuf,
        address: Address,
        passphrase: Zeroizing<String>,
    },
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::PrivateKey(_) => f.write_str("PrivateKey(..)"),
            KeySource::KeyStore { dir, address, .. } => f
                .debug_struct("KeyStore")
                .field("dir", dir)
                .field("address", address)
                .finish_non_exhaustive(),
        }
    }
}

impl KeySource {
    /// Resolve the key into a signer
    pub async fn into_signer(self) -> CommitResult<Arc<dyn TxSigner>> {
        match self {
            KeySource::PrivateKey(key) => {
                let signer = LocalKeySigner::from_hex(&key).map_err(|e| {
                    CommitError::Configuration(format!(
                        "private key provided, but failed to parse: {}",
                        e
                    ))
                })?;
                info!(from_address = ?signer.address(), "using EVM committer with private key");
                Ok(Arc::new(signer))
            }
            KeySource::KeyStore {
                dir,
                address,
                passphrase,
            } => {
                let keystore = KeyStore::new([&dir])?;
                let signer = keystore.signer(address, &passphrase).await.map_err(|e| {
                    CommitError::Configuration(format!(
                        "failed to decode Ethereum wallet {:?} using provided passphrase: {}",
                        address, e
                    ))
                })?;
                info!(from_address = ?address, "using EVM committer with key from keystore");
                Ok(Arc::new(signer))
            }
        }
    }
}

/// What to do with the allocated nonce when submission fails with an
/// error the committer does not recognize
///
/// The two commit paths disagree here and the difference is kept as is.
/// The zero-ex path assumes the coordinator call may still have consumed
/// the nonce; the futures path assumes it did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownErrorPolicy {
    KeepNonce,
    RollbackNonce,
}

/// Unsigned transaction body shared by every attempt of one commit
#[derive(Debug, Clone)]
struct TxTemplate {
    to: Address,
    data: Bytes,
    value: U256,
    gas_price: U256,
}

/// Commits transactions from a single sending account
pub struct EthCommitter {
    from: Address,
    signer: Arc<dyn TxSigner>,
    contracts: ContractSet,
    provider: Arc<dyn EvmProvider>,
    nonce_cache: Arc<NonceCache>,
    config: CommitterConfig,
    telemetry: Arc<dyn Telemetry>,
}

impl std::fmt::Debug for EthCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthCommitter")
            .field("from", &self.from)
            .field("contracts", &self.contracts)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EthCommitter {
    /// Resolve the signer, then build the committer and sync its nonce
    pub async fn new(
        key: KeySource,
        contracts: ContractSet,
        provider: Arc<dyn EvmProvider>,
        config: CommitterConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> CommitResult<Self> {
        let signer = key.into_signer().await?;
        Ok(Self::with_signer(signer, contracts, provider, config, telemetry).await)
    }

    /// Build the committer around an existing signer and sync its nonce
    pub async fn with_signer(
        signer: Arc<dyn TxSigner>,
        contracts: ContractSet,
        provider: Arc<dyn EvmProvider>,
        config: CommitterConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let committer = Self {
            from: signer.address(),
            signer,
            contracts,
            provider,
            nonce_cache: Arc::new(NonceCache::new()),
            config,
            telemetry,
        };
        committer.resync_nonce().await;
        committer
    }

    /// Share a nonce cache with other committers of the same process
    pub fn with_nonce_cache(mut self, cache: Arc<NonceCache>) -> Self {
        self.nonce_cache = cache;
        self
    }

    pub fn nonce_cache(&self) -> &NonceCache {
        &self.nonce_cache
    }

    pub fn config(&self) -> &CommitterConfig {
        &self.config
    }

    /// Refresh the cached nonce from the chain's pending nonce
    ///
    /// Fetch failures are logged and leave the cache untouched.
    pub async fn resync_nonce(&self) -> Option<SyncOutcome> {
        let provider = Arc::clone(&self.provider);
        let from = self.from;
        let outcome = self
            .nonce_cache
            .sync(from, || async move { provider.pending_nonce(from).await })
            .await;
        match outcome {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(account = ?from, error = %err, "unable to acquire nonce");
                None
            }
        }
    }

    /// Take the next nonce; a negative counter is rolled back and rejected
    fn allocate_nonce(&self) -> CommitResult<u64> {
        let nonce = self.nonce_cache.incr(self.from);
        NonceError::checked_nonce(self.from, nonce).map_err(|err| {
            self.nonce_cache.decr(self.from);
            CommitError::from(err)
        })
    }

    async fn sign(&self, template: &TxTemplate, nonce: u64) -> CommitResult<(Bytes, H256)> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.from)
            .to(template.to)
            .nonce(nonce)
            .gas(self.config.gas_limit)
            .gas_price(template.gas_price)
            .value(template.value)
            .data(template.data.clone())
            .chain_id(self.provider.chain_id())
            .into();

        let signature = self.signer.sign(self.from, &tx).await?;
        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Ok((raw, hash))
    }

    async fn submit(&self, raw: Bytes) -> CommitResult<H256> {
        let timeout = self.config.submit_timeout();
        match tokio::time::timeout(timeout, self.provider.send_raw_transaction(raw)).await {
            Ok(result) => result.map_err(CommitError::from),
            Err(_) => Err(CommitError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn commit(
        &self,
        tags: Tags,
        template: TxTemplate,
        policy: UnknownErrorPolicy,
    ) -> CommitResult<H256> {
        let timer = FuncTimer::start(self.telemetry.as_ref(), tags);
        let result = self
            .nonce_cache
            .serialize(self.from, || self.commit_locked(&template, policy))
            .await;
        if result.is_err() {
            timer.error();
        }
        result
    }

    /// Commit loop; runs with exclusive access to the sender's nonce
    async fn commit_locked(
        &self,
        template: &TxTemplate,
        policy: UnknownErrorPolicy,
    ) -> CommitResult<H256> {
        let mut nonce = self.allocate_nonce()?;
        let mut resync_used = false;
        let mut known_skips = 0u32;

        loop {
            let (raw, tx_hash) = match self.sign(template, nonce).await {
                Ok(signed) => signed,
                Err(err) => {
                    self.nonce_cache.decr(self.from);
                    return Err(err);
                }
            };

            let err = match self.submit(raw).await {
                Ok(_) => {
                    info!(tx_hash = ?tx_hash, nonce, "transaction submitted");
                    return Ok(tx_hash);
                }
                Err(err) => err,
            };
            warn!(tx_hash = ?tx_hash, nonce, error = %err, "SendTransaction failed with error");

            match err {
                CommitError::Rpc(RpcManagerError::InvalidSender { message }) => {
                    self.nonce_cache.decr(self.from);
                    return Err(CommitError::SigningFailed(message));
                }
                CommitError::Rpc(source) if source.is_nonce_conflict() => {
                    if resync_used {
                        error!(
                            account = ?self.from,
                            nonce,
                            "nonces synced, but still wrong nonce"
                        );
                        return Err(CommitError::NonceMismatch { nonce, source });
                    }
                    self.resync_nonce().await;
                    resync_used = true;
                    nonce = self.allocate_nonce()?;
                }
                CommitError::Rpc(RpcManagerError::KnownTransaction { .. }) => {
                    if known_skips == self.config.max_known_tx_skips {
                        return Err(CommitError::KnownTransactionLimit { skips: known_skips });
                    }
                    known_skips += 1;
                    nonce = self.allocate_nonce()?;
                }
                // Reverted execution consumes the nonce on chain
                err @ CommitError::Rpc(RpcManagerError::ExecutionReverted { .. }) => {
                    return Err(err);
                }
                err => {
                    if policy == UnknownErrorPolicy::RollbackNonce {
                        self.nonce_cache.decr(self.from);
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl EvmCommitter for EthCommitter {
    fn from_address(&self) -> Address {
        self.from
    }

    fn coordinator_address(&self) -> Address {
        self.contracts.coordinator
    }

    fn exchange_address(&self) -> Address {
        self.contracts.exchange
    }

    #[instrument(skip_all, fields(from = ?self.from, signer = ?tx.signer_address))]
    async fn commit_zero_ex_tx(
        &self,
        tx: &SignedZeroExTransaction,
        approval_signature: Bytes,
    ) -> CommitResult<H256> {
        let template = TxTemplate {
            to: self.contracts.coordinator,
            data: execute_transaction_calldata(tx, tx.signer_address, &[approval_signature]),
            value: protocol_fee(
                tx.gas_price,
                tx.orders_count,
                self.config.protocol_fee_multiplier,
            ),
            gas_price: tx.gas_price,
        };
        self.commit(
            Tags::new(MODULE, "CommitZeroExTx"),
            template,
            UnknownErrorPolicy::KeepNonce,
        )
        .await
    }

    #[instrument(skip_all, fields(from = ?self.from, len = payload.len()))]
    async fn commit_futures_tx(&self, payload: Bytes) -> CommitResult<H256> {
        let template = TxTemplate {
            to: self.contracts.futures,
            data: payload,
            value: U256::zero(),
            gas_price: U256::from(self.config.futures_gas_price),
        };
        self.commit(
            Tags::new(MODULE, "CommitFuturesTx"),
            template,
            UnknownErrorPolicy::RollbackNonce,
        )
        .await
    }
}
