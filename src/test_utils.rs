//! Test Utilities Module
//!
//! Scripted chain clients, dialers and providers for deterministic tests
//! of the node pool and the committer. Nothing here touches the network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::committer::{LocalKeySigner, SignerError, TxSigner};
use crate::rpc_manager::{ChainClient, EvmProvider, NodeDialer, RpcManagerError, RpcResult};
use crate::types::{BlockHeader, TxInfo, TxReceipt};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Filter, Log, Signature,
    H256, U256,
};
use ethers::utils::{keccak256, rlp::Rlp};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ClientState {
    chain_id: u64,
    block_number: u64,
    pending_nonce: u64,
    logs: VecDeque<Vec<Log>>,
    hang: bool,
    error: Option<RpcManagerError>,
}

/// In-memory [`ChainClient`] for a single fake node
///
/// Clones share state, so a test can keep a handle after giving the
/// client to a [`MockDialer`].
#[derive(Debug, Clone)]
pub struct MockChainClient {
    endpoint: String,
    state: Arc<Mutex<ClientState>>,
}

impl MockChainClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: Arc::new(Mutex::new(ClientState {
                chain_id: 1337,
                block_number: 0,
                pending_nonce: 0,
                logs: VecDeque::new(),
                hang: false,
                error: None,
            })),
        }
    }

    pub fn set_chain_id(&self, id: u64) {
        self.state.lock().chain_id = id;
    }

    pub fn set_block_number(&self, number: u64) {
        self.state.lock().block_number = number;
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.state.lock().pending_nonce = nonce;
    }

    /// Queue one batch for the next log query
    pub fn push_logs(&self, logs: Vec<Log>) {
        self.state.lock().logs.push_back(logs);
    }

    /// Make every call pend forever
    pub fn hang(&self) {
        self.state.lock().hang = true;
    }

    /// Make every call fail with `err`, or succeed again with `None`
    pub fn set_error(&self, err: Option<RpcManagerError>) {
        self.state.lock().error = err;
    }

    async fn gate(&self) -> RpcResult<()> {
        let (hang, error) = {
            let state = self.state.lock();
            (state.hang, state.error.clone())
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_id(&self) -> RpcResult<u64> {
        self.gate().await?;
        Ok(self.state.lock().chain_id)
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.gate().await?;
        Ok(self.state.lock().block_number)
    }

    async fn balance(&self, _account: Address, _block: Option<BlockNumber>) -> RpcResult<U256> {
        self.gate().await?;
        Ok(U256::zero())
    }

    async fn pending_nonce(&self, _account: Address) -> RpcResult<u64> {
        self.gate().await?;
        Ok(self.state.lock().pending_nonce)
    }

    async fn code_at(&self, _account: Address, _block: Option<BlockNumber>) -> RpcResult<Bytes> {
        self.gate().await?;
        Ok(Bytes::default())
    }

    async fn call(&self, _tx: &TypedTransaction, _block: Option<BlockNumber>) -> RpcResult<Bytes> {
        self.gate().await?;
        Ok(Bytes::default())
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> RpcResult<U256> {
        self.gate().await?;
        Ok(U256::from(21_000))
    }

    async fn gas_price(&self) -> RpcResult<U256> {
        self.gate().await?;
        Ok(U256::from(1_000_000_000u64))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256> {
        self.gate().await?;
        Ok(H256::from(keccak256(&raw)))
    }

    async fn transaction_by_hash(&self, _hash: H256) -> RpcResult<Option<TxInfo>> {
        self.gate().await?;
        Ok(None)
    }

    async fn transaction_receipt(&self, _hash: H256) -> RpcResult<Option<TxReceipt>> {
        self.gate().await?;
        Ok(None)
    }

    async fn block_header(&self, _block: Option<BlockNumber>) -> RpcResult<Option<BlockHeader>> {
        self.gate().await?;
        Ok(None)
    }

    async fn logs(&self, _filter: &Filter) -> RpcResult<Vec<Log>> {
        self.gate().await?;
        Ok(self.state.lock().logs.pop_front().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct DialerState {
    clients: HashMap<String, MockChainClient>,
    failing: HashSet<String>,
    dials: HashMap<String, usize>,
}

/// [`NodeDialer`] that hands out registered mock clients
///
/// Unknown or failing addresses produce transport errors.
#[derive(Debug, Clone, Default)]
pub struct MockDialer {
    state: Arc<Mutex<DialerState>>,
}

impl MockDialer {
    pub fn add_client(&self, client: MockChainClient) {
        self.state
            .lock()
            .clients
            .insert(client.endpoint.clone(), client);
    }

    pub fn fail(&self, addr: &str) {
        self.state.lock().failing.insert(addr.to_string());
    }

    pub fn recover(&self, addr: &str) {
        self.state.lock().failing.remove(addr);
    }

    /// Number of dial attempts made against `addr`
    pub fn dials(&self, addr: &str) -> usize {
        self.state.lock().dials.get(addr).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeDialer for MockDialer {
    async fn dial(&self, addr: &str) -> RpcResult<Arc<dyn ChainClient>> {
        let mut state = self.state.lock();
        *state.dials.entry(addr.to_string()).or_insert(0) += 1;

        let client = if state.failing.contains(addr) {
            None
        } else {
            state.clients.get(addr).cloned()
        };
        client
            .map(|c| Arc::new(c) as Arc<dyn ChainClient>)
            .ok_or_else(|| RpcManagerError::Transport {
                endpoint: addr.to_string(),
                message: "connection refused".to_string(),
            })
    }
}

#[derive(Debug)]
struct ProviderState {
    pending_nonce: u64,
    pending_nonce_calls: usize,
    send_script: VecDeque<RpcResult<()>>,
    default_send: Option<RpcManagerError>,
    send_delay: Option<Duration>,
    sent_nonces: Vec<u64>,
    sent_raw: Vec<Bytes>,
}

/// [`EvmProvider`] with scripted submission results
///
/// Every submitted raw transaction is decoded and its nonce recorded.
#[derive(Debug, Clone)]
pub struct MockEvmProvider {
    chain_id: u64,
    state: Arc<Mutex<ProviderState>>,
}

impl Default for MockEvmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEvmProvider {
    pub fn new() -> Self {
        Self {
            chain_id: 1337,
            state: Arc::new(Mutex::new(ProviderState {
                pending_nonce: 0,
                pending_nonce_calls: 0,
                send_script: VecDeque::new(),
                default_send: None,
                send_delay: None,
                sent_nonces: Vec::new(),
                sent_raw: Vec::new(),
            })),
        }
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.state.lock().pending_nonce = nonce;
    }

    /// How many times the pending nonce was fetched
    pub fn pending_nonce_calls(&self) -> usize {
        self.state.lock().pending_nonce_calls
    }

    /// Results for the next submissions, in order
    pub fn script_sends(&self, results: impl IntoIterator<Item = RpcResult<()>>) {
        self.state.lock().send_script.extend(results);
    }

    /// Result of every submission once the script runs out
    pub fn fail_all_sends(&self, err: RpcManagerError) {
        self.state.lock().default_send = Some(err);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    /// Nonces of every submitted transaction, in submission order
    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state.lock().sent_nonces.clone()
    }

    /// Decoded transactions, in submission order
    pub fn sent_transactions(&self) -> Vec<(TypedTransaction, Signature)> {
        self.state
            .lock()
            .sent_raw
            .iter()
            .filter_map(|raw| TypedTransaction::decode_signed(&Rlp::new(raw.as_ref())).ok())
            .collect()
    }
}

#[async_trait]
impl EvmProvider for MockEvmProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn gas_limit(&self) -> u64 {
        6_000_000
    }

    fn nodes(&self) -> Vec<String> {
        vec!["mock://node".to_string()]
    }

    async fn balance(&self, _account: Address) -> RpcResult<U256> {
        Ok(U256::zero())
    }

    async fn balance_at(&self, _account: Address, _block: u64) -> RpcResult<U256> {
        Ok(U256::zero())
    }

    async fn pending_nonce(&self, _account: Address) -> RpcResult<u64> {
        let mut state = self.state.lock();
        state.pending_nonce_calls += 1;
        Ok(state.pending_nonce)
    }

    async fn pending_code(&self, _account: Address) -> RpcResult<Bytes> {
        Ok(Bytes::default())
    }

    async fn code_at(&self, _account: Address, _block: Option<u64>) -> RpcResult<Bytes> {
        Ok(Bytes::default())
    }

    async fn call(&self, _tx: &TypedTransaction, _block: Option<u64>) -> RpcResult<Bytes> {
        Ok(Bytes::default())
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> RpcResult<U256> {
        Ok(U256::from(21_000))
    }

    async fn gas_price(&self) -> RpcResult<U256> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn block_number(&self) -> RpcResult<u64> {
        Ok(0)
    }

    async fn transaction_by_hash(&self, _hash: H256) -> RpcResult<TxInfo> {
        Err(RpcManagerError::NotFound)
    }

    async fn transaction_receipt(&self, _hash: H256) -> RpcResult<TxReceipt> {
        Err(RpcManagerError::NotFound)
    }

    async fn block_header(&self, _block: Option<u64>) -> RpcResult<BlockHeader> {
        Err(RpcManagerError::NotFound)
    }

    async fn filter_logs(&self, _filter: &Filter) -> RpcResult<Vec<Log>> {
        Ok(Vec::new())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256> {
        let delay = self.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let nonce = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
            .ok()
            .and_then(|(tx, _)| tx.nonce().map(|n| n.as_u64()))
            .unwrap_or(u64::MAX);

        let mut state = self.state.lock();
        state.sent_nonces.push(nonce);
        state.sent_raw.push(raw.clone());
        let result = match state.send_script.pop_front() {
            Some(result) => result,
            None => state.default_send.clone().map_or(Ok(()), Err),
        };
        result.map(|_| H256::from(keccak256(&raw)))
    }

    async fn close(&self) {}
}

/// Signer with a fresh random key
pub fn random_signer() -> Arc<LocalKeySigner> {
    Arc::new(LocalKeySigner::new(LocalWallet::new(
        &mut ethers::core::rand::thread_rng(),
    )))
}

/// Signer that always fails
#[derive(Debug, Clone, Copy)]
pub struct FailingSigner {
    pub address: Address,
}

#[async_trait]
impl TxSigner for FailingSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, _from: Address, _tx: &TypedTransaction) -> Result<Signature, SignerError> {
        Err(SignerError::Signing("hardware wallet unplugged".to_string()))
    }
}
