//! Consistent-hash RPC node pool
//!
//! Every provider instance carries a random session ID and routes all of its
//! calls to the node that ID hashes to, so a client keeps talking to the same
//! node while it stays healthy. Dial failures are counted per node; at the
//! threshold the node leaves the ring and a revival task adds it back after
//! the cool-down. A failure count of `-1` marks a node as removed and
//! scheduled for revival.
//!
//! Closing the provider aborts in-flight calls with
//! [`RpcManagerError::Closed`] and waits for background tasks to finish.

use super::rpc_config::RpcManagerConfig;
use super::rpc_errors::{RpcManagerError, RpcResult};
use super::rpc_ring::HashRing;
use super::{block_arg, ChainClient, EvmProvider, NodeDialer};
use crate::metrics::{FuncTimer, Tags, Telemetry};
use crate::observability::SessionId;
use crate::types::{BlockHeader, TxInfo, TxReceipt};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Filter, Log, H256, U256,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const MODULE: &str = "eth_provider";

/// Failure count of a node that is out of the ring awaiting revival
const REMOVED: i32 = -1;

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    // A dropped sender also counts as closed
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Ring membership, failure counters and cached connections
struct NodeSet {
    ring: ArcSwap<HashRing>,
    fails: Mutex<HashMap<String, i32>>,
    clients: Mutex<HashMap<String, Arc<dyn ChainClient>>>,
    failure_threshold: i32,
    revival_delay: Duration,
    close_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeSet {
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn is_closed(&self) -> bool {
        *self.close_rx.borrow()
    }

    fn fail_node(self: &Arc<Self>, addr: &str) {
        let mut fails = self.fails.lock();
        let count = fails.entry(addr.to_string()).or_insert(0);
        if *count == REMOVED {
            return;
        }

        *count += 1;
        if *count < self.failure_threshold {
            debug!(endpoint = %addr, failures = *count, "Node failure recorded");
            return;
        }

        *count = REMOVED;
        let ring = self.ring.load().without_node(addr);
        self.ring.store(Arc::new(ring));
        self.clients.lock().remove(addr);
        drop(fails);

        warn!(
            endpoint = %addr,
            revival_in_secs = self.revival_delay.as_secs(),
            "Node removed from ring"
        );

        if self.is_closed() {
            return;
        }

        let nodes = Arc::clone(self);
        let addr = addr.to_string();
        let delay = self.revival_delay;
        let close_rx = self.close_rx.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => nodes.revive_node(&addr),
                _ = wait_closed(close_rx) => {}
            }
        });
        self.track(handle);
    }

    fn revive_node(&self, addr: &str) {
        let mut fails = self.fails.lock();
        if fails.get(addr).copied().unwrap_or(0) != REMOVED {
            return;
        }

        let ring = self.ring.load().with_node(addr);
        self.ring.store(Arc::new(ring));
        fails.insert(addr.to_string(), 0);
        info!(endpoint = %addr, "Node revived");
    }

    /// A successful call ends the run of consecutive failures
    fn mark_alive(&self, addr: &str) {
        let mut fails = self.fails.lock();
        if let Some(count) = fails.get_mut(addr) {
            if *count > 0 {
                *count = 0;
            }
        }
    }
}

/// EVM provider over a pool of nodes
pub struct EthProvider {
    nodes: Arc<NodeSet>,
    session: SessionId,
    chain_id: AtomicU64,
    config: RpcManagerConfig,
    dialer: Arc<dyn NodeDialer>,
    telemetry: Arc<dyn Telemetry>,
    close_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for EthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthProvider")
            .field("session", &self.session)
            .field("chain_id", &self.chain_id)
            .field("nodes", &self.nodes.ring.load().nodes())
            .finish_non_exhaustive()
    }
}

impl EthProvider {
    /// Build the pool without touching the network
    ///
    /// The chain id stays at the configured fallback until
    /// [`EthProvider::refresh_chain_id`] succeeds.
    pub fn new(
        config: RpcManagerConfig,
        dialer: Arc<dyn NodeDialer>,
        telemetry: Arc<dyn Telemetry>,
    ) -> RpcResult<Self> {
        Self::with_session(config, dialer, telemetry, SessionId::new())
    }

    /// Same as [`EthProvider::new`] with a caller-chosen session
    pub fn with_session(
        config: RpcManagerConfig,
        dialer: Arc<dyn NodeDialer>,
        telemetry: Arc<dyn Telemetry>,
        session: SessionId,
    ) -> RpcResult<Self> {
        config
            .validate()
            .map_err(|e| RpcManagerError::Configuration(e.to_string()))?;

        let (close_tx, close_rx) = watch::channel(false);
        let nodes = Arc::new(NodeSet {
            ring: ArcSwap::from_pointee(HashRing::new(&config.nodes)),
            fails: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            failure_threshold: i32::try_from(config.failure_threshold).unwrap_or(i32::MAX),
            revival_delay: config.revival_delay(),
            close_rx,
            tasks: Mutex::new(Vec::new()),
        });

        info!(
            session = %session,
            nodes = config.nodes.len(),
            "EVM provider created"
        );

        Ok(Self {
            nodes,
            session,
            chain_id: AtomicU64::new(config.fallback_chain_id),
            config,
            dialer,
            telemetry,
            close_tx,
        })
    }

    /// Build the pool and learn the chain id from the network
    ///
    /// A node that cannot report its chain id leaves the fallback in place.
    pub async fn connect(
        config: RpcManagerConfig,
        dialer: Arc<dyn NodeDialer>,
        telemetry: Arc<dyn Telemetry>,
    ) -> RpcResult<Arc<Self>> {
        let provider = Arc::new(Self::new(config, dialer, telemetry)?);
        if let Err(err) = provider.refresh_chain_id().await {
            warn!(
                error = %err,
                fallback = provider.chain_id(),
                "Failed to get chain id from RPC endpoint"
            );
        }
        Ok(provider)
    }

    /// Ask the session's node for the chain id and keep it
    #[instrument(skip_all, fields(session = %self.session))]
    pub async fn refresh_chain_id(&self) -> RpcResult<u64> {
        let id = self
            .run(Tags::new(MODULE, "ChainID"), |client| async move {
                client.chain_id().await
            })
            .await?;
        self.chain_id.store(id, Ordering::Relaxed);
        info!(chain_id = id, "Chain id resolved");
        Ok(id)
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn config(&self) -> &RpcManagerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.nodes.is_closed()
    }

    /// Current failure count of a node, `-1` while it awaits revival
    pub fn failure_count(&self, addr: &str) -> i32 {
        self.nodes.fails.lock().get(addr).copied().unwrap_or(0)
    }

    /// Record one failed contact with `addr`
    pub fn fail_node(&self, addr: &str) {
        self.nodes.fail_node(addr);
    }

    /// Put a removed node back into the ring; no-op for nodes that are not removed
    pub fn revive_node(&self, addr: &str) {
        self.nodes.revive_node(addr);
    }

    /// Connection to the node this session hashes to
    ///
    /// Dial failures count against the node and are followed by a backoff
    /// before the ring is consulted again.
    #[instrument(skip_all, fields(session = %self.session))]
    pub async fn rpc_client(&self) -> RpcResult<Arc<dyn ChainClient>> {
        loop {
            if self.is_closed() {
                return Err(RpcManagerError::Closed);
            }

            let picked = self
                .nodes
                .ring
                .load()
                .get_node(self.session.as_str())
                .map(str::to_string);
            let Some(addr) = picked else {
                warn!(session = %self.session, "No EVM node available");
                return Err(RpcManagerError::NodeUnavailable);
            };

            let cached = self.nodes.clients.lock().get(&addr).cloned();
            if let Some(client) = cached {
                return Ok(client);
            }

            match self.dialer.dial(&addr).await {
                Ok(client) => {
                    self.nodes
                        .clients
                        .lock()
                        .insert(addr.clone(), Arc::clone(&client));
                    debug!(endpoint = %addr, session = %self.session, "Dialed node");
                    return Ok(client);
                }
                Err(err) => {
                    warn!(endpoint = %addr, error = %err, "Failed to dial node");
                    self.nodes.fail_node(&addr);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.dial_backoff()) => {}
                        _ = wait_closed(self.nodes.close_rx.clone()) => {
                            return Err(RpcManagerError::Closed);
                        }
                    }
                }
            }
        }
    }

    /// Run one node call with telemetry, aborting when the provider closes
    async fn run<T, F, Fut>(&self, tags: Tags, op: F) -> RpcResult<T>
    where
        F: FnOnce(Arc<dyn ChainClient>) -> Fut + Send,
        Fut: Future<Output = RpcResult<T>> + Send,
        T: Send,
    {
        let timer = FuncTimer::start(self.telemetry.as_ref(), tags);
        let call = async {
            let client = self.rpc_client().await?;
            let endpoint = client.endpoint().to_string();
            let result = op(client).await;
            match &result {
                Ok(_) => self.nodes.mark_alive(&endpoint),
                Err(RpcManagerError::Transport { .. }) => {
                    // Drop the broken connection so the next call redials
                    self.nodes.clients.lock().remove(&endpoint);
                    self.nodes.fail_node(&endpoint);
                }
                Err(_) => {}
            }
            result
        };

        let result = tokio::select! {
            biased;
            _ = wait_closed(self.nodes.close_rx.clone()) => Err(RpcManagerError::Closed),
            result = call => result,
        };

        if result.is_err() {
            timer.error();
        }
        result
    }

    /// Stream logs matching `filter` into `sink`
    ///
    /// Polls from the head block at subscription time. The task stops when
    /// the subscription is dropped, the sink closes, or the provider closes.
    pub fn subscribe_logs(
        self: &Arc<Self>,
        filter: Filter,
        sink: mpsc::Sender<Log>,
    ) -> LogSubscription {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let provider = Arc::clone(self);
        let close_rx = self.nodes.close_rx.clone();
        let mut interval = tokio::time::interval(self.config.log_poll_interval());

        let handle = tokio::spawn(async move {
            let mut next_block: Option<u64> = None;
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = wait_closed(close_rx.clone()) => break,
                    _ = interval.tick() => {}
                }
                if sink.is_closed() {
                    break;
                }

                let head = match provider.block_number().await {
                    Ok(head) => head,
                    Err(RpcManagerError::Closed) => break,
                    Err(err) => {
                        warn!(error = %err, "Log subscription failed to fetch head");
                        continue;
                    }
                };
                let from = next_block.unwrap_or(head);
                if from > head {
                    continue;
                }

                let range = filter
                    .clone()
                    .from_block(BlockNumber::Number(from.into()))
                    .to_block(BlockNumber::Number(head.into()));
                match provider.filter_logs(&range).await {
                    Ok(logs) => {
                        for log in logs {
                            tokio::select! {
                                sent = sink.send(log) => if sent.is_err() { return },
                                _ = wait_closed(close_rx.clone()) => return,
                            }
                        }
                        next_block = Some(head + 1);
                    }
                    Err(RpcManagerError::Closed) => break,
                    Err(err) => warn!(error = %err, from, head, "Log subscription poll failed"),
                }
            }
            debug!("Log subscription stopped");
        });
        self.nodes.track(handle);

        LogSubscription {
            cancel: Some(cancel_tx),
        }
    }

    async fn close_inner(&self) {
        if self.close_tx.send_replace(true) {
            return;
        }
        info!(session = %self.session, "Closing EVM provider");

        let tasks: Vec<_> = std::mem::take(&mut *self.nodes.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Background task ended abnormally");
            }
        }
        self.nodes.clients.lock().clear();
    }
}

/// Handle of a running log subscription; dropping it stops the poller
#[derive(Debug)]
pub struct LogSubscription {
    cancel: Option<oneshot::Sender<()>>,
}

impl LogSubscription {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

fn not_found<T>(value: Option<T>) -> RpcResult<T> {
    value.ok_or(RpcManagerError::NotFound)
}

#[async_trait]
impl EvmProvider for EthProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::Relaxed)
    }

    fn gas_limit(&self) -> u64 {
        self.config.gas_limit
    }

    fn nodes(&self) -> Vec<String> {
        self.nodes.ring.load().nodes()
    }

    async fn balance(&self, account: Address) -> RpcResult<U256> {
        self.run(Tags::new(MODULE, "Balance"), |client| async move {
            client.balance(account, None).await
        })
        .await
    }

    async fn balance_at(&self, account: Address, block: u64) -> RpcResult<U256> {
        self.run(Tags::new(MODULE, "BalanceAt"), |client| async move {
            client.balance(account, block_arg(Some(block))).await
        })
        .await
    }

    async fn pending_nonce(&self, account: Address) -> RpcResult<u64> {
        self.run(Tags::new(MODULE, "PendingNonceAt"), |client| async move {
            client.pending_nonce(account).await
        })
        .await
    }

    async fn pending_code(&self, account: Address) -> RpcResult<Bytes> {
        self.run(Tags::new(MODULE, "PendingCodeAt"), |client| async move {
            client.code_at(account, Some(BlockNumber::Pending)).await
        })
        .await
    }

    async fn code_at(&self, account: Address, block: Option<u64>) -> RpcResult<Bytes> {
        self.run(Tags::new(MODULE, "CodeAt"), |client| async move {
            client.code_at(account, block_arg(block)).await
        })
        .await
    }

    async fn call(&self, tx: &TypedTransaction, block: Option<u64>) -> RpcResult<Bytes> {
        self.run(Tags::new(MODULE, "CallContract"), |client| async move {
            client.call(tx, block_arg(block)).await
        })
        .await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> RpcResult<U256> {
        self.run(Tags::new(MODULE, "EstimateGas"), |client| async move {
            client.estimate_gas(tx).await
        })
        .await
    }

    async fn gas_price(&self) -> RpcResult<U256> {
        self.run(Tags::new(MODULE, "SuggestGasPrice"), |client| async move {
            client.gas_price().await
        })
        .await
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.run(Tags::new(MODULE, "BlockNumber"), |client| async move {
            client.block_number().await
        })
        .await
    }

    async fn transaction_by_hash(&self, hash: H256) -> RpcResult<TxInfo> {
        let tx = self
            .run(Tags::new(MODULE, "TransactionByHash"), |client| async move {
                client.transaction_by_hash(hash).await
            })
            .await?;
        not_found(tx)
    }

    async fn transaction_receipt(&self, hash: H256) -> RpcResult<TxReceipt> {
        let receipt = self
            .run(Tags::new(MODULE, "TransactionReceiptByHash"), |client| async move {
                client.transaction_receipt(hash).await
            })
            .await?;
        not_found(receipt)
    }

    async fn block_header(&self, block: Option<u64>) -> RpcResult<BlockHeader> {
        let header = self
            .run(Tags::new(MODULE, "BlockHeaderByNumber"), |client| async move {
                client.block_header(block_arg(block)).await
            })
            .await?;
        not_found(header)
    }

    async fn filter_logs(&self, filter: &Filter) -> RpcResult<Vec<Log>> {
        self.run(Tags::new(MODULE, "FilterLogs"), |client| async move {
            client.logs(filter).await
        })
        .await
    }

    #[instrument(skip_all, fields(session = %self.session, len = raw.len()))]
    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<H256> {
        self.run(Tags::new(MODULE, "SendTransaction"), |client| async move {
            client.send_raw_transaction(raw).await
        })
        .await
    }

    async fn close(&self) {
        self.close_inner().await;
    }
}

impl Drop for EthProvider {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}
