//! Node pool failover, revival and accounting through the public API

use crate::metrics::{self, PrometheusTelemetry, Tags};
use crate::observability::SessionId;
use crate::rpc_manager::{
    EthProvider, EvmProvider, HashRing, RpcManagerConfig, RpcManagerError,
};
use crate::test_utils::{MockChainClient, MockDialer};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest};
use std::sync::Arc;
use std::time::Duration;

const A: &str = "http://node-a:8545";
const B: &str = "http://node-b:8545";

fn config() -> RpcManagerConfig {
    let mut config = RpcManagerConfig::from_urls(&[A.to_string(), B.to_string()]);
    config.dial_backoff_ms = 10;
    config
}

fn session_on(target: &str) -> SessionId {
    let ring = HashRing::new([A, B]);
    (0..10_000)
        .map(|i| format!("pool-test-{}", i))
        .find(|s| ring.get_node(s) == Some(target))
        .map(|s| SessionId::from(s.as_str()))
        .unwrap()
}

fn transport_error(endpoint: &str) -> RpcManagerError {
    RpcManagerError::Transport {
        endpoint: endpoint.to_string(),
        message: "broken pipe".to_string(),
    }
}

struct Pool {
    provider: EthProvider,
    dialer: MockDialer,
    a: MockChainClient,
    b: MockChainClient,
}

fn pool_on(target: &str) -> Pool {
    let dialer = MockDialer::default();
    let a = MockChainClient::new(A);
    let b = MockChainClient::new(B);
    dialer.add_client(a.clone());
    dialer.add_client(b.clone());
    let provider = EthProvider::with_session(
        config(),
        Arc::new(dialer.clone()),
        metrics::noop(),
        session_on(target),
    )
    .unwrap();
    Pool {
        provider,
        dialer,
        a,
        b,
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_node_returns_after_revival() {
    let pool = pool_on(A);
    pool.dialer.fail(A);

    let client = pool.provider.rpc_client().await.unwrap();
    assert_eq!(client.endpoint(), B);
    assert_eq!(pool.provider.nodes(), vec![B.to_string()]);
    assert_eq!(pool.provider.failure_count(A), -1);

    pool.dialer.recover(A);
    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(pool.provider.nodes().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pool.provider.nodes().len(), 2);
    assert_eq!(pool.provider.failure_count(A), 0);

    let client = pool.provider.rpc_client().await.unwrap();
    assert_eq!(client.endpoint(), A);

    pool.provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_revival_is_idempotent() {
    let pool = pool_on(A);
    for _ in 0..3 {
        pool.provider.fail_node(A);
    }
    assert_eq!(pool.provider.nodes().len(), 1);

    pool.provider.revive_node(A);
    pool.provider.revive_node(A);
    assert_eq!(pool.provider.nodes().len(), 2);
    assert_eq!(pool.provider.failure_count(A), 0);

    // The scheduled revival finds the node already back
    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(pool.provider.nodes().len(), 2);
    assert_eq!(pool.provider.failure_count(A), 0);

    pool.provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_remove_node() {
    let pool = pool_on(A);
    pool.a.set_error(Some(transport_error(A)));

    for expected in 1..=2 {
        let err = pool.provider.block_number().await.unwrap_err();
        assert!(matches!(err, RpcManagerError::Transport { .. }));
        assert_eq!(pool.provider.failure_count(A), expected);
    }
    assert!(pool.provider.block_number().await.is_err());
    assert_eq!(pool.provider.failure_count(A), -1);

    pool.b.set_block_number(77);
    assert_eq!(pool.provider.block_number().await.unwrap(), 77);
    // Every failed call dropped the cached connection
    assert_eq!(pool.dialer.dials(A), 3);

    pool.provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_successful_call_resets_failures() {
    let pool = pool_on(A);
    pool.provider.fail_node(A);
    pool.provider.fail_node(A);
    assert_eq!(pool.provider.failure_count(A), 2);

    pool.provider.block_number().await.unwrap();
    assert_eq!(pool.provider.failure_count(A), 0);

    pool.provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_node_errors_do_not_count_as_failures() {
    let pool = pool_on(A);
    pool.a.set_error(Some(RpcManagerError::ExecutionReverted {
        message: "revert".to_string(),
    }));

    let tx = TypedTransaction::Legacy(TransactionRequest::new().to(Address::zero()));
    for _ in 0..5 {
        assert!(pool.provider.call(&tx, None).await.is_err());
    }
    assert_eq!(pool.provider.failure_count(A), 0);
    assert_eq!(pool.dialer.dials(A), 1);
    assert_eq!(pool.provider.nodes().len(), 2);

    pool.provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_sticks_to_its_node() {
    let pool = pool_on(B);
    for _ in 0..5 {
        let client = pool.provider.rpc_client().await.unwrap();
        assert_eq!(client.endpoint(), B);
    }
    assert_eq!(pool.dialer.dials(B), 1);
    assert_eq!(pool.dialer.dials(A), 0);

    pool.provider.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_calls_are_reported_to_telemetry() {
    let dialer = MockDialer::default();
    let client = MockChainClient::new(A);
    client.set_pending_nonce(12);
    dialer.add_client(client.clone());
    let telemetry = Arc::new(PrometheusTelemetry::new().unwrap());
    let provider = EthProvider::new(
        RpcManagerConfig::from_urls(&[A.to_string()]),
        Arc::new(dialer),
        telemetry.clone(),
    )
    .unwrap();

    assert_eq!(provider.pending_nonce(Address::zero()).await.unwrap(), 12);
    client.set_error(Some(RpcManagerError::NotFound));
    assert!(provider.pending_nonce(Address::zero()).await.is_err());

    let tags = Tags::new("eth_provider", "PendingNonceAt");
    assert_eq!(telemetry.calls(tags), 2);
    assert_eq!(telemetry.errors(tags), 1);
    assert!(telemetry.export().unwrap().contains("PendingNonceAt"));

    provider.close().await;
}
