//! Nonce cache integration tests

use ethers::types::Address;
use evm_committer::nonce_manager::{NonceCache, NonceError, SyncOutcome};
use std::sync::Arc;
use std::time::Duration;

fn account(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

#[test]
fn test_unseen_account_reads_zero() {
    let cache = NonceCache::new();
    assert_eq!(cache.get(account(1)), 0);
    assert_eq!(cache.incr(account(1)), 0);
    assert_eq!(cache.get(account(1)), 1);
}

#[test]
fn test_decr_of_unseen_account_goes_negative() {
    let cache = NonceCache::new();
    assert_eq!(cache.decr(account(2)), 0);
    assert_eq!(cache.get(account(2)), -1);
    assert!(matches!(
        NonceError::checked_nonce(account(2), cache.get(account(2))),
        Err(NonceError::Negative { .. })
    ));
}

#[test]
fn test_accounts_are_independent() {
    let cache = NonceCache::new();
    cache.set(account(1), 10);
    cache.set(account(2), 20);
    cache.incr(account(1));
    assert_eq!(cache.get(account(1)), 11);
    assert_eq!(cache.get(account(2)), 20);
}

#[tokio::test]
async fn test_sync_replaces_value() {
    let cache = NonceCache::new();
    cache.set(account(1), 3);

    let outcome = cache
        .sync(account(1), || async { Ok::<_, String>(8) })
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Updated { from: 3, to: 8 });
    assert_eq!(cache.get(account(1)), 8);
}

#[tokio::test]
async fn test_sync_error_leaves_value() {
    let cache = NonceCache::new();
    cache.set(account(1), 3);

    let err = cache
        .sync(account(1), || async { Err::<u64, _>("node down".to_string()) })
        .await
        .unwrap_err();

    assert_eq!(err, "node down");
    assert_eq!(cache.get(account(1)), 3);
}

#[tokio::test]
async fn test_sync_skips_when_counter_moves() {
    let cache = Arc::new(NonceCache::new());
    cache.set(account(1), 3);

    let writer = Arc::clone(&cache);
    let outcome = cache
        .sync(account(1), || async move {
            writer.incr(account(1));
            Ok::<_, String>(100)
        })
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Skipped);
    assert_eq!(cache.get(account(1)), 4);
}

#[tokio::test(start_paused = true)]
async fn test_serialize_orders_same_account() {
    let cache = Arc::new(NonceCache::new());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let slow = {
        let cache = Arc::clone(&cache);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            cache
                .serialize(account(1), || async {
                    let nonce = cache.incr(account(1));
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    order.lock().push(("slow", nonce));
                    Ok::<_, ()>(())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let fast = {
        let cache = Arc::clone(&cache);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            cache
                .serialize(account(1), || async {
                    let nonce = cache.incr(account(1));
                    order.lock().push(("fast", nonce));
                    Ok::<_, ()>(())
                })
                .await
        })
    };

    slow.await.unwrap().unwrap();
    fast.await.unwrap().unwrap();
    assert_eq!(*order.lock(), vec![("slow", 0), ("fast", 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_serialize_does_not_block_other_accounts() {
    let cache = Arc::new(NonceCache::new());

    let holder = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            cache
                .serialize(account(1), || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, ()>(())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let other = tokio::time::timeout(
        Duration::from_secs(1),
        cache.serialize(account(2), || async { Ok::<_, ()>(cache.incr(account(2))) }),
    )
    .await;
    assert_eq!(other, Ok(Ok(0)));

    holder.abort();
}
