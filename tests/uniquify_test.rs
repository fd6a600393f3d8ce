//! Named mutex integration tests

use evm_committer::Uniquify;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_same_key_runs_sequentially() {
    let uniq = Arc::new(Uniquify::new());
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let first = {
        let uniq = Arc::clone(&uniq);
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            uniq.call("k", || async {
                log.lock().push("first-start");
                tokio::time::sleep(Duration::from_millis(20)).await;
                log.lock().push("first-end");
                Ok::<_, ()>(1)
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(uniq.is_busy("k"));

    let second = uniq
        .call("k", || async {
            log.lock().push("second");
            Ok::<_, ()>(2)
        })
        .await;

    assert_eq!(first.await.unwrap(), Ok(1));
    assert_eq!(second, Ok(2));
    assert_eq!(*log.lock(), vec!["first-start", "first-end", "second"]);
    assert!(uniq.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_run_in_parallel() {
    let uniq = Arc::new(Uniquify::new());

    let holder = {
        let uniq = Arc::clone(&uniq);
        tokio::spawn(async move {
            uniq.call("a", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ()>(())
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        uniq.call("b", || async { Ok::<_, ()>("b") }),
    )
    .await;
    assert_eq!(result, Ok(Ok("b")));
    assert_eq!(uniq.len(), 1);

    holder.abort();
}

#[tokio::test]
async fn test_errors_go_to_their_caller_only() {
    let uniq = Uniquify::new();
    let failed = uniq
        .call("k", || async { Err::<(), _>("boom") })
        .await;
    let ok = uniq.call("k", || async { Ok::<_, &str>(7) }).await;

    assert_eq!(failed, Err("boom"));
    assert_eq!(ok, Ok(7));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_holder_releases_key() {
    let uniq = Arc::new(Uniquify::new());

    let holder = {
        let uniq = Arc::clone(&uniq);
        tokio::spawn(async move {
            uniq.call("k", || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<_, ()>(())
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(uniq.is_busy("k"));

    holder.abort();
    let _ = holder.await;
    assert!(!uniq.is_busy("k"));

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        uniq.call("k", || async { Ok::<_, ()>(()) }),
    )
    .await;
    assert_eq!(result, Ok(Ok(())));
}
