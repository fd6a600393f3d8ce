//! Named resource locks
//!
//! `Uniquify` is a mutex addressed by an arbitrary string key. Only one
//! callable per key runs at a time; concurrent callers for the same key are
//! turned into a sequential chain. Callers for different keys never contend.
//!
//! The holder of a key publishes a completion signal (a `watch` channel whose
//! sender is dropped when the holder finishes). Waiters park on that signal
//! and then requeue, so under contention the order is the order in which the
//! waiters win the requeue race, not strict arrival order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Entry for a key that currently has a running callable
#[derive(Debug)]
struct Task {
    id: u64,
    done: watch::Receiver<()>,
}

#[derive(Debug, Default)]
struct Tasks {
    inner: Mutex<HashMap<String, Task>>,
    next_id: AtomicU64,
}

/// Thread-safe named mutex
#[derive(Debug, Clone, Default)]
pub struct Uniquify {
    tasks: Arc<Tasks>,
}

/// Removes the task entry and wakes waiters when the holder finishes,
/// including when the holder's future is dropped mid-flight.
struct TaskGuard {
    tasks: Arc<Tasks>,
    key: String,
    id: u64,
    _done: watch::Sender<()>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut tasks = self.tasks.inner.lock();
        if tasks.get(&self.key).map(|t| t.id) == Some(self.id) {
            tasks.remove(&self.key);
        }
        // `_done` is dropped after the entry is gone, which closes the
        // channel and releases every waiter.
    }
}

impl Uniquify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `callable` with exclusive access to `key`.
    ///
    /// Multiple asynchronous calls with the same key are executed
    /// sequentially. The callable's result is returned to this caller only.
    pub async fn call<F, Fut, T, E>(&self, key: &str, callable: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.acquire(key).await;
        callable().await
    }

    /// Returns true if a callable is currently running for `key`.
    pub fn is_busy(&self, key: &str) -> bool {
        self.tasks.inner.lock().contains_key(key)
    }

    /// Number of keys that currently have a running callable.
    pub fn len(&self) -> usize {
        self.tasks.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn acquire(&self, key: &str) -> TaskGuard {
        loop {
            let mut waiter = {
                let mut tasks = self.tasks.inner.lock();
                match tasks.get(key) {
                    Some(task) => task.done.clone(),
                    None => {
                        let id = self.tasks.next_id.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = watch::channel(());
                        tasks.insert(key.to_string(), Task { id, done: rx });
                        return TaskGuard {
                            tasks: self.tasks.clone(),
                            key: key.to_string(),
                            id,
                            _done: tx,
                        };
                    }
                }
            };

            trace!(key = %key, "waiting for running task");
            // Resolves with Err once the holder's sender is dropped.
            while waiter.changed().await.is_ok() {}
        }
    }
}
