//! Bounded pool for lock acquisition loops.
//!
//! Retry loops can wait for up to their full budget. Running them as tracked
//! tasks behind a semaphore keeps a pile-up of stuck attempts from taking
//! over the caller's tasks, and lets shutdown drain or cancel them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use latchkey_core::LockError;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default number of acquisition loops that may run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 1024;

#[derive(Debug, Clone)]
pub struct AcquireExecutor {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for AcquireExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl AcquireExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of acquisition tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Runs one acquisition on the pool and waits for its result.
    ///
    /// Waiting for a free slot is bounded by `permit_wait`; when it runs out
    /// the result is [`LockError::AcquisitionTimeout`] and `f` never runs.
    /// The task receives a token that is cancelled when the caller stops
    /// waiting (the returned future is dropped) or when the pool shuts down.
    pub async fn run<T, F, Fut>(&self, key: &str, permit_wait: Duration, f: F) -> Result<T, LockError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, LockError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(LockError::ShuttingDown);
        }

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(LockError::ShuttingDown),
            permit = tokio::time::timeout(permit_wait, Arc::clone(&self.permits).acquire_owned()) => {
                match permit {
                    Ok(permit) => permit.map_err(|_| LockError::ShuttingDown)?,
                    Err(_) => {
                        debug!(key, permit_wait_ms = permit_wait.as_millis() as u64, "No free acquisition slot in time");
                        return Err(LockError::acquisition_timeout(key));
                    }
                }
            }
        };

        let token = self.shutdown.child_token();
        let _cancel_on_drop = token.clone().drop_guard();
        let task = f(token);
        let handle = self.tracker.spawn(async move {
            let _permit = permit;
            task.await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(LockError::cancelled(key)),
        }
    }

    /// Stops accepting work and waits up to `timeout` for running
    /// acquisitions. Returns `false` if some had to be cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        self.permits.close();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            info!("Lock acquisition pool drained");
            return true;
        }

        warn!(
            remaining = self.tracker.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Lock acquisitions still running after shutdown timeout; cancelling"
        );
        self.shutdown.cancel();
        self.tracker.wait().await;
        false
    }
}
