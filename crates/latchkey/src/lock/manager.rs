//! Lock manager: picks a backend per call, acquires, and releases.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use latchkey_core::{
    CompletionCallback, DynLockClient, KeyArgs, KeyError, LockError, LockKey, NoTransaction,
    TransactionContext, TransactionOutcome,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::distributed::UnlockPolicy;
use super::executor::{AcquireExecutor, DEFAULT_MAX_CONCURRENT};
use super::locker::{DistributedLocker, LocalLocker, LockBackend, LockHandle, Locker};
use super::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, RetryBackoff};
use super::spec::{DEFAULT_LEASE, DEFAULT_MAX_WAIT, LockSpec};

/// Default time allowed for the lock service liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of one acquisition.
#[derive(Debug)]
pub struct LockAcquisition {
    pub key: LockKey,
    pub backend: LockBackend,
    pub acquired: bool,
    handle: Option<LockHandle>,
}

impl LockAcquisition {
    /// `true` when the lock is held through the distributed backend.
    pub fn using_distributed(&self) -> bool {
        self.acquired && self.backend == LockBackend::Distributed
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    /// Releases through the backend that acquired it. No-op if not acquired.
    pub async fn release(self) {
        if let Some(handle) = self.handle {
            debug!(key = %self.key, backend = %self.backend, "Releasing lock");
            handle.release().await;
        }
    }
}

/// Builder for [`LockManager`].
pub struct LockManagerBuilder {
    distributed: Option<DynLockClient>,
    base_delay: Duration,
    max_delay: Duration,
    probe_timeout: Duration,
    max_concurrent: usize,
    unlock_policy: UnlockPolicy,
    default_max_wait: Duration,
    default_lease: Duration,
}

impl Default for LockManagerBuilder {
    fn default() -> Self {
        Self {
            distributed: None,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            unlock_policy: UnlockPolicy::default(),
            default_max_wait: DEFAULT_MAX_WAIT,
            default_lease: DEFAULT_LEASE,
        }
    }
}

impl LockManagerBuilder {
    /// Use a lock service; without one every lock is local.
    #[must_use]
    pub fn distributed(mut self, client: DynLockClient) -> Self {
        self.distributed = Some(client);
        self
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    #[must_use]
    pub fn unlock_policy(mut self, policy: UnlockPolicy) -> Self {
        self.unlock_policy = policy;
        self
    }

    #[must_use]
    pub fn default_max_wait(mut self, max_wait: Duration) -> Self {
        self.default_max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    pub fn build(self) -> LockManager {
        let backoff = RetryBackoff::new(self.base_delay).with_max_delay(self.max_delay);
        let distributed = self.distributed.map(|client| {
            Arc::new(DistributedLocker::new(
                client,
                backoff,
                self.unlock_policy,
                self.probe_timeout,
            ))
        });
        LockManager {
            local: Arc::new(LocalLocker::new(backoff)),
            distributed,
            executor: AcquireExecutor::new(self.max_concurrent),
            default_max_wait: self.default_max_wait,
            default_lease: self.default_lease,
        }
    }
}

/// Chooses between distributed and local locking per call and guarantees release.
///
/// Each acquisition probes the lock service first. When it answers, the lock
/// is taken there; otherwise the process-local registry is used. One call
/// never holds both.
pub struct LockManager {
    local: Arc<LocalLocker>,
    distributed: Option<Arc<DistributedLocker>>,
    executor: AcquireExecutor,
    default_max_wait: Duration,
    default_lease: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::local_only()
    }
}

impl LockManager {
    pub fn builder() -> LockManagerBuilder {
        LockManagerBuilder::default()
    }

    /// A manager that never uses a lock service.
    pub fn local_only() -> Self {
        Self::builder().build()
    }

    pub fn has_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    /// Number of local lock keys currently held or awaited.
    pub fn local_lock_count(&self) -> usize {
        self.local.registry().len()
    }

    /// A [`LockSpec`] carrying this manager's default wait and lease.
    pub fn spec(&self, operation: &str, expression: &str) -> Result<LockSpec, KeyError> {
        Ok(LockSpec::new(operation, expression)?
            .max_wait(self.default_max_wait)
            .lease(self.default_lease))
    }

    async fn select_locker(&self) -> Arc<dyn Locker> {
        match &self.distributed {
            Some(distributed) if distributed.is_available().await => {
                Arc::clone(distributed) as Arc<dyn Locker>
            }
            Some(_) => {
                crate::metrics::record_lock_fallback();
                Arc::clone(&self.local) as Arc<dyn Locker>
            }
            None => Arc::clone(&self.local) as Arc<dyn Locker>,
        }
    }

    /// Acquires `key`, waiting up to `max_wait`.
    ///
    /// A timeout is not an error here: the result has `acquired == false`.
    /// Dropping the returned future cancels the wait and releases anything
    /// taken in the meantime.
    pub async fn acquire(
        &self,
        key: &LockKey,
        max_wait: Duration,
        lease: Duration,
    ) -> Result<LockAcquisition, LockError> {
        let locker = self.select_locker().await;
        let backend = locker.backend();
        let started = Instant::now();

        // Time spent waiting for a pool slot counts against `max_wait`.
        let task_key = key.as_str().to_string();
        let outcome = self
            .executor
            .run(key.as_str(), max_wait, move |cancel| async move {
                let remaining = max_wait.saturating_sub(started.elapsed());
                locker.acquire(&task_key, remaining, lease, &cancel).await
            })
            .await;
        let handle = match outcome {
            Ok(handle) => handle,
            Err(LockError::AcquisitionTimeout { .. }) => None,
            Err(e) => return Err(e),
        };

        let acquired = handle.is_some();
        crate::metrics::record_lock_acquisition(backend.as_str(), acquired, started.elapsed());
        debug!(key = %key, backend = %backend, acquired, "Lock acquisition finished");

        Ok(LockAcquisition {
            key: key.clone(),
            backend,
            acquired,
            handle,
        })
    }

    /// Releases immediately through the acquiring backend.
    pub async fn release(&self, acquisition: LockAcquisition) {
        acquisition.release().await;
    }

    /// Releases after `tx` completes, or right away if no transaction is
    /// active. Returns `true` if the release was deferred.
    pub async fn register_deferred_release(
        &self,
        acquisition: LockAcquisition,
        tx: &dyn TransactionContext,
    ) -> bool {
        if !acquisition.acquired {
            return false;
        }
        let callback: CompletionCallback = Box::new(move |outcome: TransactionOutcome| {
            Box::pin(async move {
                debug!(key = %acquisition.key, ?outcome, "Releasing lock after transaction completion");
                acquisition.release().await;
            })
        });
        match tx.register_after_completion(callback) {
            Ok(()) => true,
            Err(callback) => {
                callback(TransactionOutcome::Committed).await;
                false
            }
        }
    }

    /// Runs `f` while holding the lock described by `spec`.
    pub async fn with_lock<T, E, F, Fut>(&self, spec: &LockSpec, args: &KeyArgs, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.with_lock_in(&NoTransaction, spec, args, f).await
    }

    /// Like [`with_lock`](Self::with_lock), but when `tx` is active the
    /// release waits for it to commit or roll back.
    pub async fn with_lock_in<T, E, F, Fut>(
        &self,
        tx: &dyn TransactionContext,
        spec: &LockSpec,
        args: &KeyArgs,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let key = spec
            .resolve(args)
            .map_err(|e| E::from(LockError::from(e)))?;
        self.with_lock_key_in(tx, key, spec.max_wait_time(), spec.lease_time(), f)
            .await
    }

    /// Runs `f` while holding an already rendered key.
    pub async fn with_lock_key<T, E, F, Fut>(
        &self,
        key: LockKey,
        max_wait: Duration,
        lease: Duration,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.with_lock_key_in(&NoTransaction, key, max_wait, lease, f)
            .await
    }

    pub async fn with_lock_key_in<T, E, F, Fut>(
        &self,
        tx: &dyn TransactionContext,
        key: LockKey,
        max_wait: Duration,
        lease: Duration,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let acquisition = self.acquire(&key, max_wait, lease).await?;
        if !acquisition.acquired {
            warn!(key = %key, max_wait_ms = max_wait.as_millis() as u64, "Failed to acquire lock");
            return Err(LockError::acquisition_timeout(key.into_inner()).into());
        }

        let result = f().await;

        if tx.is_active() {
            self.register_deferred_release(acquisition, tx).await;
        } else {
            acquisition.release().await;
        }
        result
    }

    /// Stops accepting acquisitions and drains running ones.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.executor.shutdown(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use latchkey_core::{DistributedLockClient, TransactionScope};
    use latchkey_memory::MemoryLockClient;

    use super::*;

    fn manager_with(client: Arc<MemoryLockClient>) -> LockManager {
        LockManager::builder()
            .distributed(client)
            .probe_timeout(Duration::from_millis(50))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_uses_distributed_when_available() {
        let client = Arc::new(MemoryLockClient::new());
        let manager = manager_with(client.clone());
        let key = LockKey::new("op:1");

        let acq = manager.acquire(&key, DEFAULT_MAX_WAIT, DEFAULT_LEASE).await.unwrap();
        assert!(acq.acquired);
        assert!(acq.using_distributed());
        assert!(client.is_locked("op:1").await.unwrap());
        assert_eq!(manager.local_lock_count(), 0);

        manager.release(acq).await;
        assert!(!client.is_locked("op:1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_falls_back_to_local() {
        let client = Arc::new(MemoryLockClient::new());
        client.set_available(false);
        let manager = manager_with(client.clone());
        let key = LockKey::new("op:1");

        let acq = manager.acquire(&key, DEFAULT_MAX_WAIT, DEFAULT_LEASE).await.unwrap();
        assert!(acq.acquired);
        assert_eq!(acq.backend, LockBackend::Local);
        assert!(!acq.using_distributed());
        assert_eq!(manager.local_lock_count(), 1);

        // Lock service returns while the local lock is held: release still goes local.
        client.set_available(true);
        manager.release(acq).await;
        assert_eq!(manager.local_lock_count(), 0);
        assert!(!client.is_locked("op:1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_skips_operation() {
        let manager = LockManager::local_only();
        let key = LockKey::new("op:1");
        let held = manager.acquire(&key, DEFAULT_MAX_WAIT, DEFAULT_LEASE).await.unwrap();

        let ran = AtomicUsize::new(0);
        let result: Result<(), LockError> = manager
            .with_lock_key(key.clone(), Duration::from_millis(300), DEFAULT_LEASE, || async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LockError::AcquisitionTimeout { ref key }) if key == "op:1"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        held.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_propagates_result_and_releases() {
        let manager = LockManager::local_only();
        let spec = manager.spec("deletePost", "#postId").unwrap();
        let args = KeyArgs::new().arg("postId", 10);

        let value: Result<u32, LockError> = manager.with_lock(&spec, &args, || async { Ok(5) }).await;
        assert_eq!(value.unwrap(), 5);
        assert_eq!(manager.local_lock_count(), 0);

        let failed: Result<u32, LockError> = manager
            .with_lock(&spec, &args, || async { Err(LockError::ShuttingDown) })
            .await;
        assert!(matches!(failed, Err(LockError::ShuttingDown)));
        assert_eq!(manager.local_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_with_lock_key_resolution_error() {
        let manager = LockManager::local_only();
        let spec = manager.spec("deletePost", "#postId").unwrap();
        let result: Result<(), LockError> = manager
            .with_lock(&spec, &KeyArgs::new(), || async { Ok(()) })
            .await;
        assert!(matches!(
            result,
            Err(LockError::KeyResolution(KeyError::UnboundVariable { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_release_waits_for_commit() {
        let client = Arc::new(MemoryLockClient::new());
        let manager = manager_with(client.clone());
        let spec = manager.spec("approveJoining", "'group:' + #groupId").unwrap();
        let args = KeyArgs::new().arg("groupId", 42);

        let tx = TransactionScope::begin();
        let result: Result<(), LockError> = manager
            .with_lock_in(&tx, &spec, &args, || async { Ok(()) })
            .await;
        result.unwrap();

        assert!(client.is_locked("approveJoining:group:42").await.unwrap());
        assert_eq!(tx.pending_callbacks(), 1);

        tx.commit().await;
        assert!(!client.is_locked("approveJoining:group:42").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_release_on_rollback_after_error() {
        let manager = LockManager::local_only();
        let spec = manager.spec("approveJoining", "'group:' + #groupId").unwrap();
        let args = KeyArgs::new().arg("groupId", 42);

        let tx = TransactionScope::begin();
        let result: Result<(), LockError> = manager
            .with_lock_in(&tx, &spec, &args, || async { Err(LockError::ShuttingDown) })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.local_lock_count(), 1);

        tx.rollback().await;
        assert_eq!(manager.local_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_register_deferred_release_without_transaction() {
        let manager = LockManager::local_only();
        let key = LockKey::new("op:1");
        let acq = manager.acquire(&key, DEFAULT_MAX_WAIT, DEFAULT_LEASE).await.unwrap();
        assert!(!manager.register_deferred_release(acq, &NoTransaction).await);
        assert_eq!(manager.local_lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_wait_counts_against_max_wait() {
        let manager = Arc::new(LockManager::builder().max_concurrent(1).build());
        let busy = LockKey::new("busy");
        let held = manager.acquire(&busy, DEFAULT_MAX_WAIT, DEFAULT_LEASE).await.unwrap();

        // Occupies the only slot while retrying against the held key.
        let waiter = {
            let manager = manager.clone();
            let busy = busy.clone();
            tokio::spawn(async move {
                manager
                    .acquire(&busy, Duration::from_secs(30), DEFAULT_LEASE)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let started = Instant::now();
        let acq = manager
            .acquire(&LockKey::new("unrelated"), Duration::from_millis(100), DEFAULT_LEASE)
            .await
            .unwrap();
        assert!(!acq.acquired);
        assert!(started.elapsed() <= Duration::from_millis(200));

        let ran = AtomicUsize::new(0);
        let result: Result<(), LockError> = manager
            .with_lock_key(LockKey::new("unrelated"), Duration::from_millis(100), DEFAULT_LEASE, || async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LockError::AcquisitionTimeout { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        held.release().await;
        let late = waiter.await.unwrap().unwrap();
        assert!(late.acquired);
        late.release().await;
        assert_eq!(manager.local_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_acquisitions() {
        let manager = LockManager::local_only();
        assert!(manager.shutdown(Duration::from_millis(10)).await);
        let result = manager
            .acquire(&LockKey::new("k"), DEFAULT_MAX_WAIT, DEFAULT_LEASE)
            .await;
        assert!(matches!(result, Err(LockError::ShuttingDown)));
    }
}
