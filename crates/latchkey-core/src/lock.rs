//! Distributed lock service contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::StoreResult;

/// A remote lock service keyed by string, with per-owner reentrancy and lease expiry.
///
/// `owner` is an opaque token identifying the holder. A lock acquired `n`
/// times by the same owner is released after `n` unlocks, or when its lease
/// runs out.
#[async_trait]
pub trait DistributedLockClient: Send + Sync {
    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;

    /// Single non-blocking attempt. Returns `true` if `owner` now holds the lock.
    async fn try_lock(&self, key: &str, owner: &str, lease: Duration) -> StoreResult<bool>;

    /// Releases one hold. Returns `false` if `owner` did not hold the lock.
    async fn unlock(&self, key: &str, owner: &str) -> StoreResult<bool>;

    async fn is_locked(&self, key: &str) -> StoreResult<bool>;

    async fn is_held_by(&self, key: &str, owner: &str) -> StoreResult<bool>;

    /// Deletes the lock regardless of holder or hold count.
    async fn force_unlock(&self, key: &str) -> StoreResult<bool>;

    fn name(&self) -> &'static str {
        "unknown"
    }
}
