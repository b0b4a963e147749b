//! Adapter over a [`DistributedLockClient`] for one key and one holder.

use std::time::Duration;

use async_trait::async_trait;
use latchkey_core::{DynLockClient, LockError, StoreResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::retry::TryLock;

/// How hard to try when releasing a distributed lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockPolicy {
    /// Retries after the first failed unlock before forcing.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for UnlockPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// One acquisition of a distributed lock.
///
/// Every instance has its own owner token, so two acquisitions of the same
/// key from the same process exclude each other like any two holders would.
pub struct DistributedLock {
    client: DynLockClient,
    key: String,
    owner: String,
    policy: UnlockPolicy,
    held: bool,
    in_flight: bool,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("held", &self.held)
            .finish()
    }
}

impl DistributedLock {
    pub fn new(client: DynLockClient, key: impl Into<String>, policy: UnlockPolicy) -> Self {
        Self {
            client,
            key: key.into(),
            owner: Uuid::new_v4().to_string(),
            policy,
            held: false,
            in_flight: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Releases the lock. Failures are retried and finally forced; nothing is
    /// returned because the protected work has already finished.
    ///
    /// Forcing deletes the lock regardless of hold count. If unlock keeps
    /// failing while the lease is still needed, another holder may enter
    /// early; this favours liveness over strict exclusion.
    pub async fn unlock(mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        release(&self.client, &self.key, &self.owner, self.policy).await;
    }
}

#[async_trait]
impl TryLock for DistributedLock {
    fn key(&self) -> &str {
        &self.key
    }

    /// Store errors count as a failed attempt; the retry loop keeps going
    /// until the wait budget runs out.
    async fn try_lock(&mut self, lease: Duration) -> Result<bool, LockError> {
        if self.held {
            return Ok(true);
        }
        self.in_flight = true;
        let result = self.client.try_lock(&self.key, &self.owner, lease).await;
        self.in_flight = false;
        match result {
            Ok(acquired) => {
                self.held = acquired;
                Ok(acquired)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Distributed lock attempt failed");
                Ok(false)
            }
        }
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if !self.held && !self.in_flight {
            return;
        }
        // A cancelled in-flight attempt may have succeeded server-side.
        let client = self.client.clone();
        let key = std::mem::take(&mut self.key);
        let owner = std::mem::take(&mut self.owner);
        let policy = self.policy;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "Releasing dropped distributed lock in background");
                handle.spawn(async move {
                    release(&client, &key, &owner, policy).await;
                });
            }
            Err(_) => {
                warn!(key = %key, "No runtime to release dropped distributed lock; lease expiry will free it");
            }
        }
    }
}

async fn unlock_if_held(client: &DynLockClient, key: &str, owner: &str) -> StoreResult<()> {
    if client.is_locked(key).await? && client.is_held_by(key, owner).await? {
        client.unlock(key, owner).await?;
        info!(key = %key, "Distributed lock unlocked");
    }
    Ok(())
}

async fn release(client: &DynLockClient, key: &str, owner: &str, policy: UnlockPolicy) {
    let attempts = policy.retry_count + 1;
    for attempt in 1..=attempts {
        match unlock_if_held(client, key, owner).await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    attempt,
                    max_attempts = attempts,
                    "Failed to unlock distributed lock"
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }
    force_unlock(client, key, owner).await;
}

async fn force_unlock(client: &DynLockClient, key: &str, owner: &str) {
    let held = match client.is_locked(key).await {
        Ok(true) => client.is_held_by(key, owner).await.unwrap_or(false),
        _ => false,
    };
    if !held {
        warn!(key = %key, "Skipping force unlock, lock is not held by this owner");
        return;
    }
    match client.force_unlock(key).await {
        Ok(_) => {
            crate::metrics::record_force_unlock();
            warn!(key = %key, "Distributed lock forcefully unlocked after max retries");
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Force unlock failed; lease expiry will free the lock");
        }
    }
}

/// Liveness check used to choose between distributed and local locking.
///
/// Errors and timeouts both mean "unavailable"; neither is propagated.
pub async fn probe(client: &DynLockClient, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, client.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(backend = client.name(), error = %e, "Lock service is not available, switching to local lock");
            false
        }
        Err(_) => {
            warn!(
                backend = client.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Lock service did not answer in time, switching to local lock"
            );
            false
        }
    }
}
