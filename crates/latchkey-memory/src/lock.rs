//! DashMap-backed distributed lock client.
//!
//! Behaves like the Redis client within a single process: reentrant per
//! owner, leases expire, and `force_unlock` ignores the holder. Used for
//! tests and for exercising the distributed code path without Redis.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use latchkey_core::{DistributedLockClient, StoreError, StoreResult};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    holds: u32,
    expires_at: Instant,
}

impl Lease {
    fn new(owner: &str, lease: Duration) -> Self {
        Self {
            owner: owner.to_string(),
            holds: 1,
            expires_at: Instant::now() + lease,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory [`DistributedLockClient`].
#[derive(Debug)]
pub struct MemoryLockClient {
    leases: DashMap<String, Lease>,
    available: AtomicBool,
    failing_unlocks: AtomicUsize,
}

impl Default for MemoryLockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockClient {
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
            available: AtomicBool::new(true),
            failing_unlocks: AtomicUsize::new(0),
        }
    }

    /// Simulates an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Makes the next `n` calls to `unlock` fail with a command error.
    pub fn fail_next_unlocks(&self, n: usize) {
        self.failing_unlocks.store(n, Ordering::SeqCst);
    }

    /// Number of keys currently held (expired leases excluded).
    pub fn held_count(&self) -> usize {
        self.leases.iter().filter(|l| !l.is_expired()).count()
    }

    /// Hold count of `key`, or 0 if unlocked.
    pub fn hold_count(&self, key: &str) -> u32 {
        self.leases
            .get(key)
            .filter(|l| !l.is_expired())
            .map_or(0, |l| l.holds)
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::unavailable("in-memory lock service switched off"))
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_unlocks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DistributedLockClient for MemoryLockClient {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn try_lock(&self, key: &str, owner: &str, lease: Duration) -> StoreResult<bool> {
        self.check()?;
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if current.is_expired() {
                    *current = Lease::new(owner, lease);
                    Ok(true)
                } else if current.owner == owner {
                    current.holds += 1;
                    current.expires_at = Instant::now() + lease;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Lease::new(owner, lease));
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, owner: &str) -> StoreResult<bool> {
        self.check()?;
        if self.take_injected_failure() {
            return Err(StoreError::command("injected unlock failure"));
        }
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if current.is_expired() {
                    occupied.remove();
                    return Ok(false);
                }
                if current.owner != owner {
                    return Ok(false);
                }
                current.holds -= 1;
                if current.holds == 0 {
                    occupied.remove();
                }
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn is_locked(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.leases.get(key).is_some_and(|l| !l.is_expired()))
    }

    async fn is_held_by(&self, key: &str, owner: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .leases
            .get(key)
            .is_some_and(|l| !l.is_expired() && l.owner == owner))
    }

    async fn force_unlock(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .leases
            .remove(key)
            .is_some_and(|(_, lease)| !lease.is_expired()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
