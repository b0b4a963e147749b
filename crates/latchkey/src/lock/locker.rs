//! Backend strategies behind the lock manager.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use latchkey_core::{DynLockClient, LockError};
use tokio_util::sync::CancellationToken;

use super::distributed::{self, DistributedLock, UnlockPolicy};
use super::local::{LocalLockGuard, LocalLockRegistry};
use super::retry::RetryBackoff;

/// Which backend an acquisition went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockBackend {
    Distributed,
    Local,
}

impl LockBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distributed => "distributed",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for LockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A held lock. The variant fixes how it is released.
#[derive(Debug)]
pub enum LockHandle {
    Distributed(DistributedLock),
    Local(LocalLockGuard),
}

impl LockHandle {
    pub fn backend(&self) -> LockBackend {
        match self {
            Self::Distributed(_) => LockBackend::Distributed,
            Self::Local(_) => LockBackend::Local,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Distributed(lock) => lock.key(),
            Self::Local(guard) => guard.key(),
        }
    }

    pub async fn release(self) {
        match self {
            Self::Distributed(lock) => lock.unlock().await,
            Self::Local(guard) => drop(guard),
        }
    }
}

/// Acquires locks through one backend.
#[async_trait]
pub trait Locker: Send + Sync {
    fn backend(&self) -> LockBackend;

    /// Runs the retry loop. `Ok(None)` means the wait budget ran out.
    async fn acquire(
        &self,
        key: &str,
        max_wait: Duration,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError>;
}

/// In-process locking through a [`LocalLockRegistry`].
#[derive(Debug, Clone)]
pub struct LocalLocker {
    registry: LocalLockRegistry,
    backoff: RetryBackoff,
}

impl LocalLocker {
    pub fn new(backoff: RetryBackoff) -> Self {
        Self {
            registry: LocalLockRegistry::new(),
            backoff,
        }
    }

    pub fn registry(&self) -> &LocalLockRegistry {
        &self.registry
    }
}

#[async_trait]
impl Locker for LocalLocker {
    fn backend(&self) -> LockBackend {
        LockBackend::Local
    }

    async fn acquire(
        &self,
        key: &str,
        max_wait: Duration,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError> {
        let mut attempt = self.registry.attempt(key);
        if self.backoff.acquire(&mut attempt, max_wait, lease, cancel).await? {
            Ok(attempt.into_guard().map(LockHandle::Local))
        } else {
            Ok(None)
        }
    }
}

/// Locking through a remote lock service.
#[derive(Clone)]
pub struct DistributedLocker {
    client: DynLockClient,
    backoff: RetryBackoff,
    unlock_policy: UnlockPolicy,
    probe_timeout: Duration,
}

impl fmt::Debug for DistributedLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLocker")
            .field("client", &self.client.name())
            .field("backoff", &self.backoff)
            .field("unlock_policy", &self.unlock_policy)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl DistributedLocker {
    pub fn new(
        client: DynLockClient,
        backoff: RetryBackoff,
        unlock_policy: UnlockPolicy,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            backoff,
            unlock_policy,
            probe_timeout,
        }
    }

    /// Liveness probe; see [`distributed::probe`].
    pub async fn is_available(&self) -> bool {
        distributed::probe(&self.client, self.probe_timeout).await
    }
}

#[async_trait]
impl Locker for DistributedLocker {
    fn backend(&self) -> LockBackend {
        LockBackend::Distributed
    }

    async fn acquire(
        &self,
        key: &str,
        max_wait: Duration,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LockHandle>, LockError> {
        let mut lock = DistributedLock::new(self.client.clone(), key, self.unlock_policy);
        if self.backoff.acquire(&mut lock, max_wait, lease, cancel).await? {
            Ok(Some(LockHandle::Distributed(lock)))
        } else {
            Ok(None)
        }
    }
}
