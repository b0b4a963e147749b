//! Process-local locks keyed by string.
//!
//! Used when the lock service is unreachable. Each key maps to a shared async
//! mutex plus a count of tasks holding or waiting for it; the entry is removed
//! when the last of them lets go, so the map only holds contended keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use latchkey_core::LockError;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::retry::TryLock;

#[derive(Debug, Default)]
struct LocalLockEntry {
    mutex: Arc<Mutex<()>>,
    contenders: AtomicUsize,
}

type EntryMap = DashMap<String, Arc<LocalLockEntry>>;

/// Key to mutex registry owned by a lock manager.
#[derive(Debug, Clone, Default)]
pub struct LocalLockRegistry {
    locks: Arc<EntryMap>,
}

impl LocalLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, creating it if needed, and registers the
    /// caller as a contender. The registration ends when the ticket drops.
    pub fn get_or_create(&self, key: &str) -> RegistryTicket {
        let entry = {
            // The count is bumped under the shard lock so a concurrent
            // release cannot remove the entry between lookup and increment.
            let slot = self.locks.entry(key.to_string()).or_default();
            slot.contenders.fetch_add(1, Ordering::AcqRel);
            Arc::clone(slot.value())
        };
        RegistryTicket {
            locks: Arc::clone(&self.locks),
            key: key.to_string(),
            entry,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Begins a local acquisition for `key`.
    pub fn attempt(&self, key: &str) -> LocalAttempt {
        LocalAttempt {
            ticket: self.get_or_create(key),
            guard: None,
        }
    }
}

fn release_if_uncontended(locks: &EntryMap, key: &str, entry: &Arc<LocalLockEntry>) {
    entry.contenders.fetch_sub(1, Ordering::AcqRel);
    locks.remove_if(key, |_, current| {
        Arc::ptr_eq(current, entry) && current.contenders.load(Ordering::Acquire) == 0
    });
}

/// A registered interest in one registry entry.
#[derive(Debug)]
pub struct RegistryTicket {
    locks: Arc<EntryMap>,
    key: String,
    entry: Arc<LocalLockEntry>,
}

impl RegistryTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RegistryTicket {
    fn drop(&mut self) {
        release_if_uncontended(&self.locks, &self.key, &self.entry);
    }
}

/// A pending local acquisition driven by the retry loop.
#[derive(Debug)]
pub struct LocalAttempt {
    ticket: RegistryTicket,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LocalAttempt {
    /// The held lock, if the attempt succeeded.
    pub fn into_guard(self) -> Option<LocalLockGuard> {
        let LocalAttempt { ticket, guard } = self;
        guard.map(|guard| LocalLockGuard {
            _guard: guard,
            ticket,
        })
    }
}

#[async_trait]
impl TryLock for LocalAttempt {
    fn key(&self) -> &str {
        self.ticket.key()
    }

    /// Local locks have no lease; they are held until released.
    async fn try_lock(&mut self, _lease: Duration) -> Result<bool, LockError> {
        if self.guard.is_some() {
            return Ok(true);
        }
        match Arc::clone(&self.ticket.entry.mutex).try_lock_owned() {
            Ok(guard) => {
                self.guard = Some(guard);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

/// A held local lock. Dropping it unlocks and releases the registry slot.
#[derive(Debug)]
pub struct LocalLockGuard {
    // Field order matters: the mutex is unlocked before the ticket gives up
    // its registry slot.
    _guard: OwnedMutexGuard<()>,
    ticket: RegistryTicket,
}

impl LocalLockGuard {
    pub fn key(&self) -> &str {
        self.ticket.key()
    }
}
