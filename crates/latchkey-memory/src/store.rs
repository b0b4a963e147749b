//! DashMap-backed cache store with TTL support.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indexmap::IndexSet;
use latchkey_core::{CacheStore, StoreError, StoreResult};
use tokio::time::Instant;

/// A stored value with optional expiry.
#[derive(Clone, Debug)]
struct CachedEntry {
    data: Vec<u8>,
    cached_at: Instant,
    ttl: Option<Duration>,
}

impl CachedEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.cached_at.elapsed() >= ttl)
    }
}

/// In-memory [`CacheStore`].
///
/// Expired entries are dropped lazily on access. Sets never expire. Counters
/// created by `increment` have no TTL; incrementing an existing entry keeps
/// its remaining TTL, like Redis `INCR`.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CachedEntry>,
    sets: DashMap<String, IndexSet<String>>,
    available: AtomicBool,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sets: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of live (non-expired) values, excluding sets.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::unavailable("in-memory store switched off"))
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, Some(ttl)));
        tracing::trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "memory cache set");
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(CachedEntry::new(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedEntry::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        let value = self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired());
        let set = self.sets.remove(key).is_some();
        Ok(value || set)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        let value = self.entries.get(key).is_some_and(|e| !e.is_expired());
        Ok(value || self.sets.contains_key(key))
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.check()?;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CachedEntry::new(b"0".to_vec(), None));
        if entry.is_expired() {
            *entry = CachedEntry::new(b"0".to_vec(), None);
        }
        let current = std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| StoreError::command(format!("value at '{key}' is not an integer")))?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::command(format!("increment of '{key}' overflows")))?;
        entry.data = next.to_string().into_bytes();
        Ok(next)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
