//! Key/value store contract used by the cache-aside layer.

use std::time::Duration;

use async_trait::async_trait;

use crate::StoreResult;

/// A remote (or in-process) key/value store with TTLs, counters and sets.
///
/// Values are opaque bytes; encoding is the caller's concern. Every method
/// may fail with a [`StoreError`](crate::StoreError) when the backend is
/// unreachable, and callers decide whether to degrade or propagate.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored bytes, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()>;

    /// Stores `value` only if `key` is absent. Returns `true` if it was stored.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool>;

    /// Removes `key`. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increments the integer at `key` (created at 0) and returns the new value.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Adds `member` to the set at `key`. Returns `true` if it was not present.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
