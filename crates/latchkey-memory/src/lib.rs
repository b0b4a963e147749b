//! In-process backends for latchkey.
//!
//! [`MemoryCacheStore`] and [`MemoryLockClient`] implement the store and lock
//! contracts from `latchkey-core` on top of `DashMap`. They back single-instance
//! deployments and tests. Both can be switched into an unavailable state to
//! exercise the fallback and degradation paths without a real outage.

pub mod lock;
pub mod store;

pub use lock::MemoryLockClient;
pub use store::MemoryCacheStore;

/// Creates a shareable in-memory cache store.
pub fn create_cache_store() -> latchkey_core::DynCacheStore {
    std::sync::Arc::new(MemoryCacheStore::new())
}
