//! Distributed locks with a local fallback, and cache-aside wrappers.
//!
//! [`Latchkey::from_config`] wires everything from an [`AppConfig`]: with
//! Redis enabled, locks go through a Redis lock service and cached values
//! live in Redis; otherwise both stay in-process.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use latchkey::{Latchkey, KeyArgs, LockError, RequestIdentity};
//! use latchkey::config::loader::load_config;
//!
//! let config = load_config(None)?;
//! let latchkey = Latchkey::from_config(&config, Arc::new(RequestIdentity)).await?;
//!
//! let spec = latchkey.locks().spec("approveJoining", "'group:' + #groupId + '-member:' + #memberId")?;
//! let args = KeyArgs::new().arg("groupId", 42).arg("memberId", 7);
//! latchkey
//!     .locks()
//!     .with_lock(&spec, &args, || async { Ok::<_, LockError>(()) })
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod lock;
pub mod metrics;
pub mod observability;

use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheAside, CacheInvalidateSpec, CacheSpec, ViewCount};
pub use config::AppConfig;
pub use latchkey_core::{
    AnonymousIdentity, ArgValue, DynCacheStore, DynLockClient, FixedIdentity, IdentityProvider,
    KeyArgs, KeyError, KeyTemplate, KeyVariant, LockError, LockKey, NoTransaction,
    RequestIdentity, StoreError, TransactionContext, TransactionOutcome, TransactionScope,
};
pub use lock::{LockAcquisition, LockBackend, LockManager, LockSpec, UnlockPolicy};

use latchkey_memory::MemoryCacheStore;
use latchkey_redis::{RedisCacheStore, RedisLockClient};
use tracing::{info, warn};

/// Lock manager and cache-aside layer sharing one configuration.
#[derive(Clone)]
pub struct Latchkey {
    locks: Arc<LockManager>,
    cache: CacheAside,
    config: Arc<AppConfig>,
}

impl Latchkey {
    /// Builds both components from `config`.
    ///
    /// A Redis that cannot be reached at startup is not fatal: locks fall back
    /// per call until it answers, and cache calls pass through.
    pub async fn from_config(
        config: &AppConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, String> {
        config.validate()?;

        let lock_config = &config.lock;
        let mut builder = LockManager::builder()
            .base_delay(Duration::from_millis(lock_config.base_backoff_ms))
            .max_delay(Duration::from_millis(lock_config.max_backoff_ms))
            .probe_timeout(Duration::from_millis(lock_config.probe_timeout_ms))
            .max_concurrent(lock_config.max_concurrent_acquisitions)
            .unlock_policy(UnlockPolicy {
                retry_count: lock_config.unlock_retry_count,
                retry_delay: Duration::from_millis(lock_config.unlock_retry_delay_ms),
            })
            .default_max_wait(lock_config.default_max_wait())
            .default_lease(lock_config.default_lease());

        let store: DynCacheStore = if config.redis.enabled {
            let pool = latchkey_redis::create_pool(&config.redis.pool_settings())
                .map_err(|e| format!("Failed to create Redis pool: {e}"))?;

            match latchkey_redis::ping(&pool).await {
                Ok(()) => info!(url = %config.redis.url, "Using Redis for locks and cache"),
                Err(e) => warn!(
                    url = %config.redis.url,
                    error = %e,
                    "Redis not reachable at startup; locks will fall back to local until it is"
                ),
            }

            builder = builder.distributed(Arc::new(RedisLockClient::with_namespace(
                pool.clone(),
                config.redis.lock_namespace.clone(),
            )));
            Arc::new(RedisCacheStore::new(pool))
        } else {
            info!("Redis disabled; using local locks and in-memory cache");
            Arc::new(MemoryCacheStore::new())
        };

        Ok(Self {
            locks: Arc::new(builder.build()),
            cache: CacheAside::new(store, identity),
            config: Arc::new(config.clone()),
        })
    }

    /// Assembles from already built parts.
    pub fn new(locks: LockManager, cache: CacheAside, config: AppConfig) -> Self {
        Self {
            locks: Arc::new(locks),
            cache,
            config: Arc::new(config),
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// A [`CacheSpec`] for `prefix` carrying the configured TTLs.
    pub fn cache_spec(&self, prefix: impl Into<String>) -> CacheSpec {
        CacheSpec::from(&self.config.cache).prefix(prefix)
    }

    /// Stops accepting lock acquisitions and waits for running ones, up to
    /// the configured shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        self.locks.shutdown(self.config.lock.shutdown_timeout()).await
    }
}
