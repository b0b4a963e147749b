//! Redis-backed distributed lock client.
//!
//! Each lock is a hash at `<namespace><key>` mapping the owner token to its
//! hold count, with a millisecond lease set by `PEXPIRE`. Acquire and release
//! run as Lua scripts so the ownership check and the write are atomic.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use latchkey_core::{DistributedLockClient, StoreResult};
use redis::{AsyncCommands, Script};

use crate::pool::{command_error, connection_error};

/// Key prefix used when none is configured.
pub const DEFAULT_LOCK_NAMESPACE: &str = "latchkey:lock:";

const LOCK_SCRIPT: &str = r"
if (redis.call('exists', KEYS[1]) == 0) or (redis.call('hexists', KEYS[1], ARGV[1]) == 1) then
    redis.call('hincrby', KEYS[1], ARGV[1], 1)
    redis.call('pexpire', KEYS[1], ARGV[2])
    return 1
end
return 0
";

const UNLOCK_SCRIPT: &str = r"
if redis.call('hexists', KEYS[1], ARGV[1]) == 0 then
    return -1
end
local remaining = redis.call('hincrby', KEYS[1], ARGV[1], -1)
if remaining > 0 then
    return 0
end
redis.call('del', KEYS[1])
return 1
";

/// [`DistributedLockClient`] over a shared Redis pool.
#[derive(Clone)]
pub struct RedisLockClient {
    pool: Pool,
    namespace: String,
    lock_script: Script,
    unlock_script: Script,
}

impl RedisLockClient {
    pub fn new(pool: Pool) -> Self {
        Self::with_namespace(pool, DEFAULT_LOCK_NAMESPACE)
    }

    pub fn with_namespace(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            lock_script: Script::new(LOCK_SCRIPT),
            unlock_script: Script::new(UNLOCK_SCRIPT),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool.get().await.map_err(connection_error)
    }
}

#[async_trait]
impl DistributedLockClient for RedisLockClient {
    async fn ping(&self) -> StoreResult<()> {
        crate::pool::ping(&self.pool).await
    }

    async fn try_lock(&self, key: &str, owner: &str, lease: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let acquired: i64 = self
            .lock_script
            .key(self.redis_key(key))
            .arg(owner)
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(acquired == 1)
    }

    async fn unlock(&self, key: &str, owner: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let released: i64 = self
            .unlock_script
            .key(self.redis_key(key))
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(released >= 0)
    }

    async fn is_locked(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let locked: bool = conn
            .exists(self.redis_key(key))
            .await
            .map_err(command_error)?;
        Ok(locked)
    }

    async fn is_held_by(&self, key: &str, owner: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let held: bool = conn
            .hexists(self.redis_key(key), owner)
            .await
            .map_err(command_error)?;
        Ok(held)
    }

    async fn force_unlock(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .del(self.redis_key(key))
            .await
            .map_err(command_error)?;
        Ok(removed > 0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
