//! Connection pool construction.

use std::time::Duration;

use deadpool_redis::{Pool, Runtime};
use latchkey_core::StoreError;

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub pool_size: usize,
    /// Applied to waiting for, creating and recycling connections.
    pub timeout: Duration,
}

impl PoolSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 10,
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Builds a pool without touching the network.
pub fn create_pool(settings: &PoolSettings) -> Result<Pool, StoreError> {
    let mut redis_config = deadpool_redis::Config::from_url(&settings.url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = settings.pool_size;
        pool_config.timeouts.wait = Some(settings.timeout);
        pool_config.timeouts.create = Some(settings.timeout);
        pool_config.timeouts.recycle = Some(settings.timeout);
    } else {
        let mut pool_config = deadpool_redis::PoolConfig::new(settings.pool_size);
        pool_config.timeouts.wait = Some(settings.timeout);
        pool_config.timeouts.create = Some(settings.timeout);
        pool_config.timeouts.recycle = Some(settings.timeout);
        redis_config.pool = Some(pool_config);
    }

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::connection(format!("failed to create Redis pool: {e}")))
}

/// Builds a pool and verifies that a connection answers `PING`.
pub async fn connect(settings: &PoolSettings) -> Result<Pool, StoreError> {
    let pool = create_pool(settings)?;
    ping(&pool).await?;
    tracing::info!(url = %settings.url, "Connected to Redis");
    Ok(pool)
}

/// Sends `PING` on a pooled connection.
pub async fn ping(pool: &Pool) -> Result<(), StoreError> {
    let mut conn = pool.get().await.map_err(connection_error)?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(command_error)?;
    Ok(())
}

pub(crate) fn connection_error(e: deadpool_redis::PoolError) -> StoreError {
    StoreError::connection(e.to_string())
}

pub(crate) fn command_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::connection(e.to_string())
    } else {
        StoreError::command(e.to_string())
    }
}
