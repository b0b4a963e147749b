//! Redis backends for latchkey.
//!
//! - [`RedisCacheStore`]: cache values, counters and sets as plain Redis keys
//! - [`RedisLockClient`]: reentrant leased locks stored as hashes
//!   (`owner -> hold count`) and driven by Lua scripts
//!
//! Both share a `deadpool-redis` pool built by [`create_pool`].

pub mod lock;
pub mod pool;
pub mod store;

pub use lock::{DEFAULT_LOCK_NAMESPACE, RedisLockClient};
pub use pool::{PoolSettings, connect, create_pool, ping};
pub use store::RedisCacheStore;

pub use deadpool_redis::Pool;
