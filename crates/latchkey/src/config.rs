use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Redis connection shared by the lock client and the cache store
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Redis validations
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.timeout_ms == 0 {
                return Err("redis.timeout_ms must be > 0".into());
            }
        }
        // Lock validations
        if self.lock.default_lease_ms == 0 {
            return Err("lock.default_lease_ms must be > 0".into());
        }
        if self.lock.base_backoff_ms == 0 {
            return Err("lock.base_backoff_ms must be > 0".into());
        }
        if self.lock.probe_timeout_ms == 0 {
            return Err("lock.probe_timeout_ms must be > 0".into());
        }
        if self.lock.max_concurrent_acquisitions == 0 {
            return Err("lock.max_concurrent_acquisitions must be > 0".into());
        }
        // Cache validations
        if self.cache.default_prefix.is_empty() {
            return Err("cache.default_prefix must not be empty".into());
        }
        if self.cache.default_ttl_secs == 0 || self.cache.default_view_count_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. Without it locks are process-local and the cache is in-memory.
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Key prefix for lock hashes
    #[serde(default = "default_lock_namespace")]
    pub lock_namespace: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_lock_namespace() -> String {
    latchkey_redis::DEFAULT_LOCK_NAMESPACE.to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            lock_namespace: default_lock_namespace(),
        }
    }
}

impl RedisConfig {
    pub fn pool_settings(&self) -> latchkey_redis::PoolSettings {
        latchkey_redis::PoolSettings {
            url: self.url.clone(),
            pool_size: self.pool_size,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_max_wait_ms")]
    pub default_max_wait_ms: u64,
    #[serde(default = "default_lease_ms")]
    pub default_lease_ms: u64,
    /// First retry delay; doubled after every failed attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Upper bound on one retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// How long the liveness probe may take before falling back to the local lock
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_acquisitions")]
    pub max_concurrent_acquisitions: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_unlock_retry_count")]
    pub unlock_retry_count: u32,
    #[serde(default = "default_unlock_retry_delay_ms")]
    pub unlock_retry_delay_ms: u64,
}

fn default_max_wait_ms() -> u64 {
    1000
}
fn default_lease_ms() -> u64 {
    5000
}
fn default_base_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    5000
}
fn default_probe_timeout_ms() -> u64 {
    500
}
fn default_max_concurrent_acquisitions() -> usize {
    1024
}
fn default_shutdown_timeout_ms() -> u64 {
    5000
}
fn default_unlock_retry_count() -> u32 {
    3
}
fn default_unlock_retry_delay_ms() -> u64 {
    100
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_max_wait_ms: default_max_wait_ms(),
            default_lease_ms: default_lease_ms(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_concurrent_acquisitions: default_max_concurrent_acquisitions(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            unlock_retry_count: default_unlock_retry_count(),
            unlock_retry_delay_ms: default_unlock_retry_delay_ms(),
        }
    }
}

impl LockConfig {
    pub fn default_max_wait(&self) -> Duration {
        Duration::from_millis(self.default_max_wait_ms)
    }
    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_prefix")]
    pub default_prefix: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_view_count_ttl_secs: u64,
}

fn default_cache_prefix() -> String {
    "global".into()
}
fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_prefix: default_cache_prefix(),
            default_ttl_secs: default_cache_ttl_secs(),
            default_view_count_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "latchkey.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., LATCHKEY__LOCK__DEFAULT_MAX_WAIT_MS=2000
        builder = builder.add_source(
            Environment::with_prefix("LATCHKEY")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
