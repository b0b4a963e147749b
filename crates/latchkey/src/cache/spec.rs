use std::time::Duration;

use latchkey_core::{KeyArgs, generate_cache_key};

use crate::config::CacheConfig;

pub const DEFAULT_PREFIX: &str = "global";
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_VIEW_COUNT_TTL: Duration = Duration::from_secs(300);

const VIEW_COUNT_PREFIX: &str = "viewCount";
const UPDATE_SUFFIX: &str = "update";
const HISTORY_SUFFIX: &str = "history";

/// Caching rules for one read operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    pub prefix: String,
    /// Optional segment after the prefix.
    pub key: String,
    /// Name of the argument that identifies the entry. When empty or unbound,
    /// every argument value is appended instead.
    pub id: String,
    pub ttl: Duration,
    /// Count views per entry, at most once per user per `view_count_ttl`.
    pub view_count: bool,
    pub view_count_ttl: Duration,
    /// Record every accessed key in the prefix's history set.
    pub history: bool,
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            key: String::new(),
            id: String::new(),
            ttl: DEFAULT_TTL,
            view_count: false,
            view_count_ttl: DEFAULT_VIEW_COUNT_TTL,
            history: false,
        }
    }
}

impl From<&CacheConfig> for CacheSpec {
    fn from(config: &CacheConfig) -> Self {
        Self {
            prefix: config.default_prefix.clone(),
            ttl: Duration::from_secs(config.default_ttl_secs),
            view_count_ttl: Duration::from_secs(config.default_view_count_ttl_secs),
            ..Self::default()
        }
    }
}

impl CacheSpec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn view_count(mut self, enabled: bool) -> Self {
        self.view_count = enabled;
        self
    }

    #[must_use]
    pub fn view_count_ttl(mut self, ttl: Duration) -> Self {
        self.view_count_ttl = ttl;
        self
    }

    #[must_use]
    pub fn history(mut self, enabled: bool) -> Self {
        self.history = enabled;
        self
    }

    pub fn cache_key(&self, args: &KeyArgs) -> String {
        generate_cache_key(&self.prefix, &self.key, &self.id, args)
    }

    pub fn update_set_key(&self) -> String {
        update_set_key(&self.prefix)
    }

    pub fn history_key(&self) -> String {
        history_key(&self.prefix)
    }
}

/// Key rules for a write that invalidates a cached read.
///
/// Must name the same prefix, key and id as the read's [`CacheSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInvalidateSpec {
    pub prefix: String,
    pub key: String,
    pub id: String,
}

impl CacheInvalidateSpec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key: String::new(),
            id: String::new(),
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn cache_key(&self, args: &KeyArgs) -> String {
        generate_cache_key(&self.prefix, &self.key, &self.id, args)
    }
}

impl From<&CacheSpec> for CacheInvalidateSpec {
    fn from(spec: &CacheSpec) -> Self {
        Self {
            prefix: spec.prefix.clone(),
            key: spec.key.clone(),
            id: spec.id.clone(),
        }
    }
}

pub(crate) fn view_count_key(cache_key: &str) -> String {
    format!("{VIEW_COUNT_PREFIX}:{cache_key}")
}

pub(crate) fn view_marker_key(counter_key: &str, user_id: &str) -> String {
    format!("{counter_key}:user:{user_id}")
}

pub(crate) fn update_set_key(prefix: &str) -> String {
    format!("{prefix}:{UPDATE_SUFFIX}")
}

pub(crate) fn history_key(prefix: &str) -> String {
    format!("{prefix}:{HISTORY_SUFFIX}")
}
