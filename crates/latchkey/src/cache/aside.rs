//! Cache-aside wrappers around async operations.
//!
//! Caching here is best effort. Any store failure is logged and the wrapped
//! operation runs as if there were no cache; callers never see a store error
//! from [`CacheAside::with_cache`] or [`CacheAside::with_cache_invalidate`].

use std::future::Future;
use std::sync::Arc;

use latchkey_core::{DynCacheStore, IdentityProvider, KeyArgs, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::spec::{
    CacheInvalidateSpec, CacheSpec, history_key, update_set_key, view_count_key, view_marker_key,
};

/// A drained view counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCount {
    /// The counter's store key, e.g. `viewCount:post:10`.
    pub counter_key: String,
    /// Segment after the last `:`, usually the entity id.
    pub id: String,
    pub count: i64,
}

enum Lookup<T> {
    Hit(T),
    Miss,
    /// The store failed; skip the write-back too.
    Unavailable,
}

/// Cache-aside interceptor over a shared store.
#[derive(Clone)]
pub struct CacheAside {
    store: DynCacheStore,
    identity: Arc<dyn IdentityProvider>,
}

impl CacheAside {
    pub fn new(store: DynCacheStore, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    pub fn store(&self) -> &DynCacheStore {
        &self.store
    }

    /// Returns the cached result for this call, or runs `f` and caches its
    /// `Ok` value for `spec.ttl`.
    ///
    /// `f` runs at most once. Its errors are returned unchanged and never cached.
    pub async fn with_cache<T, E, F, Fut>(&self, spec: &CacheSpec, args: &KeyArgs, f: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cache_key = spec.cache_key(args);

        if spec.view_count {
            self.record_view(spec, &cache_key).await;
        }

        let lookup = self.lookup::<T>(&cache_key).await;

        if spec.history {
            if let Err(e) = self.store.set_add(&spec.history_key(), &cache_key).await {
                swallow("history", &cache_key, &e);
            }
        }

        match lookup {
            Lookup::Hit(value) => {
                crate::metrics::record_cache_hit();
                debug!(key = %cache_key, "cache hit");
                Ok(value)
            }
            Lookup::Miss => {
                crate::metrics::record_cache_miss();
                debug!(key = %cache_key, "cache miss");
                let value = f().await?;
                self.write(&cache_key, &value, spec).await;
                Ok(value)
            }
            Lookup::Unavailable => f().await,
        }
    }

    /// Deletes the cached entry for this call, then runs `f`.
    pub async fn with_cache_invalidate<T, E, F, Fut>(
        &self,
        spec: &CacheInvalidateSpec,
        args: &KeyArgs,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cache_key = spec.cache_key(args);
        match self.store.delete(&cache_key).await {
            Ok(removed) => debug!(key = %cache_key, removed, "cache invalidated"),
            Err(e) => swallow("delete", &cache_key, &e),
        }
        f().await
    }

    async fn record_view(&self, spec: &CacheSpec, cache_key: &str) {
        let Some(user_id) = self.identity.current_user_id() else {
            debug!(key = %cache_key, "No user identity; view not counted");
            return;
        };
        let counter_key = view_count_key(cache_key);
        let marker = view_marker_key(&counter_key, &user_id);

        match self
            .store
            .set_if_absent(&marker, b"1".to_vec(), spec.view_count_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = %counter_key, user_id = %user_id, "View already counted in this window");
                return;
            }
            Err(e) => {
                swallow("view_count", &marker, &e);
                return;
            }
        }

        if let Err(e) = self.store.increment(&counter_key).await {
            swallow("view_count", &counter_key, &e);
            return;
        }
        if let Err(e) = self.store.set_add(&spec.update_set_key(), &counter_key).await {
            swallow("view_count", &counter_key, &e);
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, cache_key: &str) -> Lookup<T> {
        match self.store.get(cache_key).await {
            Ok(Some(bytes)) => match rmp_serde::from_slice::<T>(&bytes) {
                Ok(value) => Lookup::Hit(value),
                Err(e) => {
                    warn!(key = %cache_key, error = %e, "Cached value could not be decoded; treating as miss");
                    crate::metrics::record_cache_error("decode");
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(e) => {
                swallow("get", cache_key, &e);
                Lookup::Unavailable
            }
        }
    }

    async fn write<T: Serialize>(&self, cache_key: &str, value: &T, spec: &CacheSpec) {
        let bytes = match rmp_serde::to_vec_named(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                swallow("set", cache_key, &StoreError::serialization(e.to_string()));
                return;
            }
        };
        if let Err(e) = self.store.set(cache_key, bytes, spec.ttl).await {
            swallow("set", cache_key, &e);
        }
    }

    /// Reads and resets the view counters touched under `prefix`.
    ///
    /// Counters incremented between the read and the reset may be lost.
    pub async fn drain_view_counts(&self, prefix: &str) -> Result<Vec<ViewCount>, StoreError> {
        let update_key = update_set_key(prefix);
        let members = self.store.set_members(&update_key).await?;
        if members.is_empty() {
            info!(prefix, "No view counts to drain");
            return Ok(Vec::new());
        }

        let mut drained = Vec::with_capacity(members.len());
        for counter_key in members {
            let Some(bytes) = self.store.get(&counter_key).await? else {
                continue;
            };
            let count = match std::str::from_utf8(&bytes).ok().and_then(|s| s.parse::<i64>().ok()) {
                Some(count) => count,
                None => {
                    warn!(key = %counter_key, "View counter is not an integer; skipping");
                    continue;
                }
            };
            self.store.delete(&counter_key).await?;
            let id = counter_key
                .rsplit(':')
                .next()
                .unwrap_or(counter_key.as_str())
                .to_string();
            drained.push(ViewCount {
                counter_key,
                id,
                count,
            });
        }
        self.store.delete(&update_key).await?;

        info!(prefix, drained = drained.len(), "View counts drained");
        Ok(drained)
    }

    /// Cache keys recorded as accessed under `prefix`.
    pub async fn history(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.store.set_members(&history_key(prefix)).await
    }

    pub async fn clear_history(&self, prefix: &str) -> Result<bool, StoreError> {
        self.store.delete(&history_key(prefix)).await
    }
}

fn swallow(op: &'static str, key: &str, error: &StoreError) {
    crate::metrics::record_cache_error(op);
    warn!(op, key = %key, error = %error, "Cache store error ignored");
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use latchkey_core::{AnonymousIdentity, CacheStore, FixedIdentity};
    use latchkey_memory::MemoryCacheStore;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: i64,
        title: String,
    }

    fn setup(identity: Arc<dyn IdentityProvider>) -> (Arc<MemoryCacheStore>, CacheAside) {
        let store = Arc::new(MemoryCacheStore::new());
        let aside = CacheAside::new(store.clone(), identity);
        (store, aside)
    }

    async fn load(aside: &CacheAside, spec: &CacheSpec, id: i64, calls: &AtomicUsize) -> Post {
        let args = KeyArgs::new().arg("postId", id);
        aside
            .with_cache(spec, &args, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(Post {
                    id,
                    title: format!("post {id}"),
                })
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hit_skips_operation() {
        let (store, aside) = setup(Arc::new(AnonymousIdentity));
        let spec = CacheSpec::new("post").id("postId");
        let calls = AtomicUsize::new(0);

        let first = load(&aside, &spec, 10, &calls).await;
        let second = load(&aside, &spec, 10, &calls).await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.exists("post:10").await.unwrap());
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (store, aside) = setup(Arc::new(AnonymousIdentity));
        let spec = CacheSpec::new("post").id("postId");
        let args = KeyArgs::new().arg("postId", 1);

        let result: Result<Post, &str> = aside
            .with_cache(&spec, &args, || async { Err("not found") })
            .await;
        assert_eq!(result.unwrap_err(), "not found");
        assert!(!store.exists("post:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_overwritten() {
        let (store, aside) = setup(Arc::new(AnonymousIdentity));
        let spec = CacheSpec::new("post").id("postId");
        store
            .set("post:10", b"\xc1garbage".to_vec(), spec.ttl)
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        load(&aside, &spec, 10, &calls).await;
        load(&aside, &spec, 10, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_passes_through() {
        let (store, aside) = setup(Arc::new(FixedIdentity::new("7")));
        store.set_available(false);
        let spec = CacheSpec::new("post")
            .id("postId")
            .view_count(true)
            .history(true);
        let calls = AtomicUsize::new(0);

        let post = load(&aside, &spec, 10, &calls).await;
        assert_eq!(post.id, 10);
        load(&aside, &spec, 10, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        store.set_available(true);
        assert!(!store.exists("post:10").await.unwrap());
    }

    #[tokio::test]
    async fn test_view_count_once_per_user() {
        let store = Arc::new(MemoryCacheStore::new());
        let spec = CacheSpec::new("post").id("postId").view_count(true);
        let calls = AtomicUsize::new(0);

        let alice = CacheAside::new(store.clone(), Arc::new(FixedIdentity::new("alice")));
        let bob = CacheAside::new(store.clone(), Arc::new(FixedIdentity::new("bob")));
        load(&alice, &spec, 10, &calls).await;
        load(&alice, &spec, 10, &calls).await;
        load(&bob, &spec, 10, &calls).await;

        assert_eq!(store.get("viewCount:post:10").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(
            store.set_members("post:update").await.unwrap(),
            vec!["viewCount:post:10".to_string()]
        );
    }

    #[tokio::test]
    async fn test_anonymous_views_not_counted() {
        let (store, aside) = setup(Arc::new(AnonymousIdentity));
        let spec = CacheSpec::new("post").id("postId").view_count(true);
        let calls = AtomicUsize::new(0);
        load(&aside, &spec, 10, &calls).await;
        assert!(!store.exists("viewCount:post:10").await.unwrap());
    }

    #[tokio::test]
    async fn test_history_recorded_on_hit_and_miss() {
        let (_store, aside) = setup(Arc::new(AnonymousIdentity));
        let spec = CacheSpec::new("post").id("postId").history(true);
        let calls = AtomicUsize::new(0);
        load(&aside, &spec, 10, &calls).await;
        load(&aside, &spec, 10, &calls).await;
        load(&aside, &spec, 11, &calls).await;

        let mut history = aside.history("post").await.unwrap();
        history.sort();
        assert_eq!(history, vec!["post:10".to_string(), "post:11".to_string()]);

        assert!(aside.clear_history("post").await.unwrap());
        assert!(aside.history("post").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_then_reload() {
        let (store, aside) = setup(Arc::new(AnonymousIdentity));
        let spec = CacheSpec::new("post").id("postId");
        let calls = AtomicUsize::new(0);
        load(&aside, &spec, 10, &calls).await;

        let args = KeyArgs::new().arg("postId", 10);
        let updated: Result<&str, Infallible> = aside
            .with_cache_invalidate(&CacheInvalidateSpec::from(&spec), &args, || async { Ok("updated") })
            .await;
        assert_eq!(updated.unwrap(), "updated");
        assert!(!store.exists("post:10").await.unwrap());

        load(&aside, &spec, 10, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_survives_store_failure() {
        let (store, aside) = setup(Arc::new(AnonymousIdentity));
        store.set_available(false);
        let result: Result<u8, Infallible> = aside
            .with_cache_invalidate(&CacheInvalidateSpec::new("post"), &KeyArgs::new(), || async {
                Ok(1)
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_view_counts() {
        let store = Arc::new(MemoryCacheStore::new());
        let spec = CacheSpec::new("post").id("postId").view_count(true);
        let calls = AtomicUsize::new(0);
        for user in ["a", "b", "c"] {
            let aside = CacheAside::new(store.clone(), Arc::new(FixedIdentity::new(user)));
            load(&aside, &spec, 10, &calls).await;
        }
        let aside = CacheAside::new(store.clone(), Arc::new(FixedIdentity::new("a")));
        load(&aside, &spec, 11, &calls).await;

        let mut drained = aside.drain_view_counts("post").await.unwrap();
        drained.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(
            drained,
            vec![
                ViewCount {
                    counter_key: "viewCount:post:10".into(),
                    id: "10".into(),
                    count: 3
                },
                ViewCount {
                    counter_key: "viewCount:post:11".into(),
                    id: "11".into(),
                    count: 1
                },
            ]
        );
        assert!(!store.exists("viewCount:post:10").await.unwrap());
        assert!(!store.exists("post:update").await.unwrap());
        assert!(aside.drain_view_counts("post").await.unwrap().is_empty());
    }
}
