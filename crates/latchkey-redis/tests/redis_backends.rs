//! Integration tests for the Redis cache store and lock client.
//!
//! These tests start a real Redis through testcontainers and only run when
//! `LATCHKEY_TEST_REDIS=1` is set.

use std::time::Duration;

use latchkey_core::{CacheStore, DistributedLockClient};
use latchkey_redis::{Pool, PoolSettings, RedisCacheStore, RedisLockClient, connect};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

fn redis_tests_enabled() -> bool {
    if std::env::var("LATCHKEY_TEST_REDIS").ok().as_deref() != Some("1") {
        eprintln!("skipping Redis integration test (set LATCHKEY_TEST_REDIS=1 to run)");
        return false;
    }
    true
}

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");

            (container, url)
        })
        .await;

    url.clone()
}

async fn pool() -> Pool {
    let settings = PoolSettings {
        url: get_redis_url().await,
        pool_size: 5,
        timeout: Duration::from_secs(5),
    };
    connect(&settings).await.expect("connect to redis")
}

fn unique(name: &str) -> String {
    format!("{name}-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_redis_store_values_and_ttl() {
    if !redis_tests_enabled() {
        return;
    }
    let store = RedisCacheStore::new(pool().await);
    let key = unique("post");

    assert_eq!(store.get(&key).await.unwrap(), None);
    store
        .set(&key, b"payload".to_vec(), Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Some(b"payload".to_vec()));
    assert!(store.exists(&key).await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_store_set_if_absent_counters_and_sets() {
    if !redis_tests_enabled() {
        return;
    }
    let store = RedisCacheStore::new(pool().await);
    let marker = unique("viewCount:post:1:user:9");
    let counter = unique("viewCount:post:1");
    let update = unique("global:update");

    let ttl = Duration::from_secs(60);
    assert!(store.set_if_absent(&marker, b"1".to_vec(), ttl).await.unwrap());
    assert!(!store.set_if_absent(&marker, b"1".to_vec(), ttl).await.unwrap());

    assert_eq!(store.increment(&counter).await.unwrap(), 1);
    assert_eq!(store.increment(&counter).await.unwrap(), 2);

    assert!(store.set_add(&update, &counter).await.unwrap());
    assert!(!store.set_add(&update, &counter).await.unwrap());
    assert_eq!(store.set_members(&update).await.unwrap(), vec![counter.clone()]);

    assert!(store.delete(&update).await.unwrap());
    assert!(!store.delete(&update).await.unwrap());
}

#[tokio::test]
async fn test_redis_lock_exclusive_and_reentrant() {
    if !redis_tests_enabled() {
        return;
    }
    let client = RedisLockClient::new(pool().await);
    let key = unique("approveJoining:group:42-member:7");
    let lease = Duration::from_secs(5);

    client.ping().await.unwrap();
    assert!(client.try_lock(&key, "a", lease).await.unwrap());
    assert!(client.try_lock(&key, "a", lease).await.unwrap());
    assert!(!client.try_lock(&key, "b", lease).await.unwrap());
    assert!(client.is_held_by(&key, "a").await.unwrap());
    assert!(!client.is_held_by(&key, "b").await.unwrap());

    assert!(!client.unlock(&key, "b").await.unwrap());
    assert!(client.unlock(&key, "a").await.unwrap());
    assert!(client.is_locked(&key).await.unwrap());
    assert!(client.unlock(&key, "a").await.unwrap());
    assert!(!client.is_locked(&key).await.unwrap());
}

#[tokio::test]
async fn test_redis_lock_lease_and_force_unlock() {
    if !redis_tests_enabled() {
        return;
    }
    let client = RedisLockClient::with_namespace(pool().await, "test:lock:");
    let key = unique("deletePost:10");

    assert!(client.try_lock(&key, "a", Duration::from_millis(200)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!client.is_locked(&key).await.unwrap());

    assert!(client.try_lock(&key, "b", Duration::from_secs(5)).await.unwrap());
    assert!(client.force_unlock(&key).await.unwrap());
    assert!(!client.is_locked(&key).await.unwrap());
}
