use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use latchkey::{KeyArgs, LockBackend, LockError, LockKey, LockManager, TransactionScope};
use latchkey_core::DistributedLockClient;
use latchkey_memory::MemoryLockClient;

#[derive(Default)]
struct Section {
    inside: AtomicUsize,
    peak: AtomicUsize,
    entered: AtomicUsize,
}

impl Section {
    async fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn contend(managers: Vec<Arc<LockManager>>, tasks_per_manager: usize) -> Arc<Section> {
    let section = Arc::new(Section::default());
    let mut handles = Vec::new();
    for manager in managers {
        for _ in 0..tasks_per_manager {
            let manager = manager.clone();
            let section = section.clone();
            handles.push(tokio::spawn(async move {
                let spec = manager
                    .spec("approveJoining", "'group:' + #groupId + '-member:' + #memberId")
                    .unwrap()
                    .max_wait(Duration::from_secs(30));
                let args = KeyArgs::new().arg("groupId", 42).arg("memberId", 7);
                manager
                    .with_lock(&spec, &args, || async {
                        section.enter().await;
                        Ok::<_, LockError>(())
                    })
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    section
}

#[tokio::test(start_paused = true)]
async fn local_locks_are_mutually_exclusive() {
    let manager = Arc::new(
        LockManager::builder()
            .base_delay(Duration::from_millis(5))
            .build(),
    );
    let section = contend(vec![manager.clone()], 8).await;

    assert_eq!(section.entered.load(Ordering::SeqCst), 8);
    assert_eq!(section.peak.load(Ordering::SeqCst), 1);
    assert_eq!(manager.local_lock_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn distributed_locks_exclude_across_managers() {
    // Two managers sharing one lock service stand in for two processes.
    let client = Arc::new(MemoryLockClient::new());
    let managers: Vec<Arc<LockManager>> = (0..2)
        .map(|_| {
            Arc::new(
                LockManager::builder()
                    .distributed(client.clone())
                    .base_delay(Duration::from_millis(5))
                    .build(),
            )
        })
        .collect();

    let section = contend(managers.clone(), 4).await;

    assert_eq!(section.entered.load(Ordering::SeqCst), 8);
    assert_eq!(section.peak.load(Ordering::SeqCst), 1);
    assert_eq!(client.held_count(), 0);
    assert!(managers.iter().all(|m| m.local_lock_count() == 0));
}

#[tokio::test(start_paused = true)]
async fn fallback_is_transparent_to_the_operation() {
    let client = Arc::new(MemoryLockClient::new());
    let manager = LockManager::builder()
        .distributed(client.clone())
        .probe_timeout(Duration::from_millis(50))
        .build();
    let key = LockKey::new("approveJoining:group:42-member:7");

    client.set_available(false);
    let acq = manager
        .acquire(&key, Duration::from_secs(1), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(acq.acquired);
    assert_eq!(acq.backend, LockBackend::Local);
    manager.release(acq).await;

    let ran = AtomicUsize::new(0);
    let value: Result<u32, LockError> = manager
        .with_lock_key(key.clone(), Duration::from_secs(1), Duration::from_secs(5), || async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(11)
        })
        .await;
    assert_eq!(value.unwrap(), 11);
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    client.set_available(true);
    let acq = manager
        .acquire(&key, Duration::from_secs(1), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(acq.backend, LockBackend::Distributed);
    assert!(client.is_locked(key.as_str()).await.unwrap());
    manager.release(acq).await;
    assert_eq!(manager.local_lock_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn approve_joining_holds_lock_until_commit() {
    let client = Arc::new(MemoryLockClient::new());
    let manager = LockManager::builder().distributed(client.clone()).build();
    let other = LockManager::builder().distributed(client.clone()).build();

    let spec = manager
        .spec("approveJoining", "'group:' + #groupId + '-member:' + #memberId")
        .unwrap();
    let args = KeyArgs::new().arg("groupId", 42).arg("memberId", 7);
    let key = "approveJoining:group:42-member:7";

    let tx = TransactionScope::begin();
    let approved: Result<&str, LockError> = manager
        .with_lock_in(&tx, &spec, &args, || async { Ok("APPROVED") })
        .await;
    assert_eq!(approved.unwrap(), "APPROVED");

    // Still held: the transaction has not finished.
    assert!(client.is_locked(key).await.unwrap());
    let blocked: Result<(), LockError> = other
        .with_lock(&spec.clone().max_wait(Duration::from_millis(300)), &args, || async {
            Ok(())
        })
        .await;
    assert!(matches!(blocked, Err(LockError::AcquisitionTimeout { .. })));

    tx.commit().await;
    assert!(!client.is_locked(key).await.unwrap());

    let after: Result<(), LockError> = other.with_lock(&spec, &args, || async { Ok(()) }).await;
    assert!(after.is_ok());
}

#[tokio::test(start_paused = true)]
async fn different_keys_do_not_block_each_other() {
    let manager = LockManager::local_only();
    let first = manager
        .acquire(&LockKey::new("op:1"), Duration::ZERO, Duration::from_secs(5))
        .await
        .unwrap();
    let second = manager
        .acquire(&LockKey::new("op:2"), Duration::ZERO, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(first.acquired && second.acquired);
    first.release().await;
    second.release().await;
    assert_eq!(manager.local_lock_count(), 0);
}
