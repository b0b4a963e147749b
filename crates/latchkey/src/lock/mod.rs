//! Distributed locking with a process-local fallback.
//!
//! [`LockManager`] is the entry point. The other modules are its parts:
//!
//! - [`retry`]: exponential backoff shared by both backends
//! - [`local`]: the keyed mutex registry used when the lock service is down
//! - [`distributed`]: one acquisition against a [`DistributedLockClient`](latchkey_core::DistributedLockClient)
//! - [`locker`]: the backend strategy and the handle that remembers it
//! - [`executor`]: the bounded task pool acquisitions run on

pub mod distributed;
pub mod executor;
pub mod local;
pub mod locker;
pub mod manager;
pub mod retry;
pub mod spec;

pub use distributed::{DistributedLock, UnlockPolicy};
pub use executor::AcquireExecutor;
pub use local::{LocalLockGuard, LocalLockRegistry};
pub use locker::{DistributedLocker, LocalLocker, LockBackend, LockHandle, Locker};
pub use manager::{LockAcquisition, LockManager, LockManagerBuilder};
pub use retry::{RetryBackoff, TryLock};
pub use spec::LockSpec;
