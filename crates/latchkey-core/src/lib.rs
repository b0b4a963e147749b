//! # latchkey-core
//!
//! Shared building blocks for the latchkey lock manager and cache-aside layer.
//!
//! This crate holds no I/O. It defines:
//! - [`ArgValue`] / [`KeyArgs`]: call arguments and their canonical string forms
//! - [`KeyTemplate`]: the key expression mini-language (`'group:' + #groupId`)
//! - [`generate_lock_key`] / [`generate_cache_key`]: deterministic key rendering
//! - the collaborator traits the rest of the workspace is written against:
//!   [`CacheStore`], [`DistributedLockClient`], [`TransactionContext`] and
//!   [`IdentityProvider`]
//! - the error taxonomy ([`KeyError`], [`StoreError`], [`LockError`])
//!
//! ## Example
//!
//! ```
//! use latchkey_core::{KeyArgs, KeyTemplate, generate_lock_key};
//!
//! let template = KeyTemplate::parse("'group:' + #groupId + '-member:' + #memberId").unwrap();
//! let args = KeyArgs::new().arg("groupId", 42).arg("memberId", 7);
//!
//! let key = generate_lock_key("approveJoining", &template, &args).unwrap();
//! assert_eq!(key.as_str(), "approveJoining:group:42-member:7");
//! ```

mod error;
pub mod identity;
pub mod key;
pub mod lock;
pub mod store;
pub mod template;
pub mod transaction;
pub mod value;

pub use error::{ErrorCategory, KeyError, LockError, StoreError};
pub use identity::{AnonymousIdentity, FixedIdentity, IdentityProvider, RequestIdentity};
pub use key::{LockKey, generate_cache_key, generate_lock_key};
pub use lock::DistributedLockClient;
pub use store::CacheStore;
pub use template::KeyTemplate;
pub use transaction::{
    CompletionCallback, NoTransaction, TransactionContext, TransactionOutcome, TransactionScope,
};
pub use value::{ArgValue, KeyArgs, KeyVariant};

/// Type alias for a shareable cache store.
pub type DynCacheStore = std::sync::Arc<dyn CacheStore>;

/// Type alias for a shareable distributed lock client.
pub type DynLockClient = std::sync::Arc<dyn DistributedLockClient>;

/// Type alias for results of cache store operations.
pub type StoreResult<T> = Result<T, StoreError>;
