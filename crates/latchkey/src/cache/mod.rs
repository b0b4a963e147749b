//! Cache-aside interception.
//!
//! [`CacheAside::with_cache`] serves reads from the shared store and fills it
//! on a miss; [`CacheAside::with_cache_invalidate`] drops an entry before a
//! write. Optional per-entry view counting and access history ride along.

pub mod aside;
pub mod spec;

pub use aside::{CacheAside, ViewCount};
pub use spec::{CacheInvalidateSpec, CacheSpec};
