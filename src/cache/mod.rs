//! Named response caches.
//!
//! This module provides the cache side of the worker:
//! - Named caches mapping a request identity to its latest response
//! - A registry of the cache names owned by the current version
//! - Best-effort access where storage failures never reach callers

mod key;
mod registry;
mod storage;
mod store;

pub use key::RequestKey;
pub use registry::{CacheRegistry, CacheRole};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::{CacheStore, NamedCache};
