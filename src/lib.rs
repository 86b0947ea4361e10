//! tiered-cache: a two-tier object cache.
//!
//! A fast in-memory tier and a durable on-disk tier behind one key-value API:
//!   get  → memory, then disk (a disk hit is promoted into memory)
//!   set  → memory and disk (write-through)
//!   trim / clear → both tiers
//!
//! Every operation has a blocking form and a callback-driven `_async` form that runs
//! on a work queue, optionally protected against host suspension.

pub mod cache;
pub mod config;
pub mod runtime;
pub mod tier;

pub use cache::{Cache, CacheBuilder, CacheError, SharedCache};
pub use config::CacheConfig;
pub use runtime::background::{
    ActivityTracker, BackgroundTask, BackgroundTaskGuard, BackgroundTaskManager, NoopTaskManager,
};
pub use runtime::work_queue::WorkQueue;
pub use tier::{CacheTier, PersistentTier, TierError, TierKind};
