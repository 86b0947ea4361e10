//! Cache coordination across the memory and disk tiers.
//!
//! - [`coordinator`]: the [`Cache`] instance, its builder and name validation
//! - [`shared`]: the process-wide shared instance
//! - [`stats`]: hit/miss/promotion counters

pub mod coordinator;
pub mod shared;
pub mod stats;

use thiserror::Error;

pub use coordinator::{Cache, CacheBuilder};
pub use shared::SharedCache;
pub use stats::CacheStatsSnapshot;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Failed to start work queue: {0}")]
    WorkQueue(#[source] std::io::Error),
}
