//! Storage tiers behind the cache coordinator.
//!
//! - [`memory`]: volatile in-process tier
//! - [`disk`]: durable file-per-key tier
//! - [`codec`]: value encoding for the disk tier
//!
//! The coordinator only talks to tiers through [`CacheTier`] and [`PersistentTier`].
//! Implementations carry their own locking; every method may be called concurrently.

pub mod codec;
pub mod disk;
pub mod memory;

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;

use crate::tier::codec::CodecError;

/// Identifies a storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Volatile, low latency.
    Memory,
    /// Durable, filesystem backed.
    Disk,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::Disk => write!(f, "disk"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TierError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Key cannot be stored: {0:?}")]
    InvalidKey(String),
}

/// Key-value contract shared by every tier.
pub trait CacheTier<V>: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Look up a key, refreshing its last-access time on a hit.
    fn get(&self, key: &str) -> Option<Arc<V>>;

    fn set(&self, key: &str, value: Arc<V>) -> Result<(), TierError>;

    /// Idempotent; removing an absent key does nothing.
    fn remove(&self, key: &str);

    /// Drop every entry whose last access is strictly older than `date`.
    fn trim_to_date(&self, date: SystemTime);

    fn remove_all(&self);
}

/// A tier that can report how much storage it occupies.
pub trait PersistentTier<V>: CacheTier<V> {
    fn byte_count(&self) -> u64;

    /// Refresh the last-access time of `key` without reading it. Called when the
    /// value was served by a faster tier.
    fn touch(&self, _key: &str) {}
}
