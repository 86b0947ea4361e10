//! In-process memory tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use crate::tier::{CacheTier, TierError, TierKind};

#[derive(Debug)]
struct MemoryEntry<V> {
    value: Arc<V>,
    last_access: SystemTime,
}

/// Volatile key-value store with per-entry last-access tracking.
#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: Mutex<HashMap<String, MemoryEntry<V>>>,
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `key` is resident, without touching its access time.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Last access time of `key`, if resident.
    pub fn last_access(&self, key: &str) -> Option<SystemTime> {
        self.entries.lock().get(key).map(|e| e.last_access)
    }
}

impl<V: Send + Sync> CacheTier<V> for MemoryCache<V> {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_access = SystemTime::now();
        Some(Arc::clone(&entry.value))
    }

    fn set(&self, key: &str, value: Arc<V>) -> Result<(), TierError> {
        self.entries.lock().insert(
            key.to_string(),
            MemoryEntry {
                value,
                last_access: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn trim_to_date(&self, date: SystemTime) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_access >= date);
        let trimmed = before - entries.len();
        if trimmed > 0 {
            debug!(trimmed, remaining = entries.len(), "Trimmed memory tier");
        }
    }

    fn remove_all(&self) {
        self.entries.lock().clear();
    }
}
