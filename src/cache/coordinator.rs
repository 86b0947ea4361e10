//! The cache coordinator: one key space over a memory tier and a disk tier.
//!
//! Reads go memory first, then disk; a disk hit is promoted into memory before it is
//! returned. Writes go through to both tiers. Trims and clears fan out to both.
//!
//! Every operation comes in two flavours. The blocking form runs on the caller's
//! thread. The `_async` form returns immediately, runs the same logic on the work
//! queue and hands the result to a callback on a worker thread. Async operations are
//! neither ordered nor serialized against each other, even for the same key.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::stats::{CacheStats, CacheStatsSnapshot};
use crate::cache::CacheError;
use crate::config::CacheConfig;
use crate::runtime::background::{BackgroundTaskGuard, BackgroundTaskManager, NoopTaskManager};
use crate::runtime::work_queue::WorkQueue;
use crate::tier::codec::{Codec, JsonCodec};
use crate::tier::disk::DiskCache;
use crate::tier::memory::MemoryCache;
use crate::tier::{CacheTier, PersistentTier};

/// Longest name accepted as a directory component.
const MAX_NAME_BYTES: usize = 255;

/// Check that `name` can be used as a single directory name.
pub fn validate_name(name: &str) -> Result<(), CacheError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.trim().is_empty() {
        "name is blank"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains(['/', '\\']) {
        "name contains a path separator"
    } else if name.chars().any(char::is_control) {
        "name contains control characters"
    } else if name.len() > MAX_NAME_BYTES {
        "name is longer than 255 bytes"
    } else {
        return Ok(());
    };

    Err(CacheError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

struct CacheInner<V> {
    name: String,
    directory: PathBuf,
    memory: Arc<dyn CacheTier<V>>,
    disk: Arc<dyn PersistentTier<V>>,
    queue: WorkQueue,
    background: Arc<dyn BackgroundTaskManager>,
    stats: CacheStats,
}

/// A named two-tier cache instance.
///
/// Cloning is cheap and yields another handle to the same instance.
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("directory", &self.inner.directory)
            .finish()
    }
}

/// Configures and builds a [`Cache`].
pub struct CacheBuilder<V> {
    name: String,
    config: CacheConfig,
    memory: Option<Arc<dyn CacheTier<V>>>,
    disk: Option<Arc<dyn PersistentTier<V>>>,
    codec: Option<Arc<dyn Codec<V>>>,
    background: Option<Arc<dyn BackgroundTaskManager>>,
    work_queue: Option<WorkQueue>,
}

impl<V> CacheBuilder<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CacheConfig::default(),
            memory: None,
            disk: None,
            codec: None,
            background: None,
            work_queue: None,
        }
    }

    /// Directory the namespace directory is created under.
    pub fn root_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root_path = Some(root.into());
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default in-process memory tier.
    pub fn memory_tier(mut self, tier: Arc<dyn CacheTier<V>>) -> Self {
        self.memory = Some(tier);
        self
    }

    /// Replace the default file-per-key disk tier.
    pub fn disk_tier(mut self, tier: Arc<dyn PersistentTier<V>>) -> Self {
        self.disk = Some(tier);
        self
    }

    /// Codec for the default disk tier (JSON by default).
    pub fn codec(mut self, codec: Arc<dyn Codec<V>>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn background_tasks(mut self, manager: Arc<dyn BackgroundTaskManager>) -> Self {
        self.background = Some(manager);
        self
    }

    /// Run async operations on this queue instead of a dedicated runtime.
    pub fn work_queue(mut self, queue: WorkQueue) -> Self {
        self.work_queue = Some(queue);
        self
    }

    pub fn build(self) -> Result<Cache<V>, CacheError> {
        validate_name(&self.name)?;

        let directory = self.config.resolved_root().join(&self.name);

        let memory: Arc<dyn CacheTier<V>> = match self.memory {
            Some(memory) => memory,
            None => Arc::new(MemoryCache::<V>::new()),
        };

        let disk: Arc<dyn PersistentTier<V>> = match self.disk {
            Some(disk) => disk,
            None => {
                let codec: Arc<dyn Codec<V>> = match self.codec {
                    Some(codec) => codec,
                    None => Arc::new(JsonCodec::new(self.config.disk.compression.clone())),
                };
                Arc::new(DiskCache::open(directory.clone(), codec))
            }
        };

        let queue = match self.work_queue {
            Some(queue) => queue,
            None => WorkQueue::new(&self.config.work_queue).map_err(CacheError::WorkQueue)?,
        };

        let background: Arc<dyn BackgroundTaskManager> = match self.background {
            Some(background) => background,
            None => Arc::new(NoopTaskManager),
        };

        info!(
            cache = %self.name,
            path = %directory.display(),
            disk_bytes = disk.byte_count(),
            "Cache created"
        );

        Ok(Cache {
            inner: Arc::new(CacheInner {
                name: self.name,
                directory,
                memory,
                disk,
                queue,
                background,
                stats: CacheStats::default(),
            }),
        })
    }
}

impl<V> Cache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a cache named `name`, stored under `root_path/name`
    /// (or `<temp>/tiered-cache/name`).
    pub fn new(name: &str, root_path: Option<&Path>) -> Result<Self, CacheError> {
        let mut builder = CacheBuilder::new(name);
        if let Some(root) = root_path {
            builder = builder.root_path(root);
        }
        builder.build()
    }

    pub fn builder(name: impl Into<String>) -> CacheBuilder<V> {
        CacheBuilder::new(name)
    }
}

impl<V> Cache<V>
where
    V: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Directory of the namespace on disk.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn memory_tier(&self) -> &Arc<dyn CacheTier<V>> {
        &self.inner.memory
    }

    pub fn disk_tier(&self) -> &Arc<dyn PersistentTier<V>> {
        &self.inner.disk
    }

    pub fn work_queue(&self) -> &WorkQueue {
        &self.inner.queue
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Whether two handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bytes currently held by the disk tier. May be stale by the time it returns.
    pub fn disk_byte_count(&self) -> u64 {
        self.inner.disk.byte_count()
    }

    // ─── Synchronous API ──────────────────────────────────────────────────

    /// Look up `key`, promoting a disk hit into memory. A memory hit also refreshes
    /// the disk copy's access time. `None` is a plain miss.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        if key.is_empty() {
            return None;
        }
        let inner = &self.inner;

        if let Some(value) = inner.memory.get(key) {
            inner.disk.touch(key);
            inner.stats.memory_hit();
            debug!(cache = %inner.name, key, "Memory hit");
            return Some(value);
        }

        let Some(value) = inner.disk.get(key) else {
            inner.stats.miss();
            debug!(cache = %inner.name, key, "Miss");
            return None;
        };
        inner.stats.disk_hit();

        // Promotion is best-effort; the caller gets the value either way.
        match inner.memory.set(key, Arc::clone(&value)) {
            Ok(()) => {
                inner.stats.promotion(true);
                debug!(cache = %inner.name, key, "Promoted disk hit to memory");
            }
            Err(e) => {
                inner.stats.promotion(false);
                warn!(cache = %inner.name, key, error = %e, "Promotion to memory failed");
            }
        }

        Some(value)
    }

    /// Write `value` through to both tiers.
    pub fn set(&self, key: &str, value: V) {
        self.set_shared(key, Arc::new(value));
    }

    /// Like [`set`](Self::set) for a value that is already shared.
    ///
    /// A disk failure leaves the value in memory only; it is logged and counted but
    /// not reported to the caller.
    pub fn set_shared(&self, key: &str, value: Arc<V>) {
        if key.is_empty() {
            warn!(cache = %self.inner.name, "Ignoring set with empty key");
            return;
        }
        let inner = &self.inner;

        if let Err(e) = inner.memory.set(key, Arc::clone(&value)) {
            warn!(cache = %inner.name, key, tier = %inner.memory.kind(), error = %e, "Tier write failed");
        }

        if let Err(e) = inner.disk.set(key, value) {
            inner.stats.disk_write_failure();
            warn!(
                cache = %inner.name,
                key,
                tier = %inner.disk.kind(),
                error = %e,
                "Tier write failed, value held in memory only"
            );
        }
    }

    /// Remove `key` from both tiers. Absent keys are a no-op.
    pub fn remove(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.inner.memory.remove(key);
        self.inner.disk.remove(key);
        debug!(cache = %self.inner.name, key, "Removed");
    }

    /// Remove every entry in both tiers last accessed strictly before `date`.
    pub fn trim_to_date(&self, date: SystemTime) {
        self.inner.memory.trim_to_date(date);
        self.inner.disk.trim_to_date(date);
        info!(cache = %self.inner.name, disk_bytes = self.disk_byte_count(), "Trimmed cache");
    }

    /// Empty both tiers.
    pub fn remove_all(&self) {
        self.inner.memory.remove_all();
        self.inner.disk.remove_all();
        info!(cache = %self.inner.name, "Cleared cache");
    }

    // ─── Asynchronous API ─────────────────────────────────────────────────

    /// Look up `key` on the work queue; `callback` receives the value or `None`.
    pub fn get_async<F>(&self, key: impl Into<String>, callback: F)
    where
        F: FnOnce(&Cache<V>, &str, Option<Arc<V>>) + Send + 'static,
    {
        let cache = self.clone();
        let key = key.into();
        self.inner.queue.submit(move || {
            let value = cache.get(&key);
            callback(&cache, &key, value);
        });
    }

    /// Write through on the work queue; `callback` receives the stored value once
    /// both tiers have been attempted, whatever the disk outcome.
    pub fn set_async<F>(&self, key: impl Into<String>, value: V, callback: F)
    where
        F: FnOnce(&Cache<V>, &str, Option<Arc<V>>) + Send + 'static,
    {
        let cache = self.clone();
        let key = key.into();
        let value = Arc::new(value);
        let guard = self.protect();
        self.inner.queue.submit(move || {
            cache.set_shared(&key, Arc::clone(&value));
            callback(&cache, &key, Some(value));
            drop(guard);
        });
    }

    /// Remove on the work queue; `callback` receives `None` as the value.
    pub fn remove_async<F>(&self, key: impl Into<String>, callback: F)
    where
        F: FnOnce(&Cache<V>, &str, Option<Arc<V>>) + Send + 'static,
    {
        let cache = self.clone();
        let key = key.into();
        let guard = self.protect();
        self.inner.queue.submit(move || {
            cache.remove(&key);
            callback(&cache, &key, None);
            drop(guard);
        });
    }

    /// Trim on the work queue under background-task protection.
    pub fn trim_to_date_async<F>(&self, date: SystemTime, callback: F)
    where
        F: FnOnce(&Cache<V>) + Send + 'static,
    {
        let cache = self.clone();
        let guard = self.protect();
        self.inner.queue.submit(move || {
            cache.trim_to_date(date);
            callback(&cache);
            drop(guard);
        });
    }

    /// Clear on the work queue under background-task protection.
    pub fn remove_all_async<F>(&self, callback: F)
    where
        F: FnOnce(&Cache<V>) + Send + 'static,
    {
        let cache = self.clone();
        let guard = self.protect();
        self.inner.queue.submit(move || {
            cache.remove_all();
            callback(&cache);
            drop(guard);
        });
    }

    fn protect(&self) -> BackgroundTaskGuard {
        BackgroundTaskGuard::begin(Arc::clone(&self.inner.background))
    }
}
