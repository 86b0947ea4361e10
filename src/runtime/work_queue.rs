//! Work queue for the asynchronous cache API.
//!
//! Tasks are closures run on tokio's blocking pool, so disk I/O never stalls an
//! async worker. Tasks may run in parallel and complete in any order; nothing is
//! serialized or cancelled once submitted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

use crate::config::WorkQueueConfig;

#[derive(Debug, Default)]
pub struct WorkQueueStats {
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl WorkQueueStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> u64 {
        self.submitted().saturating_sub(self.completed())
    }
}

/// Parallel task executor backed by a tokio runtime.
pub struct WorkQueue {
    /// Present when the queue owns its runtime.
    runtime: Option<Runtime>,
    handle: Handle,
    stats: Arc<WorkQueueStats>,
}

impl WorkQueue {
    /// Build a queue with its own multi-threaded runtime.
    pub fn new(config: &WorkQueueConfig) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        debug!(
            worker_threads = config.worker_threads,
            max_blocking_threads = config.max_blocking_threads,
            "Started work queue runtime"
        );

        Ok(Self {
            runtime: Some(runtime),
            handle,
            stats: Arc::new(WorkQueueStats::default()),
        })
    }

    /// Run tasks on an existing runtime owned by the host.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
            stats: Arc::new(WorkQueueStats::default()),
        }
    }

    /// Submit a task. Returns immediately.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let stats = Arc::clone(&self.stats);
        stats.submitted.fetch_add(1, Ordering::Relaxed);

        self.handle.spawn_blocking(move || {
            task();
            stats.completed.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn stats(&self) -> &WorkQueueStats {
        &self.stats
    }

    /// Whether the queue runs on a runtime it owns.
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let pending = self.stats.pending();
            if pending > 0 {
                warn!(pending, "Work queue dropped with tasks still running");
            }
            // Safe from any context, including one of this runtime's own threads.
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("owns_runtime", &self.runtime.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
