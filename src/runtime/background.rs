//! Protection of long-running operations against host suspension.
//!
//! A host that may suspend or terminate the process (mobile runtimes, service
//! managers with stop timeouts, ...) implements [`BackgroundTaskManager`]. The cache
//! brackets unbounded work with a [`BackgroundTaskGuard`]; hosts without such a
//! mechanism use [`NoopTaskManager`] and the work simply runs unprotected.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// Handle returned by [`BackgroundTaskManager::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackgroundTask {
    /// The host granted extended execution; pass back to `end`.
    Active(u64),
    /// The host cannot protect this operation.
    Unavailable,
}

/// Host capability for requesting extended execution time.
///
/// `end` must tolerate being called twice for the same handle and being called
/// with [`BackgroundTask::Unavailable`].
pub trait BackgroundTaskManager: Send + Sync {
    fn begin(&self) -> BackgroundTask;
    fn end(&self, task: BackgroundTask);
}

/// For hosts without a suspension mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskManager;

impl BackgroundTaskManager for NoopTaskManager {
    fn begin(&self) -> BackgroundTask {
        BackgroundTask::Unavailable
    }

    fn end(&self, _task: BackgroundTask) {}
}

/// RAII bracket around a protected operation. Ends the task exactly once, on
/// [`finish`](Self::finish) or on drop (including unwinding).
pub struct BackgroundTaskGuard {
    manager: Arc<dyn BackgroundTaskManager>,
    task: BackgroundTask,
    ended: bool,
}

impl BackgroundTaskGuard {
    pub fn begin(manager: Arc<dyn BackgroundTaskManager>) -> Self {
        let task = manager.begin();
        if task == BackgroundTask::Unavailable {
            debug!("Background protection unavailable, running unprotected");
        }
        Self {
            manager,
            task,
            ended: false,
        }
    }

    pub fn task(&self) -> BackgroundTask {
        self.task
    }

    pub fn is_protected(&self) -> bool {
        matches!(self.task, BackgroundTask::Active(_))
    }

    pub fn finish(mut self) {
        self.end();
    }

    fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.manager.end(self.task);
        }
    }
}

impl Drop for BackgroundTaskGuard {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for BackgroundTaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTaskGuard")
            .field("task", &self.task)
            .field("ended", &self.ended)
            .finish()
    }
}

/// Host-side manager that tracks outstanding protected operations so the host can
/// hold off exiting until they drain.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    next_id: AtomicU64,
    active: Mutex<HashSet<u64>>,
    idle: Condvar,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations currently protected.
    pub fn outstanding(&self) -> usize {
        self.active.lock().len()
    }

    /// Block until no protected operation is running, or `timeout` elapses.
    /// Returns whether the tracker went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.active.lock();
        while !active.is_empty() {
            if self.idle.wait_until(&mut active, deadline).timed_out() {
                warn!(outstanding = active.len(), "Timed out waiting for background tasks");
                return active.is_empty();
            }
        }
        true
    }
}

impl BackgroundTaskManager for ActivityTracker {
    fn begin(&self) -> BackgroundTask {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(id);
        BackgroundTask::Active(id)
    }

    fn end(&self, task: BackgroundTask) {
        let BackgroundTask::Active(id) = task else {
            return;
        };
        let mut active = self.active.lock();
        if active.remove(&id) && active.is_empty() {
            self.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_noop_is_unavailable() {
        let guard = BackgroundTaskGuard::begin(Arc::new(NoopTaskManager));
        assert!(!guard.is_protected());
        guard.finish();
    }

    #[test]
    fn test_guard_ends_once() {
        let tracker = Arc::new(ActivityTracker::new());
        let guard = BackgroundTaskGuard::begin(tracker.clone());
        assert!(guard.is_protected());
        assert_eq!(tracker.outstanding(), 1);

        let task = guard.task();
        guard.finish();
        assert_eq!(tracker.outstanding(), 0);

        // Repeated and unavailable ends are harmless.
        tracker.end(task);
        tracker.end(BackgroundTask::Unavailable);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_guard_ends_on_panic() {
        let tracker = Arc::new(ActivityTracker::new());
        let inner = tracker.clone();
        let result = thread::spawn(move || {
            let _guard = BackgroundTaskGuard::begin(inner);
            panic!("operation failed");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_wait_idle() {
        let tracker = Arc::new(ActivityTracker::new());
        let task = tracker.begin();
        assert!(!tracker.wait_idle(Duration::from_millis(10)));

        let ender = tracker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ender.end(task);
        });
        assert!(tracker.wait_idle(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
