//! Integration tests for the callback-driven cache API, the shared instance and
//! background-task protection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use tiered_cache::{
    ActivityTracker, BackgroundTask, BackgroundTaskManager, Cache, SharedCache, WorkQueue,
};

const WAIT: Duration = Duration::from_secs(5);

/// Counts begin/end calls and hands out fresh handles.
#[derive(Default)]
struct CountingManager {
    begins: AtomicUsize,
    ends: AtomicUsize,
}

impl BackgroundTaskManager for CountingManager {
    fn begin(&self) -> BackgroundTask {
        let id = self.begins.fetch_add(1, Ordering::SeqCst);
        BackgroundTask::Active(id as u64)
    }

    fn end(&self, _task: BackgroundTask) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

fn open(tmp: &TempDir, name: &str) -> Cache<String> {
    Cache::new(name, Some(tmp.path())).unwrap()
}

#[test]
fn test_async_set_calls_back_once() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&tmp, "async-set");

    let (tx, rx) = mpsc::channel();
    cache.set_async("x", "V".to_string(), move |cache, key, value| {
        tx.send((cache.name().to_string(), key.to_string(), value)).unwrap();
    });

    let (name, key, value) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(name, "async-set");
    assert_eq!(key, "x");
    assert_eq!(value.as_deref().map(String::as_str), Some("V"));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    assert_eq!(cache.get("x").as_deref().map(String::as_str), Some("V"));
}

#[test]
fn test_async_get_hit_and_miss() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&tmp, "async-get");
    cache.set("present", "here".to_string());

    let (tx, rx) = mpsc::channel();
    for key in ["present", "absent"] {
        let tx = tx.clone();
        cache.get_async(key, move |_, key, value| {
            tx.send((key.to_string(), value)).unwrap();
        });
    }

    let mut results: Vec<_> = (0..2).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    results.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(results[0].0, "absent");
    assert!(results[0].1.is_none());
    assert_eq!(results[1].0, "present");
    assert_eq!(results[1].1.as_deref().map(String::as_str), Some("here"));
}

#[test]
fn test_async_remove_reports_none() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&tmp, "async-remove");
    cache.set("k", "v".to_string());

    let (tx, rx) = mpsc::channel();
    cache.remove_async("k", move |_, key, value| {
        tx.send((key.to_string(), value.is_none())).unwrap();
    });

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("k".to_string(), true));
    assert!(cache.get("k").is_none());
}

#[test]
fn test_async_trim_and_clear_are_protected() {
    let tmp = TempDir::new().unwrap();
    let manager = Arc::new(CountingManager::default());
    let cache: Cache<String> = Cache::builder("guarded")
        .root_path(tmp.path())
        .background_tasks(manager.clone())
        .build()
        .unwrap();

    cache.set("old", "1".to_string());
    thread::sleep(Duration::from_millis(20));
    let cutoff = SystemTime::now();

    let (tx, rx) = mpsc::channel();
    let trim_tx = tx.clone();
    cache.trim_to_date_async(cutoff, move |cache| {
        trim_tx.send(cache.get("old").is_none()).unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap());

    cache.set("k", "v".to_string());
    cache.remove_all_async(move |cache| {
        tx.send(cache.disk_byte_count() == 0).unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap());

    // Each guard is released right after its callback returns.
    let deadline = std::time::Instant::now() + WAIT;
    while manager.ends.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(manager.begins.load(Ordering::SeqCst), 2);
    assert_eq!(manager.ends.load(Ordering::SeqCst), 2);
}

#[test]
fn test_activity_tracker_drains() {
    let tmp = TempDir::new().unwrap();
    let tracker = Arc::new(ActivityTracker::new());
    let cache: Cache<String> = Cache::builder("drain")
        .root_path(tmp.path())
        .background_tasks(tracker.clone())
        .build()
        .unwrap();

    for i in 0..20 {
        cache.set_async(format!("k{i}"), format!("v{i}"), |_, _, _| {});
    }
    assert!(tracker.wait_idle(WAIT));
    assert_eq!(tracker.outstanding(), 0);

    for i in 0..20 {
        assert!(cache.get(&format!("k{i}")).is_some());
    }
}

#[test]
fn test_concurrent_async_writes_to_distinct_keys() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&tmp, "fanout");
    let (tx, rx) = mpsc::channel();

    for i in 0..50 {
        let tx = tx.clone();
        cache.set_async(format!("key-{i}"), format!("{i}"), move |_, key, _| {
            tx.send(key.to_string()).unwrap();
        });
    }

    let mut seen: Vec<String> = (0..50).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 50);
    assert!(cache.disk_tier().byte_count() > 0);
}

#[test]
fn test_sync_call_from_callback() {
    let tmp = TempDir::new().unwrap();
    let cache = open(&tmp, "reentrant");

    let (tx, rx) = mpsc::channel();
    cache.set_async("a", "1".to_string(), move |cache, _, _| {
        cache.set("b", "2".to_string());
        tx.send(cache.get("b").is_some()).unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap());
}

#[tokio::test]
async fn test_host_runtime_work_queue() {
    let tmp = TempDir::new().unwrap();
    let cache: Cache<String> = Cache::builder("hosted")
        .root_path(tmp.path())
        .work_queue(WorkQueue::from_handle(tokio::runtime::Handle::current()))
        .build()
        .unwrap();
    assert!(!cache.work_queue().owns_runtime());

    let (tx, rx) = tokio::sync::oneshot::channel();
    cache.set_async("k", "v".to_string(), move |_, _, value| {
        let _ = tx.send(value);
    });
    let value = rx.await.unwrap();
    assert_eq!(value.as_deref().map(String::as_str), Some("v"));
}

#[test]
fn test_shared_instance_identity() {
    let first: &'static SharedCache = SharedCache::shared().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| thread::spawn(|| SharedCache::shared().unwrap() as *const SharedCache as usize))
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), first as *const SharedCache as usize);
    }
    assert!(std::ptr::eq(first, SharedCache::shared().unwrap()));
    assert_eq!(first.name(), "shared");
}
