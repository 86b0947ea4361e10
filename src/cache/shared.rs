//! The process-wide shared cache.
//!
//! Built on first use under a mutex so construction happens at most once, then kept
//! for the life of the process. Values are arbitrary JSON documents so any
//! serializable type can be stored by converting through `serde_json::Value`.

use std::sync::OnceLock;

use parking_lot::{const_mutex, Mutex};
use tracing::info;

use crate::cache::coordinator::Cache;
use crate::cache::CacheError;

/// Name of the shared instance's namespace.
pub const SHARED_CACHE_NAME: &str = "shared";

pub type SharedCache = Cache<serde_json::Value>;

static SHARED: OnceLock<SharedCache> = OnceLock::new();
static SHARED_INIT: Mutex<()> = const_mutex(());

impl Cache<serde_json::Value> {
    /// The shared instance. Every call returns the same instance.
    pub fn shared() -> Result<&'static SharedCache, CacheError> {
        if let Some(cache) = SHARED.get() {
            return Ok(cache);
        }

        let _init = SHARED_INIT.lock();
        if let Some(cache) = SHARED.get() {
            return Ok(cache);
        }

        let cache = Self::builder(SHARED_CACHE_NAME).build()?;
        info!(path = %cache.directory().display(), "Shared cache initialized");
        Ok(SHARED.get_or_init(|| cache))
    }
}
