//! Runtime configuration for tiered-cache.
//!
//! Everything is supplied programmatically at construction time. The structs derive
//! serde so a host can embed them in its own configuration file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Directory name used under the system temp dir when no root path is given.
pub const DEFAULT_ROOT_DIR: &str = "tiered-cache";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiered-cache", about = "Inspect and edit a tiered object cache")]
pub struct Cli {
    /// Root directory holding the cache namespaces.
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Cache namespace.
    #[arg(short, long, default_value = "default")]
    pub name: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations exposed by the binary.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the value stored under a key.
    Get { key: String },

    /// Store a JSON value under a key.
    Set { key: String, value: String },

    /// Remove a key from both tiers.
    Remove { key: String },

    /// Remove entries not accessed within the last N seconds.
    Trim {
        #[arg(long)]
        older_than: u64,
    },

    /// Remove every entry.
    Clear,

    /// Print the disk byte count and the on-disk location.
    Stats,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for disk namespaces (None = `<temp>/tiered-cache`).
    pub root_path: Option<PathBuf>,

    /// Disk tier settings.
    pub disk: DiskConfig,

    /// Async work queue settings.
    pub work_queue: WorkQueueConfig,
}

impl CacheConfig {
    /// The root directory that namespaces are created under.
    pub fn resolved_root(&self) -> PathBuf {
        self.root_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_ROOT_DIR))
    }
}

/// Disk tier settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Payload compression.
    pub compression: CompressionConfig,
}

/// Compression applied to encoded values before they hit disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Apply zstd compression when writing to disk.
    pub zstd: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            zstd: false,
            zstd_level: 3,
        }
    }
}

/// Work queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkQueueConfig {
    /// Async worker threads driving the queue.
    pub worker_threads: usize,

    /// Upper bound on threads running cache tasks concurrently.
    pub max_blocking_threads: usize,

    /// Thread name prefix.
    pub thread_name: String,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            max_blocking_threads: 8,
            thread_name: "tiered-cache-worker".to_string(),
        }
    }
}
