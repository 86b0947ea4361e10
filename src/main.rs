//! tiered-cache: command-line access to a tiered object cache.
//!
//! Opens the named cache under the given root and runs a single operation against
//! it. Trims and clears run through the async API under background-task protection,
//! and the tool waits for them to drain before exiting.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tiered_cache::config::{CacheConfig, Cli, Command};
use tiered_cache::{ActivityTracker, Cache};

/// How long to wait for protected operations before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tiered_cache=debug"
    } else {
        "tiered_cache=warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("tiered-cache v{}", env!("CARGO_PKG_VERSION"));

    let config = CacheConfig {
        root_path: cli.root.clone(),
        ..Default::default()
    };
    let tracker = Arc::new(ActivityTracker::new());

    let cache: Cache<serde_json::Value> = Cache::builder(cli.name.as_str())
        .config(config)
        .background_tasks(tracker.clone())
        .build()
        .with_context(|| format!("cannot open cache {:?}", cli.name))?;

    match cli.command {
        Command::Get { key } => match cache.get(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&*value)?),
            None => {
                eprintln!("{key}: not found");
                std::process::exit(1);
            }
        },
        Command::Set { key, value } => {
            let value: serde_json::Value = serde_json::from_str(&value)
                .with_context(|| format!("value for {key:?} is not valid JSON"))?;
            cache.set(&key, value);
        }
        Command::Remove { key } => cache.remove(&key),
        Command::Trim { older_than } => {
            let cutoff = SystemTime::now()
                .checked_sub(Duration::from_secs(older_than))
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let (tx, rx) = mpsc::channel();
            cache.trim_to_date_async(cutoff, move |cache| {
                let _ = tx.send(cache.disk_byte_count());
            });
            let remaining = rx.recv().context("trim did not complete")?;
            println!("trimmed, {remaining} bytes on disk");
        }
        Command::Clear => {
            let (tx, rx) = mpsc::channel();
            cache.remove_all_async(move |_| {
                let _ = tx.send(());
            });
            rx.recv().context("clear did not complete")?;
            println!("cleared");
        }
        Command::Stats => {
            let report = serde_json::json!({
                "name": cache.name(),
                "directory": cache.directory(),
                "disk_bytes": cache.disk_byte_count(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if !tracker.wait_idle(DRAIN_TIMEOUT) {
        anyhow::bail!("{} cache operations still running", tracker.outstanding());
    }

    Ok(())
}
