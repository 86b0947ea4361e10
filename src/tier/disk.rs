//! Durable disk tier: one file per key.
//!
//! Files live directly under the namespace directory, named by the percent-encoded
//! key. Keys whose encoding would make an over-long file name are stored under a
//! digest name instead, and the file starts with a small header carrying the key.
//! An in-memory index of last-access times and sizes is rebuilt from the directory
//! when the tier is opened (file mtime is the persisted access time), so trims and
//! byte counts never have to scan the filesystem.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fs;
use std::hash::BuildHasher;
use std::io::{ErrorKind, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::tier::codec::Codec;
use crate::tier::{CacheTier, PersistentTier, TierError, TierKind};

/// Prefix for in-flight writes; never produced by [`entry_file_name`].
const STAGING_PREFIX: &str = ".staging-";

/// Marks digest-named files; never produced by [`encode_key`].
const HASHED_MARKER: char = '~';

/// Longest percent-encoded name used as-is.
const MAX_FILE_NAME_BYTES: usize = 200;

/// Readable part of a digest name.
const HASHED_PREFIX_BYTES: usize = 96;

/// Upper bound on the key header of a digest-named file.
const MAX_HEADER_KEY_BYTES: usize = 1 << 20;

/// Number of per-key I/O locks.
const IO_STRIPES: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct DiskIoStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
    pub failed_writes: u64,
}

#[derive(Debug, Clone, Copy)]
struct DiskEntry {
    last_access: SystemTime,
    size: u64,
}

#[derive(Debug, Default)]
struct DiskState {
    index: HashMap<String, DiskEntry>,
    byte_count: u64,
    stats: DiskIoStats,
}

impl DiskState {
    fn insert(&mut self, key: String, entry: DiskEntry) {
        if let Some(old) = self.index.insert(key, entry) {
            self.byte_count = self.byte_count.saturating_sub(old.size);
        }
        self.byte_count += entry.size;
    }

    fn forget(&mut self, key: &str) {
        if let Some(old) = self.index.remove(key) {
            self.byte_count = self.byte_count.saturating_sub(old.size);
        }
    }
}

/// File-per-key persistent tier.
///
/// File I/O for a key runs under that key's stripe lock; the index lock is only held
/// for bookkeeping, so a slow operation on one key does not stall the others.
/// `remove_all` takes every stripe.
pub struct DiskCache<V> {
    directory: PathBuf,
    codec: Arc<dyn Codec<V>>,
    state: Mutex<DiskState>,
    stripes: Vec<Mutex<()>>,
    hasher: RandomState,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for DiskCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("directory", &self.directory)
            .field("byte_count", &self.state.lock().byte_count)
            .finish()
    }
}

impl<V> DiskCache<V> {
    /// Open the tier rooted at `directory`, indexing whatever is already there.
    ///
    /// Staging files left behind by interrupted writes are deleted. The directory
    /// itself is created on the first write.
    pub fn open(directory: PathBuf, codec: Arc<dyn Codec<V>>) -> Self {
        let mut state = DiskState::default();

        match fs::read_dir(&directory) {
            Ok(entries) => {
                let mut stale_staging = 0usize;
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Ok(meta) = entry.metadata() else {
                        continue;
                    };
                    if !meta.is_file() {
                        continue;
                    }
                    let file_name = entry.file_name();
                    let Some(file_name) = file_name.to_str() else {
                        continue;
                    };

                    if file_name.starts_with(STAGING_PREFIX) {
                        match fs::remove_file(&path) {
                            Ok(()) => stale_staging += 1,
                            Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove staging file"),
                        }
                        continue;
                    }

                    let key = if file_name.starts_with(HASHED_MARKER) {
                        read_key_header(&path)
                    } else {
                        decode_key(file_name)
                    };
                    let Some(key) = key else {
                        continue;
                    };

                    let last_access = meta.modified().unwrap_or_else(|_| SystemTime::now());
                    state.insert(
                        key,
                        DiskEntry {
                            last_access,
                            size: meta.len(),
                        },
                    );
                }
                info!(
                    path = %directory.display(),
                    entries = state.index.len(),
                    bytes = state.byte_count,
                    stale_staging,
                    "Indexed disk tier"
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %directory.display(), error = %e, "Cannot index disk tier");
            }
        }

        Self {
            directory,
            codec,
            state: Mutex::new(state),
            stripes: (0..IO_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
            _value: PhantomData,
        }
    }

    /// The namespace directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    /// Last recorded access time of `key`.
    pub fn last_access(&self, key: &str) -> Option<SystemTime> {
        self.state.lock().index.get(key).map(|e| e.last_access)
    }

    /// Get disk I/O statistics.
    pub fn stats(&self) -> DiskIoStats {
        self.state.lock().stats.clone()
    }

    /// Path of the file holding `key`.
    pub fn entry_path(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() {
            return None;
        }
        Some(self.directory.join(entry_file_name(key)))
    }

    fn stripe_of(&self, key: &str) -> usize {
        self.hasher.hash_one(key) as usize % self.stripes.len()
    }

    fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock()
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.directory)?;
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let staging = self.directory.join(format!("{STAGING_PREFIX}{file_name}"));
        fs::write(&staging, data)?;
        fs::rename(&staging, path).inspect_err(|_| {
            let _ = fs::remove_file(&staging);
        })
    }

    /// Delete `key`'s file and drop it from the index. The caller holds its stripe.
    fn delete_entry(&self, key: &str, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Could not delete entry file");
                return false;
            }
        }
        self.state.lock().forget(key);
        true
    }
}

impl<V: Send + Sync> CacheTier<V> for DiskCache<V> {
    fn kind(&self) -> TierKind {
        TierKind::Disk
    }

    fn get(&self, key: &str) -> Option<Arc<V>> {
        let path = self.entry_path(key)?;
        let _io = self.lock_key(key);

        if !self.state.lock().index.contains_key(key) {
            return None;
        }

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.state.lock().forget(key);
                return None;
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Disk read failed");
                return None;
            }
        };

        let payload = if is_hashed_name(&path) {
            match split_key_header(&data) {
                Some((stored, payload)) if stored == key => Some(payload),
                _ => None,
            }
        } else {
            Some(data.as_slice())
        };

        let value = match payload.map(|payload| self.codec.decode(payload)) {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                warn!(key, path = %path.display(), error = %e, "Discarding undecodable entry");
                self.delete_entry(key, &path);
                return None;
            }
            None => {
                warn!(key, path = %path.display(), "Discarding entry with a mismatched key header");
                self.delete_entry(key, &path);
                return None;
            }
        };

        let now = SystemTime::now();
        if let Err(e) = set_mtime(&path, now) {
            debug!(key, error = %e, "Could not refresh file mtime");
        }

        let mut state = self.state.lock();
        state.insert(
            key.to_string(),
            DiskEntry {
                last_access: now,
                size: data.len() as u64,
            },
        );
        state.stats.total_reads += 1;
        state.stats.total_bytes_read += data.len() as u64;
        drop(state);

        debug!(key, size = data.len(), "Read entry from disk");
        Some(Arc::new(value))
    }

    fn set(&self, key: &str, value: Arc<V>) -> Result<(), TierError> {
        let path = self
            .entry_path(key)
            .ok_or_else(|| TierError::InvalidKey(key.to_string()))?;

        let data = match self.codec.encode(&value) {
            Ok(payload) if is_hashed_name(&path) => with_key_header(key, &payload),
            Ok(payload) => payload,
            Err(e) => {
                self.state.lock().stats.failed_writes += 1;
                return Err(e.into());
            }
        };

        let _io = self.lock_key(key);
        if let Err(e) = self.write_file(&path, &data) {
            self.state.lock().stats.failed_writes += 1;
            return Err(e.into());
        }

        let mut state = self.state.lock();
        state.insert(
            key.to_string(),
            DiskEntry {
                last_access: SystemTime::now(),
                size: data.len() as u64,
            },
        );
        state.stats.total_writes += 1;
        state.stats.total_bytes_written += data.len() as u64;
        drop(state);

        debug!(key, size = data.len(), path = %path.display(), "Wrote entry to disk");
        Ok(())
    }

    fn remove(&self, key: &str) {
        let Some(path) = self.entry_path(key) else {
            return;
        };
        let _io = self.lock_key(key);
        if self.delete_entry(key, &path) {
            debug!(key, "Deleted entry file");
        }
    }

    fn trim_to_date(&self, date: SystemTime) {
        let stale: Vec<String> = self
            .state
            .lock()
            .index
            .iter()
            .filter(|(_, entry)| entry.last_access < date)
            .map(|(key, _)| key.clone())
            .collect();

        let mut trimmed = 0usize;
        for key in &stale {
            let _io = self.lock_key(key);
            // Touched or rewritten since the scan.
            let still_stale = self
                .state
                .lock()
                .index
                .get(key)
                .is_some_and(|entry| entry.last_access < date);
            if !still_stale {
                continue;
            }
            let path = self.directory.join(entry_file_name(key));
            if self.delete_entry(key, &path) {
                trimmed += 1;
            }
        }

        if trimmed > 0 {
            let state = self.state.lock();
            info!(
                trimmed,
                remaining = state.index.len(),
                bytes = state.byte_count,
                "Trimmed disk tier"
            );
        }
    }

    fn remove_all(&self) {
        let _io: Vec<MutexGuard<'_, ()>> = self.stripes.iter().map(|s| s.lock()).collect();

        match fs::remove_dir_all(&self.directory) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.directory.display(), error = %e, "Could not clear disk tier"),
        }

        let mut state = self.state.lock();
        state.index.clear();
        state.byte_count = 0;
        drop(state);
        info!(path = %self.directory.display(), "Cleared disk tier");
    }
}

impl<V: Send + Sync> PersistentTier<V> for DiskCache<V> {
    fn byte_count(&self) -> u64 {
        self.state.lock().byte_count
    }

    fn touch(&self, key: &str) {
        let Some(path) = self.entry_path(key) else {
            return;
        };
        let _io = self.lock_key(key);

        let now = SystemTime::now();
        match self.state.lock().index.get_mut(key) {
            Some(entry) => entry.last_access = now,
            None => return,
        }
        if let Err(e) = set_mtime(&path, now) {
            debug!(key, error = %e, "Could not refresh file mtime");
        }
    }
}

fn set_mtime(path: &Path, time: SystemTime) -> std::io::Result<()> {
    fs::File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(time))
}

fn is_hashed_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(HASHED_MARKER))
}

/// `[key length: u32 LE][key bytes][payload]`
fn with_key_header(key: &str, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + key.len() + payload.len());
    data.extend_from_slice(&(key.len() as u32).to_le_bytes());
    data.extend_from_slice(key.as_bytes());
    data.extend_from_slice(payload);
    data
}

fn split_key_header(data: &[u8]) -> Option<(&str, &[u8])> {
    let len_bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let key = data.get(4..4 + len)?;
    Some((std::str::from_utf8(key).ok()?, &data[4 + len..]))
}

fn read_key_header(path: &Path) -> Option<String> {
    let mut file = fs::File::open(path).ok()?;
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes).ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 || len > MAX_HEADER_KEY_BYTES {
        return None;
    }
    let mut key = vec![0u8; len];
    file.read_exact(&mut key).ok()?;
    String::from_utf8(key).ok()
}

/// File name for `key`: the percent-encoded key, or a readable prefix plus a
/// SHA-256 digest when the encoding would be longer than the filesystem allows.
pub fn entry_file_name(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_FILE_NAME_BYTES {
        return encoded;
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!(
        "{HASHED_MARKER}{}{HASHED_MARKER}{digest}",
        &encoded[..HASHED_PREFIX_BYTES]
    )
}

/// Turn a key into a file name: `[A-Za-z0-9_-]` pass through, every other byte
/// becomes `%XX`.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_key`]; `None` for names this tier did not produce.
pub fn decode_key(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = file_name.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
