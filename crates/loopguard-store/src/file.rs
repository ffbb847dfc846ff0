//! File-backed shared state store.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/<key>.json   document bytes
//! <state_dir>/<key>.lock   exclusive lock (fs2 / flock)
//! ```
//!
//! Writes use the write-rename pattern so a reader never observes a torn
//! document, even one that bypasses the lock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use loopguard_config::{log_store_debug, log_store_warn, Config};

use crate::{LockedDocument, Result, SharedStateStore, StoreError};

const DOCUMENT_EXT: &str = "json";
const LOCK_EXT: &str = "lock";

/// Shared state store keeping one JSON file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
    lock_poll: Duration,
    allocation_hint: usize,
}

impl FileStore {
    /// Create a store rooted at `root` with default lock and size settings
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = loopguard_config::StoreConfig::default();
        Self {
            root: root.into(),
            lock_timeout: Duration::from_millis(defaults.lock_timeout_ms),
            lock_poll: Duration::from_millis(defaults.lock_poll_ms),
            allocation_hint: defaults.allocation_hint_bytes,
        }
    }

    /// Create a store from the `[store]` config section
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: loopguard_config::path::resolve_state_dir(config),
            lock_timeout: Duration::from_millis(config.store.lock_timeout_ms),
            lock_poll: Duration::from_millis(config.store.lock_poll_ms.max(1)),
            allocation_hint: config.store.allocation_hint_bytes,
        }
    }

    /// Configure lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Configure the maximum document size.
    pub fn with_allocation_hint(mut self, bytes: usize) -> Self {
        self.allocation_hint = bytes;
        self
    }

    /// Directory holding documents and lock files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{DOCUMENT_EXT}"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{LOCK_EXT}"))
    }

    /// Ensure the state directory exists with owner-only permissions
    fn ensure_root(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(())
    }

    fn acquire(&self, key: &str) -> Result<File> {
        self.ensure_root()?;
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(key))?;

        let start = Instant::now();
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == ErrorKind::WouldBlock || is_contended(&e) => {
                    if start.elapsed() >= self.lock_timeout {
                        let waited_ms = start.elapsed().as_millis() as u64;
                        log_store_warn!("Timeout waiting for device lock", key = key, waited_ms = waited_ms);
                        return Err(StoreError::LockTimeout {
                            key: key.to_string(),
                            waited_ms,
                        });
                    }
                    std::thread::sleep(self.lock_poll);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// fs2 reports contention with the platform's lock error, which is not
/// always mapped to `WouldBlock`.
fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl SharedStateStore for FileStore {
    fn lock<'a>(&'a self, key: &str) -> Result<Box<dyn LockedDocument + 'a>> {
        let lock_file = self.acquire(key)?;
        log_store_debug!("Acquired device lock", key = key);
        Ok(Box::new(FileGuard {
            store: self,
            key: key.to_string(),
            lock_file,
        }))
    }

    fn keys(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Lock guard for one document of a [`FileStore`]
struct FileGuard<'a> {
    store: &'a FileStore,
    key: String,
    lock_file: File,
}

impl LockedDocument for FileGuard<'_> {
    fn key(&self) -> &str {
        &self.key
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        match fs::read(self.store.document_path(&self.key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.store.allocation_hint {
            return Err(StoreError::DocumentTooLarge {
                key: self.key.clone(),
                size: bytes.len(),
                limit: self.store.allocation_hint,
            });
        }

        let path = self.store.document_path(&self.key);
        let tmp_path = path.with_extension(format!("{DOCUMENT_EXT}.tmp"));

        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}
