//! # loopguard-store
//!
//! Shared state store reachable by every worker process.
//!
//! Each device owns one document, addressed by [`device_key`] and guarded by
//! one exclusive cross-process lock. Callers lock, read, modify, write and
//! drop the guard; dropping the guard releases the lock on every exit path.
//!
//! ## Backends
//!
//! - [`FileStore`]: one JSON document and one `flock`-style lock file per
//!   device under a state directory.

pub mod file;

pub use file::FileStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {waited_ms}ms waiting for lock on '{key}'")]
    LockTimeout { key: String, waited_ms: u64 },

    #[error("document '{key}' is {size} bytes, above the {limit} byte allocation hint")]
    DocumentTooLarge { key: String, size: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A document held under its exclusive lock.
///
/// The lock is released when the value is dropped.
pub trait LockedDocument {
    /// Key this guard was acquired for
    fn key(&self) -> &str;

    /// Current bytes of the document, `None` if it was never written
    fn read(&mut self) -> Result<Option<Vec<u8>>>;

    /// Replace the document
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Persistent key-value byte store with an exclusive lock per key.
pub trait SharedStateStore: Send + Sync {
    /// Block until the lock for `key` is held or the store's timeout elapses
    fn lock<'a>(&'a self, key: &str) -> Result<Box<dyn LockedDocument + 'a>>;

    /// Keys of every document currently stored
    fn keys(&self) -> Result<Vec<String>>;
}

/// Derive the store key of a device.
///
/// Device ids come from the client and may contain anything, so the key is
/// a prefix of their BLAKE3 hash.
pub fn device_key(device_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(device_id.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_key_is_stable() {
        assert_eq!(device_key("android-1234"), device_key("android-1234"));
        assert_ne!(device_key("android-1234"), device_key("android-1235"));
    }

    #[test]
    fn test_device_key_is_file_safe() {
        let key = device_key("../../etc/passwd\0");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
