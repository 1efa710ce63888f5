//! Durable key/value storage boundary.
//!
//! The cache and the navigation stacks each own a private key namespace
//! inside one store. Values are opaque bytes; callers choose the encoding.

mod file;
mod memory;

use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage key '{0}' cannot be encoded")]
    InvalidKey(String),
}

/// Byte-oriented key/value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Joins namespace segments with `/`.
pub fn storage_key(parts: &[&str]) -> String {
    parts.join("/")
}
