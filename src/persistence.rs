//! Best-effort key-value persistence for sources and queue snapshots.
//!
//! Values are opaque strings (JSON in practice). [`FileStore`] keeps one
//! `<key>.json` file per key and replaces it atomically via a temporary file;
//! [`MemoryStore`] backs tests and ephemeral runs.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

/// Storage key holding the source descriptor list.
pub const SOURCES_KEY: &str = "sources";

/// Storage key holding the queue snapshot.
pub const QUEUE_SNAPSHOT_KEY: &str = "queue_snapshot";

/// Errors from a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing medium is full.
    #[error("storage quota exceeded writing '{key}'")]
    QuotaExceeded {
        /// Key being written.
        key: String,
    },

    /// Access to the backing medium was refused.
    #[error("permission denied for '{key}'")]
    PermissionDenied {
        /// Key being accessed.
        key: String,
    },

    /// Stored data could not be decoded.
    #[error("stored value for '{key}' is corrupt: {reason}")]
    ParseFailure {
        /// Key being read.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// Any other IO failure.
    #[error("storage IO error for '{key}': {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Key contains characters that cannot form a file name.
    #[error("invalid storage key '{key}'")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },
}

impl PersistenceError {
    /// Classifies an IO error for `key`.
    pub fn from_io(key: impl Into<String>, source: io::Error) -> Self {
        let key = key.into();
        match source.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => {
                Self::QuotaExceeded { key }
            }
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied { key }
            }
            _ => Self::Io { key, source },
        }
    }

    /// Creates a parse failure.
    pub fn parse(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::ParseFailure {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value; `Ok(None)` when the key was never written.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Writes a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the medium cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Deletes a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Directory-backed store: one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| PersistenceError::from_io(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
        if !valid {
            return Err(PersistenceError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Err(PersistenceError::parse(key, e))
            }
            Err(e) => Err(PersistenceError::from_io(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|e| PersistenceError::from_io(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| PersistenceError::from_io(key, e))?;
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::from_io(key, e)),
        }
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip_and_missing_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("state")).unwrap();

        assert_eq!(store.get(SOURCES_KEY).unwrap(), None);
        store.set(SOURCES_KEY, "[1,2]").unwrap();
        assert_eq!(store.get(SOURCES_KEY).unwrap().as_deref(), Some("[1,2]"));
        assert!(dir.path().join("state/sources.json").exists());

        store.set(SOURCES_KEY, "[]").unwrap();
        assert_eq!(store.get(SOURCES_KEY).unwrap().as_deref(), Some("[]"));

        store.remove(SOURCES_KEY).unwrap();
        store.remove(SOURCES_KEY).unwrap();
        assert_eq!(store.get(SOURCES_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(PersistenceError::InvalidKey { .. })
        ));
        assert!(matches!(store.get(""), Err(PersistenceError::InvalidKey { .. })));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_io_error_classification() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            PersistenceError::from_io("k", denied),
            PersistenceError::PermissionDenied { .. }
        ));
        let full = io::Error::new(io::ErrorKind::StorageFull, "full");
        assert!(matches!(
            PersistenceError::from_io("k", full),
            PersistenceError::QuotaExceeded { .. }
        ));
        let other = io::Error::other("boom");
        assert!(matches!(
            PersistenceError::from_io("k", other),
            PersistenceError::Io { .. }
        ));
    }
}
