//! Persistent key-value storage seam.
//!
//! Credentials and the active tenant live in a small string-keyed store. The
//! library reads it fresh on every request and never caches values, so a
//! token refresh or tenant switch made between two calls is observed by the
//! second one.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by storage writes
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage file {path} is not a JSON object of strings: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// String key-value store shared between the token store and tenant resolver
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, if any
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value
    ///
    /// # Errors
    /// Returns `StorageError` if the backing medium cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`; removing a missing key is not an error
    ///
    /// # Errors
    /// Returns `StorageError` if the backing medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Apply several writes together; `None` removes the key
    ///
    /// Stores that can commit a batch atomically override this so a failed
    /// write leaves every key unchanged.
    ///
    /// # Errors
    /// Returns `StorageError` if the backing medium cannot be written.
    fn update(&self, changes: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        for (key, value) in changes {
            match value {
                Some(value) => self.set(key, value)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

/// Shared handle to a storage adapter
pub type SharedStore = Arc<dyn KeyValueStore>;

/// In-process store
///
/// Used in tests and in server-side contexts that inject credentials
/// programmatically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`
    #[must_use]
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// JSON-file-backed store
///
/// The whole map is loaded at open and written back after every mutation.
/// The file is replaced through a sibling temp file so a crash mid-write
/// never leaves a truncated document behind. A mutation only becomes visible
/// to `get` once it is on disk. Writers in other processes are
/// last-write-wins.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`; a missing file is an empty store
    ///
    /// # Errors
    /// Returns `StorageError::Io` if the file exists but cannot be read, or
    /// `StorageError::Corrupt` if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(entries).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(&[(key, None)])
    }

    fn update(&self, changes: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    next.insert((*key).to_owned(), (*value).to_owned());
                }
                None => {
                    next.remove(*key);
                }
            }
        }
        if next == *entries {
            return Ok(());
        }

        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}
