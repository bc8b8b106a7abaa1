//! Key-value persistence for CA material.
//!
//! The issuer only ever stores four values: the root and intermediate
//! keypairs and their certificates. Backends hold opaque byte strings.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{constants::MAX_STORAGE_VALUE_LEN, error::StorageError};

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage key for CA material: the prefix followed by the lowercase hex of `id`.
pub fn persistent_key(prefix: &str, id: u64) -> String {
    format!("{prefix}{id:x}")
}

/// A byte-oriented key-value store shared between issuances.
///
/// Implementations must be safe to call from several threads; each call is
/// expected to be atomic on its own.
pub trait PersistentStorage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    fn remove(&self, key: &str) -> StorageResult<()>;
}

impl<T: PersistentStorage + ?Sized> PersistentStorage for Arc<T> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }
}

fn check_value_len(key: &str, value: &[u8]) -> StorageResult<()> {
    if value.len() > MAX_STORAGE_VALUE_LEN {
        return Err(StorageError::ValueTooLarge {
            key: key.to_string(),
            len: value.len(),
            max: MAX_STORAGE_VALUE_LEN,
        });
    }
    Ok(())
}

/// Process-local storage, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        let mut keys: Vec<_> = data.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.data.lock().map_err(|_| StorageError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl PersistentStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        check_value_len(key, value)?;
        let mut data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        data.remove(key);
        Ok(())
    }
}

/// A JSON file of hex-encoded values, rewritten on every change.
///
/// Values are kept in memory and persisted directly on each `set` or
/// `remove`; there is no background flush.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let file = fs::File::open(&path)?;
            serde_json::from_reader(file)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = data.len(), "Opened file storage");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        let tmp = self.path.with_extension("tmp");
        let file = fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&file, data)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistentStorage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        data.get(key)
            .map(|value| {
                hex::decode(value).map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        check_value_len(key, value)?;
        let mut data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        let previous = data.insert(key.to_string(), hex::encode(value));
        if let Err(e) = self.persist(&data) {
            // Keep memory in step with the file
            match previous {
                Some(previous) => data.insert(key.to_string(), previous),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.lock().map_err(|_| StorageError::Poisoned)?;
        if data.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }
}
