//! Key-value store implementations.
//!
//! `FileKeyValueStore` keeps one file per key inside the data directory:
//!
//! ```text
//! data/
//! ├── cattleTracker_objects.json
//! ├── cattleTracker_currentObject.json
//! ├── cattleEntries_default.json
//! └── cattleEntries_obj_1702516122000.json
//! ```
//!
//! Writes go to a temp file that is renamed over the target, so a crash never
//! leaves a half-written collection behind. Both stores accept an optional
//! byte quota, which is how "storage full" surfaces as
//! [`StorageError::QuotaExceeded`].

use log::{debug, info};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::StorageError;
use super::traits::KeyValueStore;

const FILE_EXTENSION: &str = "json";

/// Directory-backed key-value store
pub struct FileKeyValueStore {
    base_directory: PathBuf,
    quota_bytes: Option<u64>,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    /// Open a store rooted at `base_directory`, creating it if needed
    pub fn new<P: AsRef<Path>>(base_directory: P) -> Result<Self, StorageError> {
        let base_path = base_directory.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|source| StorageError::Write {
                key: base_path.display().to_string(),
                source,
            })?;
            info!("Created data directory: {}", base_path.display());
        }

        Ok(Self {
            base_directory: base_path,
            quota_bytes: None,
            write_lock: Mutex::new(()),
        })
    }

    /// Limit the total size of all stored values
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_directory
            .join(format!("{}.{}", encode_key(key), FILE_EXTENSION))
    }

    fn stored_bytes(&self) -> io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.base_directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION) {
                total += fs::metadata(&path)?.len();
            }
        }
        Ok(total)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for(key);
        let write_err = |source| StorageError::Write {
            key: key.to_string(),
            source,
        };

        if let Some(quota) = self.quota_bytes {
            let current = self.stored_bytes().map_err(write_err)?;
            let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let needed = value.len() as u64;
            let available = quota.saturating_sub(current - existing.min(current));
            if needed > available {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available,
                });
            }
        }

        // Atomic write using temp file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, value).map_err(write_err)?;
        fs::rename(&temp_path, &path).map_err(write_err)?;

        debug!("Wrote {} bytes to '{}'", value.len(), key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                debug!("Removed '{}'", key);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Write {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let read_err = |source| StorageError::Read {
            key: self.base_directory.display().to_string(),
            source,
        };

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_directory).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(key) = decode_key(stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory key-value store, used by tests and throwaway sessions
#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(quota) = self.quota_bytes {
            let others: u64 = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            let needed = value.len() as u64;
            let available = quota.saturating_sub(others);
            if needed > available {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available,
                });
            }
        }
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Map a key to a file-name-safe stem. Bytes outside `[A-Za-z0-9_-]` are
/// written as `%XX`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}
