use thiserror::Error;

/// Failures of the durable key-value layer.
///
/// These are whole-operation failures: they are returned to the caller so the
/// user can be told, never swallowed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded while writing '{key}': {needed} bytes needed, {available} available")]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
    },
    #[error("Failed to read '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize data for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
