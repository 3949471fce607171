//! # Storage Traits
//!
//! This module defines the storage abstraction traits that allow different
//! storage backends to be used interchangeably in the domain layer.
//!
//! Two layers are described here:
//!
//! - [`KeyValueStore`]: the durable string key-value medium (a directory of
//!   files on desktop, a map in tests). Synchronous, like the browser storage
//!   it replaces.
//! - [`PersistenceBackend`]: the record-level interface the domain talks to.
//!   It has exactly two implementations, the local store and the remote API
//!   facade, and one of them is selected at startup.

use anyhow::Result;
use async_trait::async_trait;
use shared::{CowEntry, DatabaseObject};

use super::error::StorageError;

/// Durable string key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys currently stored
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Which backend implementation is serving the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Local,
    Remote,
}

/// Record-level persistence interface shared by the local store and the
/// remote API facade.
///
/// Mutating entry operations return the collection of the active object as
/// it stands after the mutation, so the caller can replace its in-memory copy
/// without guessing how the backend merged the change.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Which implementation this is
    fn mode(&self) -> BackendMode;

    /// Load the collection of the active object
    async fn load(&self) -> Result<Vec<CowEntry>>;

    /// Persist the whole collection of the active object
    async fn save(&self, entries: &[CowEntry]) -> Result<()>;

    /// Create a new entry in the active object
    async fn create_entry(&self, entry: &CowEntry) -> Result<Vec<CowEntry>>;

    /// Replace the entry currently identified by `cattle_id`
    async fn update_entry(&self, cattle_id: &str, entry: &CowEntry) -> Result<Vec<CowEntry>>;

    /// Delete the entry identified by `cattle_id`
    async fn delete_entry(&self, cattle_id: &str) -> Result<Vec<CowEntry>>;

    /// Make sure at least one object exists and the active pointer is valid
    async fn ensure_objects(&self) -> Result<()>;

    /// List all objects
    async fn list_objects(&self) -> Result<Vec<DatabaseObject>>;

    /// Create a new object and make it active
    async fn create_object(&self, name: &str) -> Result<DatabaseObject>;

    /// Rename an object. Returns false when the id is unknown or the name blank
    async fn rename_object(&self, object_id: &str, name: &str) -> Result<bool>;

    /// Delete an object and its entries. If it was active, another object
    /// becomes active (recreating the default object when none remain)
    async fn delete_object(&self, object_id: &str) -> Result<()>;

    /// Id of the active object
    fn current_object_id(&self) -> String;

    /// Change the active object
    async fn set_current_object_id(&self, object_id: &str) -> Result<()>;
}
