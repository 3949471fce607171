//! # Local Backend
//!
//! Persistence backend that keeps everything in the local key-value store.
//! Entry mutations are read-modify-write against the active object's
//! collection; a failed write leaves the stored collection as it was.

pub mod entry_store;
pub mod object_registry;

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use shared::{CowEntry, DatabaseObject};
use std::sync::Arc;

use crate::backend::domain::models::entry::EntryValidationError;
use crate::backend::storage::sanitize::sanitized;
use crate::backend::storage::traits::{BackendMode, KeyValueStore, PersistenceBackend};

pub use entry_store::LocalEntryStore;
pub use object_registry::ObjectRegistry;

#[derive(Clone)]
pub struct LocalBackend {
    entries: LocalEntryStore,
    registry: ObjectRegistry,
}

impl LocalBackend {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            entries: LocalEntryStore::new(kv.clone()),
            registry: ObjectRegistry::new(kv),
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    fn active(&self) -> String {
        self.registry.get_current_object_id()
    }
}

#[async_trait]
impl PersistenceBackend for LocalBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Local
    }

    async fn load(&self) -> Result<Vec<CowEntry>> {
        Ok(self.entries.load(&self.active())?)
    }

    async fn save(&self, entries: &[CowEntry]) -> Result<()> {
        Ok(self.entries.save(&self.active(), entries)?)
    }

    async fn create_entry(&self, entry: &CowEntry) -> Result<Vec<CowEntry>> {
        let object_id = self.active();
        let mut entries = self.entries.load(&object_id)?;
        let entry = sanitized(entry);
        if entries.iter().any(|e| e.cattle_id == entry.cattle_id) {
            return Err(EntryValidationError::DuplicateCattleId(entry.cattle_id).into());
        }

        let cattle_id = entry.cattle_id.clone();
        entries.push(entry);
        self.entries.save(&object_id, &entries)?;
        info!("Created entry {} in {}", cattle_id, object_id);
        Ok(entries)
    }

    async fn update_entry(&self, cattle_id: &str, entry: &CowEntry) -> Result<Vec<CowEntry>> {
        let object_id = self.active();
        let mut entries = self.entries.load(&object_id)?;

        let index = entries
            .iter()
            .position(|e| e.cattle_id == cattle_id)
            .ok_or_else(|| EntryValidationError::NotFound(cattle_id.to_string()))?;
        let entry = sanitized(entry);
        if entry.cattle_id != cattle_id && entries.iter().any(|e| e.cattle_id == entry.cattle_id) {
            return Err(EntryValidationError::DuplicateCattleId(entry.cattle_id).into());
        }

        entries[index] = entry;
        self.entries.save(&object_id, &entries)?;
        info!("Updated entry {} in {}", cattle_id, object_id);
        Ok(entries)
    }

    async fn delete_entry(&self, cattle_id: &str) -> Result<Vec<CowEntry>> {
        let object_id = self.active();
        let mut entries = self.entries.load(&object_id)?;

        let before = entries.len();
        entries.retain(|e| e.cattle_id != cattle_id);
        if entries.len() == before {
            return Err(EntryValidationError::NotFound(cattle_id.to_string()).into());
        }

        self.entries.save(&object_id, &entries)?;
        info!("Deleted entry {} from {}", cattle_id, object_id);
        Ok(entries)
    }

    async fn ensure_objects(&self) -> Result<()> {
        self.registry.ensure_objects_and_migration()
    }

    async fn list_objects(&self) -> Result<Vec<DatabaseObject>> {
        self.registry.get_objects_list()
    }

    async fn create_object(&self, name: &str) -> Result<DatabaseObject> {
        self.registry.add_object(name)
    }

    async fn rename_object(&self, object_id: &str, name: &str) -> Result<bool> {
        self.registry.update_object(object_id, name)
    }

    async fn delete_object(&self, object_id: &str) -> Result<()> {
        self.registry.delete_object(object_id)?;
        Ok(())
    }

    fn current_object_id(&self) -> String {
        self.active()
    }

    async fn set_current_object_id(&self, object_id: &str) -> Result<()> {
        if !self.registry.contains(object_id)? {
            return Err(anyhow::anyhow!("Object not found: {}", object_id));
        }
        Ok(self.registry.set_current_object_id(object_id)?)
    }
}
