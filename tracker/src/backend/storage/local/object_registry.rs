//! # Object Registry
//!
//! Keeps the list of objects (independent herds/databases) under
//! `cattleTracker_objects` and the active pointer under
//! `cattleTracker_currentObject`.
//!
//! ## Bootstrap
//!
//! Installs that predate objects kept a single collection under
//! `cattleEntries`. On first start that collection is copied verbatim into
//! the default object's slot. After bootstrap there is always at least one
//! object and the active pointer names one of them.

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{info, warn};
use shared::{DatabaseObject, DEFAULT_OBJECT_ID};
use std::sync::Arc;

use crate::backend::storage::error::StorageError;
use crate::backend::storage::keys::{entries_key, CURRENT_OBJECT_KEY, LEGACY_ENTRIES_KEY, OBJECTS_KEY};
use crate::backend::storage::traits::KeyValueStore;

#[derive(Clone)]
pub struct ObjectRegistry {
    kv: Arc<dyn KeyValueStore>,
}

impl ObjectRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Idempotent bootstrap, see module docs
    pub fn ensure_objects_and_migration(&self) -> Result<()> {
        let mut objects = match self.kv.get(OBJECTS_KEY)? {
            Some(raw) => match serde_json::from_str::<Vec<DatabaseObject>>(&raw) {
                Ok(objects) => objects,
                Err(e) => {
                    warn!("Object list is unreadable and will be rebuilt: {}", e);
                    Vec::new()
                }
            },
            None => {
                self.migrate_legacy_collection()?;
                Vec::new()
            }
        };

        if objects.is_empty() {
            objects.push(DatabaseObject::default_object());
            self.save_objects(&objects)?;
            info!("Registered default object");
        }

        let current = self.current_object_id();
        if !objects.iter().any(|o| o.id == current) {
            let fallback = objects[0].id.clone();
            warn!("Active object '{}' does not exist, switching to '{}'", current, fallback);
            self.set_current_object_id(&fallback)?;
        } else if self.kv.get(CURRENT_OBJECT_KEY)?.is_none() {
            self.set_current_object_id(&current)?;
        }

        Ok(())
    }

    fn migrate_legacy_collection(&self) -> Result<(), StorageError> {
        let default_key = entries_key(DEFAULT_OBJECT_ID);
        if let Some(legacy) = self.kv.get(LEGACY_ENTRIES_KEY)? {
            if self.kv.get(&default_key)?.is_none() {
                self.kv.set(&default_key, &legacy)?;
                info!("Migrated legacy collection into the default object");
            }
        }
        Ok(())
    }

    /// All registered objects, in creation order
    pub fn get_objects_list(&self) -> Result<Vec<DatabaseObject>> {
        match self.kv.get(OBJECTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Object list is unreadable: {}", e);
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }

    fn save_objects(&self, objects: &[DatabaseObject]) -> Result<(), StorageError> {
        let payload = serde_json::to_string(objects).map_err(|source| StorageError::Serialization {
            key: OBJECTS_KEY.to_string(),
            source,
        })?;
        self.kv.set(OBJECTS_KEY, &payload)
    }

    /// Active object id, `default` when unset
    pub fn get_current_object_id(&self) -> String {
        self.current_object_id()
    }

    fn current_object_id(&self) -> String {
        match self.kv.get(CURRENT_OBJECT_KEY) {
            Ok(Some(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Ok(_) => DEFAULT_OBJECT_ID.to_string(),
            Err(e) => {
                warn!("Failed to read active object, using default: {}", e);
                DEFAULT_OBJECT_ID.to_string()
            }
        }
    }

    pub fn set_current_object_id(&self, object_id: &str) -> Result<(), StorageError> {
        self.kv.set(CURRENT_OBJECT_KEY, object_id)
    }

    /// Register a new object and make it active
    pub fn add_object(&self, name: &str) -> Result<DatabaseObject> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Object name cannot be empty"));
        }

        let mut objects = self.get_objects_list()?;
        let mut millis = Utc::now().timestamp_millis().max(0) as u64;
        let mut id = DatabaseObject::generate_id(millis);
        while objects.iter().any(|o| o.id == id) {
            millis += 1;
            id = DatabaseObject::generate_id(millis);
        }

        let object = DatabaseObject {
            id,
            name: name.to_string(),
        };
        objects.push(object.clone());
        self.save_objects(&objects)?;
        self.set_current_object_id(&object.id)?;

        info!("Created object '{}' ({})", object.name, object.id);
        Ok(object)
    }

    /// Rename an object. Returns false if the id is unknown or the name blank.
    pub fn update_object(&self, object_id: &str, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }

        let mut objects = self.get_objects_list()?;
        let Some(object) = objects.iter_mut().find(|o| o.id == object_id) else {
            return Ok(false);
        };
        object.name = name.to_string();
        self.save_objects(&objects)?;

        info!("Renamed object {} to '{}'", object_id, name);
        Ok(true)
    }

    /// Remove an object and its collection. Returns the id that is active
    /// afterwards.
    pub fn delete_object(&self, object_id: &str) -> Result<String> {
        let mut objects = self.get_objects_list()?;
        let before = objects.len();
        objects.retain(|o| o.id != object_id);
        if objects.len() == before {
            return Err(anyhow!("Object not found: {}", object_id));
        }

        if objects.is_empty() {
            objects.push(DatabaseObject::default_object());
        }
        self.save_objects(&objects)?;
        self.kv.remove(&entries_key(object_id))?;
        info!("Deleted object {}", object_id);

        let current = self.current_object_id();
        if current == object_id || !objects.iter().any(|o| o.id == current) {
            let next = objects[0].id.clone();
            self.set_current_object_id(&next)?;
            info!("Active object is now {}", next);
            Ok(next)
        } else {
            Ok(current)
        }
    }

    /// Whether an object with this id is registered
    pub fn contains(&self, object_id: &str) -> Result<bool> {
        Ok(self.get_objects_list()?.iter().any(|o| o.id == object_id))
    }
}
