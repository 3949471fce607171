//! # Local Entry Store
//!
//! Reads and writes the entry collection of one object under
//! `cattleEntries_<objectId>`.
//!
//! ## Load
//!
//! Loading is self-healing: garbage records are dropped, strings are
//! sanitized, old records are migrated, and if any of that changed the
//! collection it is written straight back. A payload that cannot be parsed at
//! all is deleted and an empty collection returned, so a corrupted write can
//! never lock the user out of the app.
//!
//! ## Save
//!
//! Saving sanitizes without dropping anything and reports storage failures
//! (quota, I/O) to the caller.

use log::{error, info, warn};
use shared::CowEntry;
use std::sync::Arc;

use crate::backend::storage::error::StorageError;
use crate::backend::storage::integrity::clean_collection;
use crate::backend::storage::keys::entries_key;
use crate::backend::storage::sanitize::sanitized;
use crate::backend::storage::traits::KeyValueStore;

#[derive(Clone)]
pub struct LocalEntryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalEntryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load and clean the collection of `object_id`
    pub fn load(&self, object_id: &str) -> Result<Vec<CowEntry>, StorageError> {
        let key = entries_key(object_id);
        let raw = match self.kv.get(&key)? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };

        let cleaned = match clean_collection(&raw) {
            Ok(cleaned) => cleaned,
            Err(e) => {
                error!("Collection '{}' is corrupted and will be reset: {}", key, e);
                if let Err(remove_err) = self.kv.remove(&key) {
                    error!("Failed to remove corrupted collection '{}': {}", key, remove_err);
                }
                return Ok(Vec::new());
            }
        };

        if cleaned.discarded > 0 {
            warn!("Dropped {} unreadable records from '{}'", cleaned.discarded, key);
        }
        if cleaned.migrated > 0 {
            info!("Migrated {} records in '{}'", cleaned.migrated, key);
        }

        if cleaned.needs_rewrite() {
            // The cleaned copy is still usable when the write-back fails
            if let Err(e) = self.save(object_id, &cleaned.entries) {
                warn!("Failed to write back cleaned collection '{}': {}", key, e);
            }
        }

        Ok(cleaned.entries)
    }

    /// Sanitize and persist the collection of `object_id`
    pub fn save(&self, object_id: &str, entries: &[CowEntry]) -> Result<(), StorageError> {
        let key = entries_key(object_id);
        let cleaned: Vec<CowEntry> = entries.iter().map(sanitized).collect();
        let payload = serde_json::to_string(&cleaned).map_err(|source| StorageError::Serialization {
            key: key.clone(),
            source,
        })?;
        self.kv.set(&key, &payload)?;
        info!("Saved {} entries to '{}'", cleaned.len(), key);
        Ok(())
    }

    /// Remove the persisted collection of `object_id`
    pub fn delete(&self, object_id: &str) -> Result<(), StorageError> {
        self.kv.remove(&entries_key(object_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::kv::MemoryKeyValueStore;
    use serde_json::{json, Value};

    fn setup_store() -> (LocalEntryStore, Arc<MemoryKeyValueStore>) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        (LocalEntryStore::new(kv.clone()), kv)
    }

    #[test]
    fn test_load_missing_collection_is_empty() {
        let (store, _kv) = setup_store();
        assert!(store.load("default").unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let (store, _kv) = setup_store();
        let mut entry = CowEntry::new("101");
        entry.nickname = "Зорька".to_string();
        store.save("default", &[entry.clone()]).unwrap();

        let loaded = store.load("default").unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[test]
    fn test_collections_are_isolated_per_object() {
        let (store, _kv) = setup_store();
        store.save("default", &[CowEntry::new("1")]).unwrap();
        store.save("obj_2", &[CowEntry::new("2")]).unwrap();

        assert_eq!(store.load("default").unwrap()[0].cattle_id, "1");
        assert_eq!(store.load("obj_2").unwrap()[0].cattle_id, "2");
    }

    #[test]
    fn test_save_sanitizes_without_dropping() {
        let (store, kv) = setup_store();
        let mut garbage = CowEntry::new("");
        garbage.note = "x\u{0}y".to_string();
        store.save("default", &[garbage]).unwrap();

        let raw: Value = serde_json::from_str(&kv.get("cattleEntries_default").unwrap().unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 1);
        assert_eq!(raw[0]["note"], "xy");
    }

    #[test]
    fn test_load_heals_and_rewrites() {
        let (store, kv) = setup_store();
        let payload = json!([
            { "cattleId": "101", "inseminationDate": "2024-02-15", "bull": "Атлант" },
            { "cattleId": "" }
        ]);
        kv.set("cattleEntries_default", &payload.to_string()).unwrap();

        let loaded = store.load("default").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].insemination_history.len(), 1);

        let rewritten: Value = serde_json::from_str(&kv.get("cattleEntries_default").unwrap().unwrap()).unwrap();
        assert_eq!(rewritten.as_array().unwrap().len(), 1);
        assert_eq!(rewritten[0]["inseminationHistory"][0]["bull"], "Атлант");
        assert_eq!(rewritten[0]["group"], "");
    }

    #[test]
    fn test_load_keeps_records_with_null_fields() {
        let (store, kv) = setup_store();
        let payload = json!([{ "cattleId": "101", "nickname": null, "note": "keep me" }]);
        kv.set("cattleEntries_default", &payload.to_string()).unwrap();

        let loaded = store.load("default").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].note, "keep me");

        let rewritten: Value = serde_json::from_str(&kv.get("cattleEntries_default").unwrap().unwrap()).unwrap();
        assert_eq!(rewritten[0]["cattleId"], "101");
        assert_eq!(rewritten[0]["nickname"], "");
    }

    #[test]
    fn test_corrupted_payload_resets() {
        let (store, kv) = setup_store();
        kv.set("cattleEntries_default", "{not json").unwrap();

        assert!(store.load("default").unwrap().is_empty());
        assert_eq!(kv.get("cattleEntries_default").unwrap(), None);
    }

    #[test]
    fn test_save_surfaces_quota_errors() {
        let kv = Arc::new(MemoryKeyValueStore::with_quota(16));
        let store = LocalEntryStore::new(kv.clone());
        let err = store.save("default", &[CowEntry::new("101")]).unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(kv.get("cattleEntries_default").unwrap(), None);
    }
}
