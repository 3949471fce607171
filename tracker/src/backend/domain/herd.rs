//! # Herd Store
//!
//! The application-owned entry collection of the active object. Every
//! mutation goes through here so that validation, history bookkeeping,
//! persistence and change notification are never skipped:
//!
//! 1. validate against the in-memory collection;
//! 2. stamp attribution and append an audit record;
//! 3. hand the entry to the persistence backend;
//! 4. on success replace the in-memory collection with what the backend
//!    returned and publish [`StoreEvent::EntriesUpdated`].
//!
//! A failed backend call leaves the in-memory collection exactly as it was.
//! Mutations are serialized by an async mutex, reads never wait on the
//! network.

use anyhow::Result;
use chrono::NaiveDate;
use log::{info, warn};
use shared::{ActionRecord, CowEntry, DatabaseObject, InseminationRecord, ProtocolAssignment};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::backend::domain::breeding::parse_date;
use crate::backend::domain::events::{EventBus, StoreEvent};
use crate::backend::domain::models::entry::{
    actions, statuses, validate_cattle_id, EntryValidationError, InseminationCommand,
};
use crate::backend::domain::search::search_entries;
use crate::backend::storage::integrity::migrate_insemination_history;
use crate::backend::storage::sanitize::sanitize_entry;
use crate::backend::storage::traits::{BackendMode, PersistenceBackend};

#[derive(Debug, Default)]
struct HerdState {
    entries: Vec<CowEntry>,
}

pub struct HerdStore {
    backend: Arc<dyn PersistenceBackend>,
    events: Arc<EventBus>,
    state: RwLock<HerdState>,
    user_name: RwLock<String>,
    write_lock: Mutex<()>,
}

impl HerdStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>, events: Arc<EventBus>, user_name: &str) -> Self {
        Self {
            backend,
            events,
            state: RwLock::new(HerdState::default()),
            user_name: RwLock::new(user_name.to_string()),
            write_lock: Mutex::new(()),
        }
    }

    /// Bootstrap the object registry and load the active collection
    pub async fn initialize(&self) -> Result<()> {
        self.backend.ensure_objects().await?;
        self.reload().await?;
        Ok(())
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn user_name(&self) -> String {
        self.user_name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_user_name(&self, user_name: &str) {
        *self.user_name.write().unwrap_or_else(|e| e.into_inner()) = user_name.trim().to_string();
    }

    // ---- Reads ----

    pub fn entries(&self) -> Vec<CowEntry> {
        self.read_state(|state| state.entries.clone())
    }

    pub fn len(&self) -> usize {
        self.read_state(|state| state.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, cattle_id: &str) -> Option<CowEntry> {
        self.read_state(|state| state.entries.iter().find(|e| e.cattle_id == cattle_id).cloned())
    }

    pub fn search(&self, query: &str) -> Vec<CowEntry> {
        self.read_state(|state| search_entries(query, &state.entries))
    }

    pub fn current_object_id(&self) -> String {
        self.backend.current_object_id()
    }

    fn read_state<T>(&self, f: impl FnOnce(&HerdState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the in-memory collection and announce it
    fn commit(&self, entries: Vec<CowEntry>) {
        let object_id = self.backend.current_object_id();
        self.state.write().unwrap_or_else(|e| e.into_inner()).entries = entries.clone();
        self.events.publish(&StoreEvent::EntriesUpdated { object_id, entries });
    }

    /// Reload the active object's collection from the backend
    pub async fn reload(&self) -> Result<Vec<CowEntry>> {
        let entries = self.backend.load().await?;
        info!("Loaded {} entries for object {}", entries.len(), self.current_object_id());
        self.commit(entries.clone());
        Ok(entries)
    }

    // ---- Entry mutations ----

    /// Add a new animal
    pub async fn add_entry(&self, mut entry: CowEntry) -> Result<CowEntry> {
        let _guard = self.write_lock.lock().await;

        sanitize_entry(&mut entry);
        entry.cattle_id = validate_cattle_id(&entry.cattle_id)?;
        if self.find(&entry.cattle_id).is_some() {
            return Err(EntryValidationError::DuplicateCattleId(entry.cattle_id).into());
        }

        let user = self.user_name();
        entry.user_id = user.clone();
        entry.last_modified_by = user.clone();
        if entry.date_added.trim().is_empty() {
            entry.date_added = shared::display_timestamp_now();
        }
        entry.attempt_number = entry.attempt_number.max(1);
        entry.synced = false;
        migrate_insemination_history(&mut entry);
        entry
            .action_history
            .push(ActionRecord::now(&user, actions::CREATED, format!("ID {}", entry.cattle_id)));

        let entries = self.backend.create_entry(&entry).await?;
        let stored = entries
            .iter()
            .find(|e| e.cattle_id == entry.cattle_id)
            .cloned()
            .unwrap_or(entry);
        self.commit(entries);

        info!("Added entry {}", stored.cattle_id);
        Ok(stored)
    }

    /// Replace the animal currently stored as `original_id`
    pub async fn update_entry(&self, original_id: &str, entry: CowEntry) -> Result<CowEntry> {
        let _guard = self.write_lock.lock().await;
        let existing = self
            .find(original_id)
            .ok_or_else(|| EntryValidationError::NotFound(original_id.to_string()))?;

        let details = describe_changes(&existing, &entry);
        self.persist_update(original_id, existing, entry, actions::EDITED, details)
            .await
    }

    async fn persist_update(
        &self,
        original_id: &str,
        existing: CowEntry,
        mut entry: CowEntry,
        action: &str,
        details: String,
    ) -> Result<CowEntry> {
        sanitize_entry(&mut entry);
        entry.cattle_id = validate_cattle_id(&entry.cattle_id)?;
        if entry.cattle_id != original_id && self.find(&entry.cattle_id).is_some() {
            return Err(EntryValidationError::DuplicateCattleId(entry.cattle_id).into());
        }

        let user = self.user_name();
        if entry.date_added.trim().is_empty() {
            entry.date_added = existing.date_added;
        }
        if entry.user_id.trim().is_empty() {
            entry.user_id = existing.user_id;
        }
        entry.last_modified_by = user.clone();
        entry.attempt_number = entry.attempt_number.max(1);
        entry.synced = false;
        sync_insemination_history(&mut entry);
        entry.action_history.push(ActionRecord::now(&user, action, details));

        let entries = self.backend.update_entry(original_id, &entry).await?;
        let stored = entries
            .iter()
            .find(|e| e.cattle_id == entry.cattle_id)
            .cloned()
            .unwrap_or(entry);
        self.commit(entries);

        info!("Updated entry {} ({})", stored.cattle_id, action);
        Ok(stored)
    }

    pub async fn delete_entry(&self, cattle_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.find(cattle_id).is_none() {
            return Err(EntryValidationError::NotFound(cattle_id.to_string()).into());
        }

        let entries = self.backend.delete_entry(cattle_id).await?;
        self.commit(entries);
        info!("Deleted entry {}", cattle_id);
        Ok(())
    }

    /// Replace the whole collection (import, restore).
    ///
    /// Locally this is a single write. Remotely each entry is created or
    /// updated in turn; entries missing from `entries` are left on the server.
    pub async fn save_all(&self, entries: Vec<CowEntry>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut seen = std::collections::HashSet::new();
        let mut prepared = Vec::with_capacity(entries.len());
        for mut entry in entries {
            sanitize_entry(&mut entry);
            entry.cattle_id = validate_cattle_id(&entry.cattle_id)?;
            if !seen.insert(entry.cattle_id.clone()) {
                return Err(EntryValidationError::DuplicateCattleId(entry.cattle_id).into());
            }
            migrate_insemination_history(&mut entry);
            prepared.push(entry);
        }

        match self.backend.mode() {
            BackendMode::Local => {
                self.backend.save(&prepared).await?;
                let count = prepared.len();
                self.commit(prepared);
                info!("Replaced collection with {} entries", count);
            }
            BackendMode::Remote => {
                let mut latest = self.entries();
                for entry in &prepared {
                    latest = if latest.iter().any(|e| e.cattle_id == entry.cattle_id) {
                        self.backend.update_entry(&entry.cattle_id, entry).await?
                    } else {
                        self.backend.create_entry(entry).await?
                    };
                }
                self.commit(latest);
                info!("Uploaded {} entries to server", prepared.len());
            }
        }
        Ok(())
    }

    // ---- Breeding events ----

    /// Record a new insemination attempt
    pub async fn record_insemination(&self, cattle_id: &str, command: InseminationCommand) -> Result<CowEntry> {
        require_date(&command.date)?;
        let _guard = self.write_lock.lock().await;
        let existing = self.require(cattle_id)?;

        let mut entry = existing.clone();
        entry.attempt_number = next_attempt_number(&entry);
        entry.insemination_date = command.date.trim().to_string();
        entry.bull = command.bull.trim().to_string();
        entry.inseminator = command.inseminator.trim().to_string();
        entry.code = command.code.trim().to_string();
        entry.status = statuses::INSEMINATED.to_string();
        entry.insemination_history.push(entry.current_insemination());

        let details = format!(
            "{}, попытка {}, бык {}",
            entry.insemination_date, entry.attempt_number, entry.bull
        );
        self.persist_update(cattle_id, existing, entry, actions::INSEMINATION, details)
            .await
    }

    /// Record a calving; starts a new lactation and a new insemination cycle
    pub async fn record_calving(&self, cattle_id: &str, date: &str) -> Result<CowEntry> {
        require_date(date)?;
        let _guard = self.write_lock.lock().await;
        let existing = self.require(cattle_id)?;

        let mut entry = existing.clone();
        entry.calving_date = date.trim().to_string();
        entry.lactation = Some(entry.lactation.unwrap_or(0) + 1);
        entry.status = statuses::CALVED.to_string();
        entry.insemination_date.clear();
        entry.bull.clear();
        entry.inseminator.clear();
        entry.code.clear();
        entry.attempt_number = 1;
        entry.dry_start_date.clear();
        entry.protocol = ProtocolAssignment::default();

        let details = format!("{}, лактация {}", entry.calving_date, entry.lactation.unwrap_or(0));
        self.persist_update(cattle_id, existing, entry, actions::CALVING, details)
            .await
    }

    pub async fn record_dry_off(&self, cattle_id: &str, date: &str) -> Result<CowEntry> {
        require_date(date)?;
        let _guard = self.write_lock.lock().await;
        let existing = self.require(cattle_id)?;

        let mut entry = existing.clone();
        entry.dry_start_date = date.trim().to_string();
        entry.status = statuses::DRY.to_string();

        let details = entry.dry_start_date.clone();
        self.persist_update(cattle_id, existing, entry, actions::DRY_OFF, details)
            .await
    }

    pub async fn assign_protocol(&self, cattle_id: &str, protocol_name: &str, start_date: &str) -> Result<CowEntry> {
        require_date(start_date)?;
        let _guard = self.write_lock.lock().await;
        let existing = self.require(cattle_id)?;

        let mut entry = existing.clone();
        entry.protocol = ProtocolAssignment {
            name: protocol_name.trim().to_string(),
            start_date: start_date.trim().to_string(),
        };

        let details = format!("{} с {}", entry.protocol.name, entry.protocol.start_date);
        self.persist_update(cattle_id, existing, entry, actions::PROTOCOL, details)
            .await
    }

    /// Record that the animal left the herd
    pub async fn record_exit(&self, cattle_id: &str, date: &str, reason: &str) -> Result<CowEntry> {
        require_date(date)?;
        let _guard = self.write_lock.lock().await;
        let existing = self.require(cattle_id)?;

        let mut entry = existing.clone();
        entry.exit_date = date.trim().to_string();
        entry.status = statuses::EXITED.to_string();

        let details = if reason.trim().is_empty() {
            entry.exit_date.clone()
        } else {
            format!("{}: {}", entry.exit_date, reason.trim())
        };
        self.persist_update(cattle_id, existing, entry, actions::EXIT, details)
            .await
    }

    fn require(&self, cattle_id: &str) -> Result<CowEntry, EntryValidationError> {
        self.find(cattle_id)
            .ok_or_else(|| EntryValidationError::NotFound(cattle_id.to_string()))
    }

    // ---- Objects ----

    pub async fn objects(&self) -> Result<Vec<DatabaseObject>> {
        self.backend.list_objects().await
    }

    /// Create an object and switch to it
    pub async fn add_object(&self, name: &str) -> Result<DatabaseObject> {
        let _guard = self.write_lock.lock().await;
        let object = self.backend.create_object(name).await?;
        self.publish_objects().await;
        self.load_switched(&object.id).await?;
        Ok(object)
    }

    /// Rename an object; false if the id is unknown or the name blank
    pub async fn rename_object(&self, object_id: &str, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let renamed = self.backend.rename_object(object_id, name).await?;
        if renamed {
            self.publish_objects().await;
        } else {
            warn!("Object {} was not renamed", object_id);
        }
        Ok(renamed)
    }

    /// Delete an object and its entries. If it was active, the first
    /// remaining object becomes active.
    pub async fn delete_object(&self, object_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let previous = self.current_object_id();
        self.backend.delete_object(object_id).await?;
        self.publish_objects().await;

        let current = self.current_object_id();
        if current != previous {
            self.load_switched(&current).await?;
        }
        Ok(())
    }

    /// Make `object_id` active and load its collection
    pub async fn switch_to_object(&self, object_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.set_current_object_id(object_id).await?;
        self.load_switched(object_id).await
    }

    async fn load_switched(&self, object_id: &str) -> Result<()> {
        self.reload().await?;
        info!("Switched to object {}", object_id);
        self.events.publish(&StoreEvent::ObjectSwitched {
            object_id: object_id.to_string(),
        });
        Ok(())
    }

    async fn publish_objects(&self) {
        match self.backend.list_objects().await {
            Ok(objects) => self.events.publish(&StoreEvent::ObjectsChanged { objects }),
            Err(e) => warn!("Failed to list objects after change: {}", e),
        }
    }
}

/// Keep the last history record in step with the top-level insemination
/// fields. Returns true if the history changed.
pub fn sync_insemination_history(entry: &mut CowEntry) -> bool {
    if entry.insemination_date.trim().is_empty() {
        return false;
    }

    let calving = parse_date(&entry.calving_date);
    let current = entry.current_insemination();
    match entry.insemination_history.last_mut() {
        Some(last) if last.attempt_number == entry.attempt_number && in_cycle(&*last, calving) => {
            if *last == current {
                return false;
            }
            *last = current;
        }
        _ => entry.insemination_history.push(current),
    }
    true
}

/// Whether a history record belongs to the lactation started by `calving`
fn in_cycle(record: &InseminationRecord, calving: Option<NaiveDate>) -> bool {
    match (calving, parse_date(&record.date)) {
        (Some(calving), Some(date)) => date > calving,
        _ => true,
    }
}

/// Attempts are numbered per lactation: records dated on or before the
/// latest calving do not count
fn next_attempt_number(entry: &CowEntry) -> u32 {
    let calving = parse_date(&entry.calving_date);
    let cycle: Vec<u32> = entry
        .insemination_history
        .iter()
        .filter(|r| in_cycle(r, calving))
        .map(|r| r.attempt_number)
        .collect();
    let recorded = cycle.iter().copied().max().unwrap_or(0);
    recorded.max(cycle.len() as u32) + 1
}

fn require_date(value: &str) -> Result<(), EntryValidationError> {
    parse_date(value)
        .map(|_| ())
        .ok_or_else(|| EntryValidationError::InvalidDate(value.to_string()))
}

/// Names of the fields an edit changed, for the audit trail
fn describe_changes(before: &CowEntry, after: &CowEntry) -> String {
    let fields: [(&str, &str, &str); 15] = [
        ("cattleId", before.cattle_id.as_str(), after.cattle_id.as_str()),
        ("nickname", before.nickname.as_str(), after.nickname.as_str()),
        ("group", before.group.as_str(), after.group.as_str()),
        ("birthDate", before.birth_date.as_str(), after.birth_date.as_str()),
        ("calvingDate", before.calving_date.as_str(), after.calving_date.as_str()),
        ("inseminationDate", before.insemination_date.as_str(), after.insemination_date.as_str()),
        ("exitDate", before.exit_date.as_str(), after.exit_date.as_str()),
        ("dryStartDate", before.dry_start_date.as_str(), after.dry_start_date.as_str()),
        ("bull", before.bull.as_str(), after.bull.as_str()),
        ("inseminator", before.inseminator.as_str(), after.inseminator.as_str()),
        ("code", before.code.as_str(), after.code.as_str()),
        ("status", before.status.as_str(), after.status.as_str()),
        ("note", before.note.as_str(), after.note.as_str()),
        ("protocol", before.protocol.name.as_str(), after.protocol.name.as_str()),
        ("protocolStart", before.protocol.start_date.as_str(), after.protocol.start_date.as_str()),
    ];

    let mut changed: Vec<&str> = fields
        .iter()
        .filter(|(_, old, new)| old != new)
        .map(|(name, _, _)| *name)
        .collect();
    if before.lactation != after.lactation {
        changed.push("lactation");
    }
    if before.attempt_number != after.attempt_number {
        changed.push("attemptNumber");
    }
    if before.vwp != after.vwp {
        changed.push("vwp");
    }

    if changed.is_empty() {
        "без изменений".to_string()
    } else {
        changed.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::kv::MemoryKeyValueStore;
    use crate::backend::storage::local::LocalBackend;
    use std::sync::Mutex as StdMutex;

    async fn setup_store() -> (HerdStore, Arc<StdMutex<Vec<&'static str>>>) {
        let backend = Arc::new(LocalBackend::new(Arc::new(MemoryKeyValueStore::new())));
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(move |event| sink.lock().unwrap().push(event.name()));

        let store = HerdStore::new(backend, events, "Иванов");
        store.initialize().await.unwrap();
        seen.lock().unwrap().clear();
        (store, seen)
    }

    #[tokio::test]
    async fn test_add_entry_stamps_and_publishes() {
        let (store, seen) = setup_store().await;

        let mut entry = CowEntry::new(" 101 ");
        entry.insemination_date = "2024-02-15".to_string();
        entry.bull = "Атлант".to_string();
        let stored = store.add_entry(entry).await.unwrap();

        assert_eq!(stored.cattle_id, "101");
        assert_eq!(stored.user_id, "Иванов");
        assert_eq!(stored.last_modified_by, "Иванов");
        assert_eq!(stored.insemination_history.len(), 1);
        assert_eq!(stored.action_history.len(), 1);
        assert_eq!(stored.action_history[0].action, actions::CREATED);
        assert_eq!(store.len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["entries:updated"]);
    }

    #[tokio::test]
    async fn test_add_entry_validation() {
        let (store, seen) = setup_store().await;
        store.add_entry(CowEntry::new("101")).await.unwrap();

        let err = store.add_entry(CowEntry::new("101")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EntryValidationError>(),
            Some(&EntryValidationError::DuplicateCattleId("101".to_string()))
        );
        let err = store.add_entry(CowEntry::new("  ")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EntryValidationError>(),
            Some(&EntryValidationError::EmptyCattleId)
        );

        assert_eq!(store.len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_compared_after_sanitizing() {
        let (store, _seen) = setup_store().await;
        store.add_entry(CowEntry::new("101")).await.unwrap();
        store.add_entry(CowEntry::new("102")).await.unwrap();

        let err = store.add_entry(CowEntry::new("1\u{0}01")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<EntryValidationError>(),
            Some(&EntryValidationError::DuplicateCattleId("101".to_string()))
        );

        let err = store.update_entry("102", CowEntry::new("10\u{7}1")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntryValidationError>(),
            Some(EntryValidationError::DuplicateCattleId(_))
        ));

        let err = store
            .save_all(vec![CowEntry::new("7"), CowEntry::new("\u{1}7")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntryValidationError>(),
            Some(EntryValidationError::DuplicateCattleId(_))
        ));

        let stored = store.add_entry(CowEntry::new("1\u{0}03")).await.unwrap();
        assert_eq!(stored.cattle_id, "103");
        let ids: Vec<String> = store.entries().into_iter().map(|e| e.cattle_id).collect();
        assert_eq!(ids, vec!["101", "102", "103"]);
    }

    #[tokio::test]
    async fn test_update_entry_syncs_history_and_audits() {
        let (store, _seen) = setup_store().await;
        let mut entry = CowEntry::new("101");
        entry.insemination_date = "2024-02-15".to_string();
        entry.bull = "Атлант".to_string();
        store.add_entry(entry).await.unwrap();

        // Correcting the current attempt replaces the last record
        let mut edited = store.find("101").unwrap();
        edited.bull = "Буран".to_string();
        let stored = store.update_entry("101", edited).await.unwrap();
        assert_eq!(stored.insemination_history.len(), 1);
        assert_eq!(stored.insemination_history[0].bull, "Буран");
        assert_eq!(stored.action_history.last().unwrap().details, "bull");

        // A new attempt number appends
        let mut edited = stored.clone();
        edited.attempt_number = 2;
        edited.insemination_date = "2024-03-10".to_string();
        let stored = store.update_entry("101", edited).await.unwrap();
        assert_eq!(stored.insemination_history.len(), 2);
        let last = stored.latest_insemination().unwrap();
        assert_eq!(last.date, "2024-03-10");
        assert_eq!(last.attempt_number, 2);
        assert_eq!(stored.action_history.len(), 3);
    }

    #[tokio::test]
    async fn test_edit_after_calving_keeps_previous_lactation() {
        let (store, _seen) = setup_store().await;
        let mut entry = CowEntry::new("101");
        entry.insemination_date = "2024-02-15".to_string();
        entry.bull = "Атлант".to_string();
        store.add_entry(entry).await.unwrap();
        store.record_calving("101", "2024-12-01").await.unwrap();

        let mut edited = store.find("101").unwrap();
        edited.insemination_date = "2025-02-10".to_string();
        edited.bull = "Буран".to_string();
        let stored = store.update_entry("101", edited).await.unwrap();

        let history: Vec<(&str, &str)> = stored
            .insemination_history
            .iter()
            .map(|r| (r.date.as_str(), r.bull.as_str()))
            .collect();
        assert_eq!(history, vec![("2024-02-15", "Атлант"), ("2025-02-10", "Буран")]);

        // Correcting the new attempt still replaces it
        let mut corrected = stored.clone();
        corrected.bull = "Вихрь".to_string();
        let stored = store.update_entry("101", corrected).await.unwrap();
        assert_eq!(stored.insemination_history.len(), 2);
        assert_eq!(stored.insemination_history[1].bull, "Вихрь");
        assert_eq!(stored.insemination_history[0].bull, "Атлант");
    }

    #[tokio::test]
    async fn test_update_entry_rename_and_collisions() {
        let (store, _seen) = setup_store().await;
        store.add_entry(CowEntry::new("101")).await.unwrap();
        store.add_entry(CowEntry::new("102")).await.unwrap();

        let renamed = store.update_entry("101", CowEntry::new("103")).await.unwrap();
        assert_eq!(renamed.cattle_id, "103");
        assert!(store.find("101").is_none());

        let err = store.update_entry("103", CowEntry::new("102")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntryValidationError>(),
            Some(EntryValidationError::DuplicateCattleId(_))
        ));
        let err = store.update_entry("999", CowEntry::new("999")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntryValidationError>(),
            Some(EntryValidationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_collection_untouched() {
        let kv = Arc::new(MemoryKeyValueStore::with_quota(600));
        let backend = Arc::new(LocalBackend::new(kv));
        let store = HerdStore::new(backend, Arc::new(EventBus::new()), "Иванов");
        store.initialize().await.unwrap();

        let mut big = CowEntry::new("101");
        big.note = "x".repeat(2_000);
        let err = store.add_entry(big).await.unwrap_err();
        let storage_err = err
            .downcast_ref::<crate::backend::storage::error::StorageError>()
            .expect("storage error");
        assert!(storage_err.is_quota_exceeded());
        assert!(store.is_empty());
        assert!(store.reload().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_breeding_events() {
        let (store, _seen) = setup_store().await;
        store.add_entry(CowEntry::new("101")).await.unwrap();

        let first = InseminationCommand {
            date: "2024-02-15".to_string(),
            bull: "Атлант".to_string(),
            ..Default::default()
        };
        let entry = store.record_insemination("101", first).await.unwrap();
        assert_eq!(entry.attempt_number, 1);
        assert_eq!(entry.status, statuses::INSEMINATED);
        assert_eq!(entry.insemination_history.len(), 1);

        let second = InseminationCommand {
            date: "2024-03-08".to_string(),
            bull: "Буран".to_string(),
            ..Default::default()
        };
        let entry = store.record_insemination("101", second).await.unwrap();
        assert_eq!(entry.attempt_number, 2);
        assert_eq!(entry.insemination_history.len(), 2);
        assert_eq!(entry.insemination_history[1].bull, "Буран");

        let entry = store.record_calving("101", "2024-12-01").await.unwrap();
        assert_eq!(entry.lactation, Some(1));
        assert_eq!(entry.status, statuses::CALVED);
        assert!(entry.insemination_date.is_empty());
        assert_eq!(entry.insemination_history.len(), 2);

        let next_cycle = InseminationCommand {
            date: "2025-02-10".to_string(),
            bull: "Атлант".to_string(),
            ..Default::default()
        };
        let entry = store.record_insemination("101", next_cycle).await.unwrap();
        assert_eq!(entry.attempt_number, 1);
        assert_eq!(entry.insemination_history.len(), 3);

        let entry = store.assign_protocol("101", "Овсинх", "2025-01-20").await.unwrap();
        assert_eq!(entry.protocol.name, "Овсинх");

        let entry = store.record_dry_off("101", "2025-08-01").await.unwrap();
        assert_eq!(entry.status, statuses::DRY);

        let entry = store.record_exit("101", "2025-09-01", "продана").await.unwrap();
        assert!(entry.has_exited());
        assert_eq!(entry.action_history.last().unwrap().details, "2025-09-01: продана");

        let err = store.record_dry_off("101", "не дата").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntryValidationError>(),
            Some(EntryValidationError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn test_object_lifecycle_events() {
        let (store, seen) = setup_store().await;
        store.add_entry(CowEntry::new("1")).await.unwrap();
        seen.lock().unwrap().clear();

        let farm = store.add_object("Farm B").await.unwrap();
        assert_eq!(store.current_object_id(), farm.id);
        assert!(store.is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["objects:changed", "entries:updated", "object:switched"]
        );

        store.switch_to_object("default").await.unwrap();
        assert_eq!(store.entries()[0].cattle_id, "1");

        store.switch_to_object(&farm.id).await.unwrap();
        store.delete_object(&farm.id).await.unwrap();
        assert_eq!(store.current_object_id(), "default");
        assert_eq!(store.len(), 1);
        assert_eq!(store.objects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_all_replaces_collection() {
        let (store, _seen) = setup_store().await;
        store.add_entry(CowEntry::new("1")).await.unwrap();

        store
            .save_all(vec![CowEntry::new("2"), CowEntry::new("3")])
            .await
            .unwrap();
        let ids: Vec<String> = store.entries().into_iter().map(|e| e.cattle_id).collect();
        assert_eq!(ids, vec!["2", "3"]);

        assert!(store.save_all(vec![CowEntry::new("4"), CowEntry::new("4")]).await.is_err());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sync_insemination_history() {
        let mut entry = CowEntry::new("1");
        assert!(!sync_insemination_history(&mut entry));

        entry.insemination_date = "2024-02-15".to_string();
        assert!(sync_insemination_history(&mut entry));
        assert!(!sync_insemination_history(&mut entry));
        assert_eq!(entry.insemination_history.len(), 1);

        entry.attempt_number = 2;
        assert!(sync_insemination_history(&mut entry));
        assert_eq!(entry.insemination_history.len(), 2);
    }
}
