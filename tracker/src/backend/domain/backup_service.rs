//! # Backup Service
//!
//! Two kinds of backups:
//!
//! - **Snapshots** kept in storage under `cattleTracker_backup_<millis>`.
//!   Only the [`MAX_SNAPSHOTS`] most recent are kept.
//! - **Backup files** (`{entries, exportedAt, count}`) written to and read
//!   from a path the user picks. Import also accepts files carrying
//!   `createdAt` instead of `exportedAt`, or a bare array of entries.
//!
//! Imported entries go through the same integrity pass as a stored
//! collection, then replace or merge into the active object through the herd
//! store. A snapshot of the current collection is taken before every import
//! and restore.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{BackupFile, BackupSnapshot, CowEntry};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::backend::domain::herd::HerdStore;
use crate::backend::storage::error::StorageError;
use crate::backend::storage::integrity::clean_records;
use crate::backend::storage::keys::{backup_key, parse_backup_key};
use crate::backend::storage::traits::KeyValueStore;

/// Number of snapshots kept in storage
pub const MAX_SNAPSHOTS: usize = 10;

/// How imported entries are combined with the active collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Imported entries become the whole collection
    Replace,
    /// Imported entries overwrite same-id entries, new ids are appended
    Merge,
}

/// Listing entry for a stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub key: String,
    pub timestamp: i64,
    pub created_at: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub imported: usize,
    pub discarded: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct BackupService {
    kv: Arc<dyn KeyValueStore>,
}

impl BackupService {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    // ---- Snapshots ----

    /// Store a snapshot of `entries` and prune old ones. Returns the key.
    pub fn create_snapshot(&self, entries: &[CowEntry]) -> Result<String> {
        let existing = self.snapshot_timestamps()?;
        let mut timestamp = Utc::now().timestamp_millis();
        while existing.contains(&timestamp) {
            timestamp += 1;
        }

        let snapshot = BackupSnapshot {
            entries: entries.to_vec(),
            created_at: Utc::now().to_rfc3339(),
            count: entries.len(),
        };
        let key = backup_key(timestamp);
        let payload = serde_json::to_string(&snapshot).map_err(|source| StorageError::Serialization {
            key: key.clone(),
            source,
        })?;
        self.kv.set(&key, &payload)?;
        info!("Created backup snapshot {} with {} entries", key, snapshot.count);

        self.prune_snapshots()?;
        Ok(key)
    }

    /// Stored snapshots, newest first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut infos = Vec::new();
        for timestamp in self.snapshot_timestamps()? {
            let key = backup_key(timestamp);
            match self.load_snapshot(&key) {
                Ok(snapshot) => infos.push(SnapshotInfo {
                    key,
                    timestamp,
                    created_at: snapshot.created_at,
                    count: snapshot.count,
                }),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", key, e),
            }
        }
        infos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(infos)
    }

    pub fn load_snapshot(&self, key: &str) -> Result<BackupSnapshot> {
        let raw = self
            .kv
            .get(key)?
            .ok_or_else(|| anyhow!("Backup snapshot not found: {}", key))?;
        let snapshot: BackupSnapshot =
            serde_json::from_str(&raw).with_context(|| format!("Backup snapshot {} is unreadable", key))?;
        Ok(snapshot)
    }

    /// Replace the active collection with a stored snapshot
    pub async fn restore_snapshot(&self, herd: &HerdStore, key: &str) -> Result<usize> {
        let snapshot = self.load_snapshot(key)?;
        self.create_snapshot(&herd.entries())?;

        let count = snapshot.entries.len();
        herd.save_all(snapshot.entries).await?;
        info!("Restored {} entries from {}", count, key);
        Ok(count)
    }

    fn snapshot_timestamps(&self) -> Result<Vec<i64>, StorageError> {
        Ok(self
            .kv
            .keys()?
            .iter()
            .filter_map(|key| parse_backup_key(key))
            .collect())
    }

    fn prune_snapshots(&self) -> Result<(), StorageError> {
        let mut timestamps = self.snapshot_timestamps()?;
        if timestamps.len() <= MAX_SNAPSHOTS {
            return Ok(());
        }
        timestamps.sort_unstable_by(|a, b| b.cmp(a));
        for timestamp in &timestamps[MAX_SNAPSHOTS..] {
            self.kv.remove(&backup_key(*timestamp))?;
            info!("Pruned backup snapshot {}", timestamp);
        }
        Ok(())
    }

    // ---- Backup files ----

    /// Write `entries` to a backup file at `path`
    pub fn export_to_file(&self, entries: &[CowEntry], path: &Path) -> Result<BackupFile> {
        let file = BackupFile {
            entries: entries.to_vec(),
            exported_at: Utc::now().to_rfc3339(),
            count: entries.len(),
        };
        let payload = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, payload).with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, path).with_context(|| format!("Failed to move backup into {}", path.display()))?;

        info!("Exported {} entries to {}", file.count, path.display());
        Ok(file)
    }

    /// Read and clean the entries of a backup file
    pub fn read_backup_file(&self, path: &Path) -> Result<(Vec<CowEntry>, usize)> {
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        parse_backup(&raw)
    }

    /// Import a backup file into the active collection
    pub async fn import_from_file(&self, herd: &HerdStore, path: &Path, mode: ImportMode) -> Result<ImportSummary> {
        let (imported, discarded) = self.read_backup_file(path)?;
        if discarded > 0 {
            warn!("Skipped {} unreadable records in {}", discarded, path.display());
        }

        let current = herd.entries();
        self.create_snapshot(&current)?;

        let imported_count = imported.len();
        let combined = match mode {
            ImportMode::Replace => imported,
            ImportMode::Merge => merge_entries(current, imported),
        };
        let total = combined.len();
        herd.save_all(combined).await?;

        info!("Imported {} entries ({:?}), collection now has {}", imported_count, mode, total);
        Ok(ImportSummary {
            imported: imported_count,
            discarded,
            total,
        })
    }
}

/// Parse a backup payload into clean entries plus the number of records
/// dropped
pub fn parse_backup(raw: &str) -> Result<(Vec<CowEntry>, usize)> {
    let parsed: Value = serde_json::from_str(raw).context("Backup file is not valid JSON")?;
    let records = match parsed {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("entries") {
            Some(Value::Array(records)) => records,
            _ => return Err(anyhow!("Backup file has no entries array")),
        },
        _ => return Err(anyhow!("Backup file has an unexpected shape")),
    };

    let cleaned = clean_records(records);
    Ok((cleaned.entries, cleaned.discarded))
}

/// Overlay `incoming` onto `current` by cattle id, keeping the order of
/// `current` and appending new ids
pub fn merge_entries(mut current: Vec<CowEntry>, incoming: Vec<CowEntry>) -> Vec<CowEntry> {
    for entry in incoming {
        match current.iter_mut().find(|e| e.cattle_id == entry.cattle_id) {
            Some(slot) => *slot = entry,
            None => current.push(entry),
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::domain::events::EventBus;
    use crate::backend::storage::kv::MemoryKeyValueStore;
    use crate::backend::storage::local::LocalBackend;
    use tempfile::TempDir;

    async fn setup() -> (BackupService, HerdStore, TempDir) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let herd = HerdStore::new(
            Arc::new(LocalBackend::new(kv.clone())),
            Arc::new(EventBus::new()),
            "Иванов",
        );
        herd.initialize().await.unwrap();
        (BackupService::new(kv), herd, TempDir::new().unwrap())
    }

    fn cow(id: &str, nickname: &str) -> CowEntry {
        let mut entry = CowEntry::new(id);
        entry.nickname = nickname.to_string();
        entry
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let (service, herd, temp_dir) = setup().await;
        let mut first = cow("101", "Зорька");
        first.insemination_date = "2024-02-15".to_string();
        herd.add_entry(first).await.unwrap();
        herd.add_entry(cow("102", "Буренка")).await.unwrap();
        let original = herd.entries();

        let path = temp_dir.path().join("backup.json");
        let file = service.export_to_file(&original, &path).unwrap();
        assert_eq!(file.count, 2);

        herd.save_all(Vec::new()).await.unwrap();
        assert!(herd.is_empty());

        let summary = service.import_from_file(&herd, &path, ImportMode::Replace).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.discarded, 0);
        assert_eq!(herd.entries(), original);
    }

    #[tokio::test]
    async fn test_merge_import() {
        let (service, herd, temp_dir) = setup().await;
        herd.add_entry(cow("1", "old")).await.unwrap();
        herd.add_entry(cow("2", "keep")).await.unwrap();

        let path = temp_dir.path().join("incoming.json");
        fs::write(
            &path,
            r#"{"entries":[{"cattleId":"1","nickname":"new"},{"cattleId":"3"},{"cattleId":""}],"createdAt":"x"}"#,
        )
        .unwrap();

        let summary = service.import_from_file(&herd, &path, ImportMode::Merge).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.total, 3);

        let entries = herd.entries();
        let ids: Vec<&str> = entries.iter().map(|e| e.cattle_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(entries[0].nickname, "new");
        assert_eq!(entries[1].nickname, "keep");
    }

    #[test]
    fn test_parse_backup_shapes() {
        let (entries, _) = parse_backup(r#"[{"cattleId":"7"}]"#).unwrap();
        assert_eq!(entries[0].cattle_id, "7");
        assert!(parse_backup(r#"{"exportedAt":"x"}"#).is_err());
        assert!(parse_backup("42").is_err());
        assert!(parse_backup("not json").is_err());
    }

    #[tokio::test]
    async fn test_snapshots_are_capped() {
        let (service, _herd, _temp_dir) = setup().await;
        for i in 0..12 {
            service.create_snapshot(&[cow(&i.to_string(), "")]).unwrap();
        }

        let snapshots = service.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), MAX_SNAPSHOTS);
        assert!(snapshots.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

        // The newest snapshot holds the last collection
        let newest = service.load_snapshot(&snapshots[0].key).unwrap();
        assert_eq!(newest.entries[0].cattle_id, "11");
    }

    #[tokio::test]
    async fn test_restore_snapshot() {
        let (service, herd, _temp_dir) = setup().await;
        herd.add_entry(cow("1", "")).await.unwrap();
        let key = service.create_snapshot(&herd.entries()).unwrap();

        herd.add_entry(cow("2", "")).await.unwrap();
        assert_eq!(service.restore_snapshot(&herd, &key).await.unwrap(), 1);
        assert_eq!(herd.len(), 1);

        // Restoring took a snapshot of the two-entry state first
        assert_eq!(service.list_snapshots().unwrap()[0].count, 2);
        assert!(service.load_snapshot("cattleTracker_backup_1").is_err());
    }
}
