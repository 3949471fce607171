//! Load-time integrity pass over a stored collection.
//!
//! A raw payload goes through sanitization, garbage-record removal,
//! `null` field repair, schema backfill and the one-time insemination history migration. The
//! outcome reports what happened so the caller can decide whether the
//! cleaned collection must be written back.

use log::warn;
use serde_json::Value;
use shared::CowEntry;
use thiserror::Error;

use super::sanitize::{is_valid_cattle_id, sanitize_value};

/// Fields added after the first schema; records lacking them are backfilled
const BACKFILLED_FIELDS: [&str; 4] = ["group", "inseminationHistory", "actionHistory", "uziHistory"];

/// The payload as a whole could not be understood
#[derive(Debug, Error)]
pub enum CorruptCollection {
    #[error("Stored collection is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Stored collection is not a JSON array")]
    NotAnArray,
}

/// Result of cleaning a stored collection
#[derive(Debug, Default)]
pub struct CleanedCollection {
    pub entries: Vec<CowEntry>,
    /// Records dropped as garbage
    pub discarded: usize,
    /// Records backfilled or given a synthesized insemination history
    pub migrated: usize,
    /// Records whose strings had to be sanitized
    pub repaired: usize,
}

impl CleanedCollection {
    /// Whether the stored payload differs from the cleaned collection
    pub fn needs_rewrite(&self) -> bool {
        self.discarded > 0 || self.migrated > 0 || self.repaired > 0
    }
}

/// Parse and clean a stored collection payload
pub fn clean_collection(raw: &str) -> Result<CleanedCollection, CorruptCollection> {
    let parsed: Value = serde_json::from_str(raw)?;
    let Value::Array(items) = parsed else {
        return Err(CorruptCollection::NotAnArray);
    };
    Ok(clean_records(items))
}

/// Clean already-parsed records
pub fn clean_records(items: Vec<Value>) -> CleanedCollection {
    let mut outcome = CleanedCollection::default();

    for mut item in items {
        if !item.is_object() {
            outcome.discarded += 1;
            continue;
        }

        let repaired = sanitize_value(&mut item);

        let id_ok = match item.get("cattleId") {
            Some(Value::String(id)) => is_valid_cattle_id(id),
            _ => false,
        };
        if !id_ok {
            outcome.discarded += 1;
            continue;
        }

        let nulled = strip_nulls(&mut item);
        let backfilled = BACKFILLED_FIELDS.iter().any(|field| item.get(*field).is_none());

        let mut entry: CowEntry = match serde_json::from_value(item) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping record that does not match the entry schema: {}", e);
                outcome.discarded += 1;
                continue;
            }
        };

        let migrated = migrate_insemination_history(&mut entry);

        if repaired || nulled {
            outcome.repaired += 1;
        }
        if backfilled || migrated {
            outcome.migrated += 1;
        }
        outcome.entries.push(entry);
    }

    outcome
}

/// Remove `null` members and array elements so the field defaults apply.
/// Returns true if anything was removed.
fn strip_nulls(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|_, v| !v.is_null());
            let removed = map.len() != before;
            map.values_mut().fold(removed, |changed, v| strip_nulls(v) | changed)
        }
        Value::Array(items) => {
            let before = items.len();
            items.retain(|v| !v.is_null());
            let removed = items.len() != before;
            items.iter_mut().fold(removed, |changed, v| strip_nulls(v) | changed)
        }
        _ => false,
    }
}

/// Give a record with an insemination date but no history its first history
/// entry. Returns true if the record changed.
pub fn migrate_insemination_history(entry: &mut CowEntry) -> bool {
    if entry.insemination_history.is_empty() && !entry.insemination_date.trim().is_empty() {
        entry.insemination_history.push(entry.current_insemination());
        true
    } else {
        false
    }
}
