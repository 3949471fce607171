//! Storage key layout.
//!
//! Every value lives under a flat string key, mirroring the browser
//! `localStorage` layout the data was originally written with:
//!
//! ```text
//! cattleEntries_<objectId>          JSON array of CowEntry
//! cattleEntries                     legacy single collection (pre-objects)
//! cattleTracker_objects             JSON array of {id, name}
//! cattleTracker_currentObject       active object id (plain string)
//! cattleTracker_apiBase             remote server base URL
//! cattleTracker_apiToken            bearer token of the remote session
//! cattleTracker_backup_<millis>     {entries, createdAt, count}
//! cattleTracker_protocols           JSON array of sync protocols
//! ```

pub const LEGACY_ENTRIES_KEY: &str = "cattleEntries";
pub const OBJECTS_KEY: &str = "cattleTracker_objects";
pub const CURRENT_OBJECT_KEY: &str = "cattleTracker_currentObject";
pub const API_BASE_KEY: &str = "cattleTracker_apiBase";
pub const API_TOKEN_KEY: &str = "cattleTracker_apiToken";
pub const BACKUP_KEY_PREFIX: &str = "cattleTracker_backup_";
pub const PROTOCOLS_KEY: &str = "cattleTracker_protocols";

/// Key of the entry collection belonging to an object
pub fn entries_key(object_id: &str) -> String {
    format!("{}_{}", LEGACY_ENTRIES_KEY, object_id)
}

/// Key of a backup snapshot taken at `epoch_millis`
pub fn backup_key(epoch_millis: i64) -> String {
    format!("{}{}", BACKUP_KEY_PREFIX, epoch_millis)
}

/// Extract the timestamp from a backup key
pub fn parse_backup_key(key: &str) -> Option<i64> {
    key.strip_prefix(BACKUP_KEY_PREFIX)?.parse().ok()
}
