use chrono::{Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Id of the object that always exists and receives legacy data
pub const DEFAULT_OBJECT_ID: &str = "default";

/// Display name of the default object
pub const DEFAULT_OBJECT_NAME: &str = "Основная база";

/// Default voluntary waiting period in days
pub const DEFAULT_VWP_DAYS: u32 = 60;

/// Maximum length of a cattle id in characters
pub const MAX_CATTLE_ID_LEN: usize = 100;

/// Display format used for `dateAdded` and audit timestamps
pub const DISPLAY_TIMESTAMP_FORMAT: &str = "%d.%m.%Y, %H:%M:%S";

/// One animal's full breeding record.
///
/// Field names on the wire and on disk are camelCase. Every field except
/// `cattleId` falls back to its default when absent so that records written
/// by older versions keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CowEntry {
    /// Unique identity key within an object
    pub cattle_id: String,
    pub nickname: String,
    /// Pen or group name
    pub group: String,
    pub birth_date: String,
    pub calving_date: String,
    pub insemination_date: String,
    pub exit_date: String,
    pub dry_start_date: String,
    /// Lactation number, `None` when unknown
    #[serde(deserialize_with = "de_optional_count")]
    pub lactation: Option<u32>,
    #[serde(deserialize_with = "de_attempt_number")]
    pub attempt_number: u32,
    pub bull: String,
    pub inseminator: String,
    pub code: String,
    pub status: String,
    pub note: String,
    pub protocol: ProtocolAssignment,
    /// Voluntary waiting period in days
    #[serde(deserialize_with = "de_vwp")]
    pub vwp: u32,
    /// Whether the current state is confirmed by the canonical store
    pub synced: bool,
    /// Creation timestamp in display format
    pub date_added: String,
    pub user_id: String,
    pub last_modified_by: String,
    pub insemination_history: Vec<InseminationRecord>,
    pub action_history: Vec<ActionRecord>,
    /// Examination records, opaque to the data layer
    pub uzi_history: Vec<Value>,
}

impl Default for CowEntry {
    fn default() -> Self {
        Self {
            cattle_id: String::new(),
            nickname: String::new(),
            group: String::new(),
            birth_date: String::new(),
            calving_date: String::new(),
            insemination_date: String::new(),
            exit_date: String::new(),
            dry_start_date: String::new(),
            lactation: None,
            attempt_number: 1,
            bull: String::new(),
            inseminator: String::new(),
            code: String::new(),
            status: String::new(),
            note: String::new(),
            protocol: ProtocolAssignment::default(),
            vwp: DEFAULT_VWP_DAYS,
            synced: false,
            date_added: String::new(),
            user_id: String::new(),
            last_modified_by: String::new(),
            insemination_history: Vec::new(),
            action_history: Vec::new(),
            uzi_history: Vec::new(),
        }
    }
}

impl CowEntry {
    /// Create a fresh entry stamped with the current local time
    pub fn new(cattle_id: impl Into<String>) -> Self {
        Self {
            cattle_id: cattle_id.into(),
            date_added: display_timestamp_now(),
            ..Self::default()
        }
    }

    /// Snapshot of the top-level insemination fields as a history record
    pub fn current_insemination(&self) -> InseminationRecord {
        InseminationRecord {
            date: self.insemination_date.clone(),
            attempt_number: self.attempt_number,
            bull: self.bull.clone(),
            inseminator: self.inseminator.clone(),
            code: self.code.clone(),
        }
    }

    /// The most recent insemination attempt, if any
    pub fn latest_insemination(&self) -> Option<&InseminationRecord> {
        self.insemination_history.last()
    }

    /// Whether the animal has an exit date recorded
    pub fn has_exited(&self) -> bool {
        !self.exit_date.trim().is_empty()
    }
}

/// Synchronization protocol assigned to an animal
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolAssignment {
    pub name: String,
    pub start_date: String,
}

/// One insemination attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InseminationRecord {
    pub date: String,
    #[serde(deserialize_with = "de_attempt_number")]
    pub attempt_number: u32,
    pub bull: String,
    pub inseminator: String,
    pub code: String,
}

impl Default for InseminationRecord {
    fn default() -> Self {
        Self {
            date: String::new(),
            attempt_number: 1,
            bull: String::new(),
            inseminator: String::new(),
            code: String::new(),
        }
    }
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionRecord {
    pub date_time: String,
    pub user_name: String,
    pub action: String,
    pub details: String,
}

impl ActionRecord {
    /// Create an audit record stamped with the current local time
    pub fn now(user_name: &str, action: &str, details: impl Into<String>) -> Self {
        Self {
            date_time: display_timestamp_now(),
            user_name: user_name.to_string(),
            action: action.to_string(),
            details: details.into(),
        }
    }
}

/// A named, isolated collection of entries ("object" / database)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseObject {
    pub id: String,
    pub name: String,
}

/// Error for malformed object ids
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectIdError {
    InvalidFormat(String),
    InvalidTimestamp(String),
}

impl DatabaseObject {
    /// The object every registry starts with
    pub fn default_object() -> Self {
        Self {
            id: DEFAULT_OBJECT_ID.to_string(),
            name: DEFAULT_OBJECT_NAME.to_string(),
        }
    }

    /// Generate an object ID in format "obj_<epoch_millis>"
    pub fn generate_id(epoch_millis: u64) -> String {
        format!("obj_{}", epoch_millis)
    }

    /// Parse an object ID to extract the creation timestamp
    pub fn parse_id(id: &str) -> Result<u64, ObjectIdError> {
        let millis = id
            .strip_prefix("obj_")
            .ok_or_else(|| ObjectIdError::InvalidFormat(id.to_string()))?;
        millis
            .parse::<u64>()
            .map_err(|_| ObjectIdError::InvalidTimestamp(millis.to_string()))
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_OBJECT_ID
    }
}

impl fmt::Display for ObjectIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectIdError::InvalidFormat(id) => write!(f, "Invalid object ID format: {}", id),
            ObjectIdError::InvalidTimestamp(ts) => write!(f, "Invalid timestamp in object ID: {}", ts),
        }
    }
}

impl std::error::Error for ObjectIdError {}

/// Estrus synchronization protocol definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProtocol {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<ProtocolStep>,
}

/// One protocol step: a drug given `day` days after the protocol start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    pub day: u32,
    pub drug: String,
}

/// A protocol step resolved to a calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStep {
    pub date: NaiveDate,
    pub day: u32,
    pub drug: String,
}

/// Backup snapshot kept in local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub entries: Vec<CowEntry>,
    pub created_at: String,
    pub count: usize,
}

/// Backup file written by export and read by import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub entries: Vec<CowEntry>,
    #[serde(alias = "createdAt", default)]
    pub exported_at: String,
    #[serde(default)]
    pub count: usize,
}

/// Reporting window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ReportPeriod {
    /// Calendar month containing the reference date
    Month,
    /// Calendar year containing the reference date
    Year,
    /// Explicit inclusive range
    Range { start: NaiveDate, end: NaiveDate },
}

impl ReportPeriod {
    pub fn name(&self) -> &'static str {
        match self {
            ReportPeriod::Month => "month",
            ReportPeriod::Year => "year",
            ReportPeriod::Range { .. } => "range",
        }
    }
}

/// Concrete inclusive window, `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodBounds {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Aggregate reproductive metrics for a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreedingReport {
    pub period: String,
    pub bounds: PeriodBounds,
    pub total_cows: usize,
    pub eligible_cows: usize,
    pub inseminated_cows: usize,
    pub inseminations: usize,
    pub pregnancies: usize,
    pub pregnant_cows: usize,
    /// Pregnancy rate, percent
    pub pr: f64,
    /// Conception rate, percent
    pub cr: f64,
    /// Heat detection rate, percent
    pub hdr: f64,
    /// Mean days from calving to conception
    pub service_period_days: Option<f64>,
    /// Mean days open for eligible cows not yet pregnant
    pub avg_days_open: Option<f64>,
}

/// Credentials for `/api/auth/login` and `/api/auth/register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Authenticated user as reported by the server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: String,
}

/// Response of login and register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Response of `/api/auth/check-username`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameAvailability {
    pub available: bool,
}

/// Request body for creating or renaming an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectNameRequest {
    pub name: String,
}

/// Error body returned by the server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    pub fn text(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}

/// Current local time in display format
pub fn display_timestamp_now() -> String {
    Local::now().format(DISPLAY_TIMESTAMP_FORMAT).to_string()
}

fn count_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn de_optional_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

fn de_attempt_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value).filter(|n| *n > 0).unwrap_or(1))
}

fn de_vwp<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value).unwrap_or(DEFAULT_VWP_DAYS))
}

fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_entry_defaults() {
        let entry = CowEntry::new("101");
        assert_eq!(entry.cattle_id, "101");
        assert_eq!(entry.attempt_number, 1);
        assert_eq!(entry.vwp, 60);
        assert!(!entry.synced);
        assert!(!entry.date_added.is_empty());
        assert!(entry.insemination_history.is_empty());
        assert!(entry.action_history.is_empty());
        assert!(entry.uzi_history.is_empty());
        assert_eq!(entry.lactation, None);
    }

    #[test]
    fn test_entry_deserializes_legacy_shape() {
        let raw = json!({
            "cattleId": "205",
            "lactation": "",
            "attemptNumber": "3",
            "vwp": null,
            "inseminationDate": "2024-02-15",
            "protocol": { "name": "Ovsynch" }
        });
        let entry: CowEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.cattle_id, "205");
        assert_eq!(entry.lactation, None);
        assert_eq!(entry.attempt_number, 3);
        assert_eq!(entry.vwp, 60);
        assert_eq!(entry.group, "");
        assert_eq!(entry.protocol.name, "Ovsynch");
        assert_eq!(entry.protocol.start_date, "");
        assert!(entry.insemination_history.is_empty());
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let mut entry = CowEntry::new("7");
        entry.lactation = Some(2);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["cattleId"], "7");
        assert_eq!(value["attemptNumber"], 1);
        assert_eq!(value["lactation"], 2);
        assert!(value.get("inseminationHistory").is_some());
        assert!(value.get("cattle_id").is_none());
    }

    #[test]
    fn test_zero_attempt_number_falls_back_to_one() {
        let entry: CowEntry = serde_json::from_value(json!({ "cattleId": "1", "attemptNumber": 0 })).unwrap();
        assert_eq!(entry.attempt_number, 1);
    }

    #[test]
    fn test_generate_object_id() {
        assert_eq!(DatabaseObject::generate_id(1702516122000), "obj_1702516122000");
    }

    #[test]
    fn test_parse_object_id() {
        assert_eq!(DatabaseObject::parse_id("obj_1702516122000").unwrap(), 1702516122000);
        assert!(DatabaseObject::parse_id("default").is_err());
        assert!(DatabaseObject::parse_id("obj_abc").is_err());
    }

    #[test]
    fn test_backup_file_accepts_created_at() {
        let raw = json!({ "entries": [{ "cattleId": "1" }], "createdAt": "2024-01-01", "count": 1 });
        let file: BackupFile = serde_json::from_value(raw).unwrap();
        assert_eq!(file.exported_at, "2024-01-01");
        assert_eq!(file.entries.len(), 1);
    }

    #[test]
    fn test_api_error_text_prefers_error_field() {
        let body: ApiErrorBody = serde_json::from_value(json!({ "error": "nope", "message": "other" })).unwrap();
        assert_eq!(body.text(), Some("nope"));
        let body: ApiErrorBody = serde_json::from_value(json!({ "message": "other" })).unwrap();
        assert_eq!(body.text(), Some("other"));
    }

    #[test]
    fn test_user_info_numeric_id() {
        let user: UserInfo = serde_json::from_value(json!({ "id": 42, "username": "ivan" })).unwrap();
        assert_eq!(user.id, "42");
    }
}
