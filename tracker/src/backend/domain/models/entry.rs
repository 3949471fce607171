/// Reasons an entry mutation is rejected before anything is persisted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntryValidationError {
    #[error("Cattle ID cannot be empty")]
    EmptyCattleId,
    #[error("Cattle ID is too long (max 100 characters)")]
    CattleIdTooLong,
    #[error("Cattle ID '{0}' is not readable")]
    IllegibleCattleId(String),
    #[error("An animal with cattle ID '{0}' already exists")]
    DuplicateCattleId(String),
    #[error("No animal with cattle ID '{0}'")]
    NotFound(String),
    #[error("Invalid date '{0}'")]
    InvalidDate(String),
}

/// Audit action names written to `actionHistory`
pub mod actions {
    pub const CREATED: &str = "Создание";
    pub const EDITED: &str = "Редактирование";
    pub const INSEMINATION: &str = "Осеменение";
    pub const CALVING: &str = "Отёл";
    pub const DRY_OFF: &str = "Запуск";
    pub const PROTOCOL: &str = "Протокол";
    pub const EXIT: &str = "Выбытие";
}

/// Status values the data layer writes itself
pub mod statuses {
    pub const INSEMINATED: &str = "Осеменена";
    pub const PREGNANT: &str = "Стельная";
    pub const CALVED: &str = "Отёл";
    pub const DRY: &str = "Сухостой";
    pub const EXITED: &str = "Выбыла";
}

/// Insemination attempt to record against an animal
#[derive(Debug, Clone, Default)]
pub struct InseminationCommand {
    pub date: String,
    pub bull: String,
    pub inseminator: String,
    pub code: String,
}

/// Check a user-supplied cattle id and return it trimmed
pub fn validate_cattle_id(cattle_id: &str) -> Result<String, EntryValidationError> {
    let trimmed = cattle_id.trim();
    if trimmed.is_empty() {
        return Err(EntryValidationError::EmptyCattleId);
    }
    if trimmed.chars().count() > shared::MAX_CATTLE_ID_LEN {
        return Err(EntryValidationError::CattleIdTooLong);
    }
    if !crate::backend::storage::sanitize::is_legible(trimmed) {
        return Err(EntryValidationError::IllegibleCattleId(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cattle_id() {
        assert_eq!(validate_cattle_id("  101 ").unwrap(), "101");
        assert_eq!(validate_cattle_id("Зорька-7").unwrap(), "Зорька-7");
        assert_eq!(validate_cattle_id("   "), Err(EntryValidationError::EmptyCattleId));
        assert_eq!(validate_cattle_id(&"1".repeat(101)), Err(EntryValidationError::CattleIdTooLong));
        assert!(matches!(
            validate_cattle_id("\u{FFFD}\u{FFFD}\u{FFFD}1"),
            Err(EntryValidationError::IllegibleCattleId(_))
        ));
    }
}
