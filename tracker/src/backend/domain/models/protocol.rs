#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolValidationError {
    #[error("Protocol name cannot be empty")]
    EmptyName,
    #[error("Protocol must have at least one step")]
    NoSteps,
    #[error("Protocol step on day {0} has no drug")]
    EmptyDrug(u32),
    #[error("A protocol named '{0}' already exists")]
    DuplicateName(String),
    #[error("Protocol not found: {0}")]
    NotFound(String),
}
