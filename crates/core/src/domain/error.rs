// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Unknown outcome display name \"{0}\"")]
    UnknownOutcome(String),

    #[error("Invalid exit status condition \"{0}\" (expected e.g. ==0, !=0, >=1)")]
    InvalidExitCondition(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
