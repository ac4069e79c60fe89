use thiserror::Error;

use crate::audit::verify::FailureKind;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for AuditError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    /// Malformed envelope, cursor or query. Nothing was hashed or written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The durable write failed. The chain tail did not move; retrying is safe.
    #[error("Durability error: {0}")]
    Durability(String),

    /// The verifier found a record that does not match the chain.
    #[error("Tamper detected at record {id}: {kind}")]
    TamperDetected { id: u64, kind: FailureKind },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    pub fn invalid_resource(reason: &str) -> Self {
        Self::Validation(format!("Invalid resource: {}", reason))
    }

    pub fn unknown_action(action: &str) -> Self {
        Self::Validation(format!(
            "Unknown audit action '{}': not part of the action taxonomy",
            action
        ))
    }

    pub fn invalid_cursor(reason: impl std::fmt::Display) -> Self {
        Self::Validation(format!("Invalid cursor: {}", reason))
    }

    pub fn unknown_record(id: u64) -> Self {
        Self::NotFound(format!("Audit record {} does not exist", id))
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Durability(_))
    }
}
