//! Error types for the ORM system
//!
//! Provides error handling for persistence calls, association type checks,
//! scoped lookups and schema registration.

use thiserror::Error;

use crate::model::PrimaryKey;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// A single failed validation on a record attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub attribute: String,
    pub message: String,
}

impl FieldError {
    pub fn new(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.attribute, self.message)
    }
}

/// Error types for ORM operations
#[derive(Debug, Error)]
pub enum ModelError {
    /// Backend reported a storage failure
    #[error("Database error: {0}")]
    Database(String),

    /// Requested identifier(s) not present in the (scoped) lookup
    #[error("Couldn't find {model} with ID(s) {}", format_ids(.ids))]
    RecordNotFound { model: String, ids: Vec<PrimaryKey> },

    /// Value assigned to or appended on an association has the wrong type
    #[error("Association '{association}' expected {expected}, got {found}")]
    AssociationTypeMismatch {
        association: String,
        expected: String,
        found: String,
    },

    /// Strict save of an invalid record
    #[error("Validation failed for {model}: {}", format_errors(.errors))]
    Validation { model: String, errors: Vec<FieldError> },

    /// Malformed schema or association declaration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Misuse of an association at runtime
    #[error("Relationship error: {0}")]
    Relationship(String),

    /// Transaction scope failure
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Primary key is missing or invalid
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    /// An observer aborted the operation
    #[error("Callback '{callback}' aborted {model}: {reason}")]
    Callback {
        model: String,
        callback: String,
        reason: String,
    },

    /// Opaque error raised by a backend implementation
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl ModelError {
    pub fn not_found(model: impl Into<String>, ids: Vec<PrimaryKey>) -> Self {
        ModelError::RecordNotFound {
            model: model.into(),
            ids,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::RecordNotFound { .. })
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, ModelError::AssociationTypeMismatch { .. })
    }
}

fn format_ids(ids: &[PrimaryKey]) -> String {
    if ids.is_empty() {
        return "<none>".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for ModelError {
    fn from(err: crate::config::ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}
