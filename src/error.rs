//! Error types for the lead scoring core.

use crate::lead::FieldError;

/// Top-level error type for the scoring core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Retraining error: {0}")]
    Retraining(#[from] RetrainingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Input validation failure with field-level detail.
///
/// Recovered locally and surfaced to the caller; never retried.
#[derive(Debug, thiserror::Error)]
#[error("Invalid lead record: {}", field_summary(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

fn field_summary(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Feature pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Cannot encode field {field}: {message}")]
    Unrepresentable { field: String, message: String },

    #[error("Feature pipeline produced a non-finite value for {field}")]
    NonFinite { field: String },
}

/// Model registry failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No active model available")]
    NoActiveModel,

    #[error("Model version {0} not found in registry")]
    VersionNotFound(String),

    #[error("Model blob for version {version} is corrupt: {message}")]
    CorruptEntry { version: String, message: String },
}

/// Retraining failures.
#[derive(Debug, thiserror::Error)]
pub enum RetrainingError {
    #[error("Insufficient feedback: have {have}, need {need} ({} more required)", .need - .have)]
    InsufficientFeedback { have: u64, need: u64 },

    #[error("A retraining run is already in progress")]
    ConcurrentRetraining,

    #[error("Training failed: {0}")]
    TrainingFailure(String),
}

/// Result type alias for the scoring core.
pub type Result<T> = std::result::Result<T, Error>;
