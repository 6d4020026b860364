//! Error types for the NC follow-up service.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Follow-up error: {0}")]
    Followup(#[from] FollowupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Templated email delivery errors.
///
/// Always localized to one lead; the sweep logs these and moves on.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Email template {template} not found")]
    TemplateNotFound { template: String },

    #[error("Lead {lead_id} has no email address")]
    NoRecipient { lead_id: Uuid },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP transport failed: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Database(#[from] DatabaseError),
}

/// Errors from the follow-up state machine components.
#[derive(Debug, thiserror::Error)]
pub enum FollowupError {
    #[error("'{name}' stage not found (role: {role})")]
    StageNotFound { role: String, name: String },

    #[error("A follow-up sweep is already running")]
    SweepInProgress,

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Store error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
