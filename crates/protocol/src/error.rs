//! Error taxonomy shared across components (spec §7).
//!
//! Every error a component raises classifies into one of these kinds so a
//! retry policy is a single match, not re-derived per call site.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network timeouts, publish timeouts, DB connection resets.
    Transient,
    /// Auth failure, subscribe rejection.
    Protocol,
    /// Normalization failure, sequence gap, checksum mismatch, decimal overflow.
    Data,
    /// Schema mismatch, constraint violation.
    Storage,
    /// Missing/invalid config.
    Configuration,
}

impl ErrorClass {
    /// Transient errors alone are retried locally; everything else propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to subject '{subject}' timed out after {attempts} attempts")]
    Timeout { subject: String, attempts: u32 },

    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("record pushed to deadletter buffer after exhausting retries on '{subject}'")]
    DeadLettered { subject: String },
}

impl PublishError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PublishError::Timeout { .. } | PublishError::Connection(_) => ErrorClass::Transient,
            PublishError::DeadLettered { .. } => ErrorClass::Data,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("schema mismatch in table '{table}': {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error("constraint violation inserting into '{table}': {detail}")]
    ConstraintViolation { table: String, detail: String },

    #[error("connection error: {0}")]
    Connection(String),
}

impl StorageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::SchemaMismatch { .. } | StorageError::ConstraintViolation { .. } => {
                ErrorClass::Storage
            }
            StorageError::Connection(_) => ErrorClass::Transient,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key '{0}'")]
    Missing(String),
    #[error("invalid value for config key '{key}': {detail}")]
    Invalid { key: String, detail: String },
    #[error("unknown config key '{0}'")]
    Unknown(String),
}

impl ConfigError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}
