//! Error types for the merge engine
//!
//! Per-candidate problems are reported as outcomes, not errors. An
//! `EngineError` always means the caller's whole operation failed.

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// The persistence layer failed; the caller must not assume any state
    #[error("Store access failed: {0}")]
    Store(#[from] ctxf_common::Error),

    /// Optimistic write lost twice against concurrent writers
    #[error("Concurrent modification of {company_id}/{key}")]
    ConcurrentModification { company_id: String, key: String },

    /// Review action on a field that does not exist
    #[error("Field not found: {company_id}/{key}")]
    FieldNotFound { company_id: String, key: String },

    /// Review action attempted by an automated source
    #[error("Source '{0}' is not a human source")]
    NotHumanSource(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Store(ctxf_common::Error::Database(err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Store(ctxf_common::Error::Serialization(err))
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
