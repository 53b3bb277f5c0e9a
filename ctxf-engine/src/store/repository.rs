//! Persistence seams
//!
//! The field store and the quality tracker only talk to storage through
//! these traits. Every method is a single atomic operation; an `Err` means
//! the backing store is unavailable and must reach the caller.
//!
//! A field mutation and its audit record are one unit: [`FieldRepository::commit`]
//! stores both or neither.

use crate::error::EngineResult;
use crate::quality::LabQualityScore;
use crate::types::{AuditRecord, ContextField};
use async_trait::async_trait;

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The row changed (or appeared) since it was read
    Conflict,
}

/// A conditional field write computed from one arbitration or review
#[derive(Debug, Clone)]
pub enum FieldWrite {
    /// Applies only if no field exists under the key
    Insert(ContextField),
    /// Applies only if the stored revision is still `expected`
    Update { field: ContextField, expected: u64 },
}

impl FieldWrite {
    /// The field as it will be stored
    pub fn field(&self) -> &ContextField {
        match self {
            Self::Insert(field) | Self::Update { field, .. } => field,
        }
    }

    pub fn into_field(self) -> ContextField {
        match self {
            Self::Insert(field) | Self::Update { field, .. } => field,
        }
    }
}

#[async_trait]
pub trait FieldRepository: Send + Sync {
    async fn load_field(&self, company_id: &str, key: &str) -> EngineResult<Option<ContextField>>;

    /// All fields for a company, ordered by key
    async fn load_fields(&self, company_id: &str) -> EngineResult<Vec<ContextField>>;

    /// Apply `write` and append `audit` together
    ///
    /// On `Conflict` nothing is stored. On `Err` nothing is stored either,
    /// including when only the audit append failed.
    async fn commit(
        &self,
        company_id: &str,
        write: &FieldWrite,
        audit: &AuditRecord,
    ) -> EngineResult<WriteOutcome>;

    /// Audit an outcome that changed no field
    async fn append_audit(&self, record: &AuditRecord) -> EngineResult<()>;

    /// Audit trail for a company, oldest first
    async fn audit_log(&self, company_id: &str) -> EngineResult<Vec<AuditRecord>>;
}

/// Append-only history of lab quality scores
#[async_trait]
pub trait ScoreHistory: Send + Sync {
    async fn append_score(&self, score: &LabQualityScore) -> EngineResult<()>;

    /// Most recently appended score for a lab and company
    async fn latest_score(&self, lab_key: &str, company_id: &str) -> EngineResult<Option<LabQualityScore>>;

    /// Scores for a lab and company, newest first
    async fn score_history(&self, lab_key: &str, company_id: &str) -> EngineResult<Vec<LabQualityScore>>;
}
