//! In-process repository
//!
//! Backs both persistence traits with maps behind a tokio `RwLock`. Reads
//! clone out a consistent copy. A commit checks, writes the field and appends
//! its audit record under one write lock.

use super::repository::{FieldRepository, FieldWrite, ScoreHistory, WriteOutcome};
use crate::error::EngineResult;
use crate::quality::LabQualityScore;
use crate::types::{AuditRecord, ContextField};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    /// company_id -> key -> field
    fields: HashMap<String, BTreeMap<String, ContextField>>,
    audit: Vec<AuditRecord>,
    scores: Vec<LabQualityScore>,
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FieldRepository for MemoryRepository {
    async fn load_field(&self, company_id: &str, key: &str) -> EngineResult<Option<ContextField>> {
        let tables = self.tables.read().await;
        Ok(tables
            .fields
            .get(company_id)
            .and_then(|fields| fields.get(key))
            .cloned())
    }

    async fn load_fields(&self, company_id: &str) -> EngineResult<Vec<ContextField>> {
        let tables = self.tables.read().await;
        Ok(tables
            .fields
            .get(company_id)
            .map(|fields| fields.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(
        &self,
        company_id: &str,
        write: &FieldWrite,
        audit: &AuditRecord,
    ) -> EngineResult<WriteOutcome> {
        let mut tables = self.tables.write().await;
        let fields = tables.fields.entry(company_id.to_string()).or_default();

        match write {
            FieldWrite::Insert(field) => {
                if fields.contains_key(&field.key) {
                    return Ok(WriteOutcome::Conflict);
                }
                fields.insert(field.key.clone(), field.clone());
            }
            FieldWrite::Update { field, expected } => match fields.get_mut(&field.key) {
                Some(current) if current.revision == *expected => *current = field.clone(),
                _ => return Ok(WriteOutcome::Conflict),
            },
        }

        tables.audit.push(audit.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn append_audit(&self, record: &AuditRecord) -> EngineResult<()> {
        self.tables.write().await.audit.push(record.clone());
        Ok(())
    }

    async fn audit_log(&self, company_id: &str) -> EngineResult<Vec<AuditRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|r| r.company_id == company_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScoreHistory for MemoryRepository {
    async fn append_score(&self, score: &LabQualityScore) -> EngineResult<()> {
        self.tables.write().await.scores.push(score.clone());
        Ok(())
    }

    async fn latest_score(&self, lab_key: &str, company_id: &str) -> EngineResult<Option<LabQualityScore>> {
        let tables = self.tables.read().await;
        Ok(tables
            .scores
            .iter()
            .rev()
            .find(|s| s.lab_key == lab_key && s.company_id == company_id)
            .cloned())
    }

    async fn score_history(&self, lab_key: &str, company_id: &str) -> EngineResult<Vec<LabQualityScore>> {
        let tables = self.tables.read().await;
        Ok(tables
            .scores
            .iter()
            .rev()
            .filter(|s| s.lab_key == lab_key && s.company_id == company_id)
            .cloned()
            .collect())
    }
}
