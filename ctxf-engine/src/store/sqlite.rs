//! SQLite repository
//!
//! Field values, evidence, alternatives and score payloads are stored as
//! JSON text; timestamps as RFC 3339. Conditional writes report a conflict
//! through `rows_affected() == 0` instead of an error. A commit runs the field
//! write and the audit insert in one transaction; a conflict or a failed audit
//! insert rolls both back.

use super::repository::{FieldRepository, FieldWrite, ScoreHistory, WriteOutcome};
use crate::error::{EngineError, EngineResult};
use crate::quality::LabQualityScore;
use crate::types::{AuditRecord, ContextField, FieldStatus, SourceTag};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctxf_common::Error;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Wrap a pool whose schema was created by `ctxf_common::db`
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::Store(Error::Internal(format!("Corrupt {} in store: {}", what, detail)))
}

fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

fn field_from_row(row: &SqliteRow) -> EngineResult<ContextField> {
    let value: String = row.get("value");
    let status: String = row.get("status");
    let evidence: String = row.get("evidence");
    let alternatives: String = row.get("alternatives");
    let updated_at: String = row.get("updated_at");
    let revision: i64 = row.get("revision");

    Ok(ContextField {
        key: row.get("key"),
        domain: row.get("domain"),
        value: serde_json::from_str(&value)?,
        status: FieldStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        source: SourceTag::new(row.get::<String, _>("source")),
        source_id: row.get("source_id"),
        confidence: row.get("confidence"),
        evidence: serde_json::from_str(&evidence)?,
        rejected_source_id: row.get("rejected_source_id"),
        alternatives: serde_json::from_str(&alternatives)?,
        updated_at: parse_timestamp(&updated_at)?,
        revision: u64::try_from(revision).map_err(|e| corrupt("revision", e))?,
    })
}

fn audit_from_row(row: &SqliteRow) -> EngineResult<AuditRecord> {
    let id: String = row.get("id");
    let value: Option<String> = row.get("value");
    let recorded_at: String = row.get("recorded_at");

    Ok(AuditRecord {
        id: Uuid::parse_str(&id).map_err(|e| corrupt("audit id", e))?,
        company_id: row.get("company_id"),
        key: row.get("key"),
        source: SourceTag::new(row.get::<String, _>("source")),
        source_id: row.get("source_id"),
        outcome: row.get("outcome"),
        reason: row.get("reason"),
        value: value.as_deref().map(serde_json::from_str).transpose()?,
        confidence: row.get("confidence"),
        recorded_at: parse_timestamp(&recorded_at)?,
    })
}

fn score_from_row(row: &SqliteRow) -> EngineResult<LabQualityScore> {
    let payload: String = row.get("payload");
    Ok(serde_json::from_str(&payload)?)
}

async fn write_field(
    conn: &mut SqliteConnection,
    company_id: &str,
    write: &FieldWrite,
) -> EngineResult<WriteOutcome> {
    let result = match write {
        FieldWrite::Insert(field) => {
            sqlx::query(
                r#"
                INSERT INTO context_fields (company_id, key, domain, value, status, source, source_id,
                                            confidence, evidence, rejected_source_id, alternatives,
                                            updated_at, revision)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(company_id, key) DO NOTHING
                "#,
            )
            .bind(company_id)
            .bind(&field.key)
            .bind(&field.domain)
            .bind(serde_json::to_string(&field.value)?)
            .bind(field.status.as_str())
            .bind(field.source.as_str())
            .bind(&field.source_id)
            .bind(field.confidence)
            .bind(serde_json::to_string(&field.evidence)?)
            .bind(&field.rejected_source_id)
            .bind(serde_json::to_string(&field.alternatives)?)
            .bind(field.updated_at.to_rfc3339())
            .bind(field.revision as i64)
            .execute(&mut *conn)
            .await?
        }
        FieldWrite::Update { field, expected } => {
            sqlx::query(
                r#"
                UPDATE context_fields SET
                    value = ?,
                    status = ?,
                    source = ?,
                    source_id = ?,
                    confidence = ?,
                    evidence = ?,
                    rejected_source_id = ?,
                    alternatives = ?,
                    updated_at = ?,
                    revision = ?
                WHERE company_id = ? AND key = ? AND revision = ?
                "#,
            )
            .bind(serde_json::to_string(&field.value)?)
            .bind(field.status.as_str())
            .bind(field.source.as_str())
            .bind(&field.source_id)
            .bind(field.confidence)
            .bind(serde_json::to_string(&field.evidence)?)
            .bind(&field.rejected_source_id)
            .bind(serde_json::to_string(&field.alternatives)?)
            .bind(field.updated_at.to_rfc3339())
            .bind(field.revision as i64)
            .bind(company_id)
            .bind(&field.key)
            .bind(*expected as i64)
            .execute(&mut *conn)
            .await?
        }
    };

    Ok(if result.rows_affected() == 0 {
        WriteOutcome::Conflict
    } else {
        WriteOutcome::Applied
    })
}

async fn insert_audit(conn: &mut SqliteConnection, record: &AuditRecord) -> EngineResult<()> {
    let value = record.value.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO proposal_audit (id, company_id, key, source, source_id, outcome, reason,
                                    value, confidence, recorded_at, seq)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM proposal_audit))
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.company_id)
    .bind(&record.key)
    .bind(record.source.as_str())
    .bind(&record.source_id)
    .bind(&record.outcome)
    .bind(&record.reason)
    .bind(value)
    .bind(record.confidence)
    .bind(record.recorded_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl FieldRepository for SqliteRepository {
    async fn load_field(&self, company_id: &str, key: &str) -> EngineResult<Option<ContextField>> {
        let row = sqlx::query(
            r#"
            SELECT key, domain, value, status, source, source_id, confidence, evidence,
                   rejected_source_id, alternatives, updated_at, revision
            FROM context_fields
            WHERE company_id = ? AND key = ?
            "#,
        )
        .bind(company_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(field_from_row).transpose()
    }

    async fn load_fields(&self, company_id: &str) -> EngineResult<Vec<ContextField>> {
        let rows = sqlx::query(
            r#"
            SELECT key, domain, value, status, source, source_id, confidence, evidence,
                   rejected_source_id, alternatives, updated_at, revision
            FROM context_fields
            WHERE company_id = ?
            ORDER BY key
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(field_from_row).collect()
    }

    async fn commit(
        &self,
        company_id: &str,
        write: &FieldWrite,
        audit: &AuditRecord,
    ) -> EngineResult<WriteOutcome> {
        let mut tx = self.pool.begin().await?;

        if write_field(&mut *tx, company_id, write).await? == WriteOutcome::Conflict {
            // Dropping the transaction rolls it back
            return Ok(WriteOutcome::Conflict);
        }
        insert_audit(&mut *tx, audit).await?;

        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    async fn append_audit(&self, record: &AuditRecord) -> EngineResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut *conn, record).await
    }

    async fn audit_log(&self, company_id: &str) -> EngineResult<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, company_id, key, source, source_id, outcome, reason, value, confidence, recorded_at
            FROM proposal_audit
            WHERE company_id = ?
            ORDER BY seq
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl ScoreHistory for SqliteRepository {
    async fn append_score(&self, score: &LabQualityScore) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_quality_scores (id, lab_key, run_id, company_id, computed_at, score,
                                            quality_band, payload, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM lab_quality_scores))
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&score.lab_key)
        .bind(&score.run_id)
        .bind(&score.company_id)
        .bind(score.computed_at.to_rfc3339())
        .bind(score.score as i64)
        .bind(score.quality_band.as_str())
        .bind(serde_json::to_string(score)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_score(&self, lab_key: &str, company_id: &str) -> EngineResult<Option<LabQualityScore>> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM lab_quality_scores
            WHERE lab_key = ? AND company_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(lab_key)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(score_from_row).transpose()
    }

    async fn score_history(&self, lab_key: &str, company_id: &str) -> EngineResult<Vec<LabQualityScore>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM lab_quality_scores
            WHERE lab_key = ? AND company_id = ?
            ORDER BY seq DESC
            "#,
        )
        .bind(lab_key)
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(score_from_row).collect()
    }
}
