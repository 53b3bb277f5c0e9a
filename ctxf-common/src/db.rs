//! Database initialization
//!
//! Opens (or creates) the SQLite database backing the field store and
//! creates the schema idempotently. Safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open or create the database file and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows snapshot reads alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema
///
/// Limited to one connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_context_fields_table(pool).await?;
    create_proposal_audit_table(pool).await?;
    create_lab_quality_scores_table(pool).await?;
    Ok(())
}

async fn create_context_fields_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS context_fields (
            company_id TEXT NOT NULL,
            key TEXT NOT NULL,
            domain TEXT NOT NULL,
            value TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('proposed', 'confirmed', 'rejected')),
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            confidence REAL,
            evidence TEXT NOT NULL DEFAULT '[]',
            rejected_source_id TEXT,
            alternatives TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (company_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_context_fields_domain ON context_fields(company_id, domain)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_proposal_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposal_audit (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            key TEXT NOT NULL,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            reason TEXT NOT NULL,
            value TEXT,
            confidence REAL,
            recorded_at TEXT NOT NULL,
            seq INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_proposal_audit_company ON proposal_audit(company_id, seq)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_lab_quality_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lab_quality_scores (
            id TEXT PRIMARY KEY,
            lab_key TEXT NOT NULL,
            run_id TEXT NOT NULL,
            company_id TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
            quality_band TEXT NOT NULL,
            payload TEXT NOT NULL,
            seq INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lab_quality_scores_lab ON lab_quality_scores(lab_key, company_id, seq)")
        .execute(pool)
        .await?;

    Ok(())
}
