//! Field store and score history over SQLite
//!
//! Uses a temporary database file so reopening the pool exercises the
//! same path a restarted host takes.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ctxf_common::config::EngineConfig;
use ctxf_common::db::{init_database, init_memory_database};
use ctxf_common::ManualClock;
use ctxf_engine::cooldown::CooldownThrottle;
use ctxf_engine::extract::{ProducerFamily, RunContext};
use ctxf_engine::quality::{QualityScorer, QualityTracker, ScoreOutcome};
use ctxf_engine::store::{FieldRepository, FieldWrite, SqliteRepository, WriteOutcome};
use ctxf_engine::types::{AuditRecord, DecisionReason, HumanReview};
use ctxf_engine::{ContextField, EngineError, FieldStatus, FieldStore, ProposalCandidate, ProposalOutcome};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const COMPANY: &str = "acme";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn store_over(repo: SqliteRepository, clock: Arc<ManualClock>) -> FieldStore {
    FieldStore::new(
        Arc::new(repo),
        Arc::new(CooldownThrottle::in_memory(clock.clone())),
        &EngineConfig::default(),
        clock,
    )
}

fn proposal(key: &str, value: serde_json::Value, source: &str, source_id: &str, confidence: f64) -> ProposalCandidate {
    ProposalCandidate::new(key, value, source, source_id, start())
        .with_confidence(confidence)
        .with_evidence(vec![format!("{}:finding-1", source)])
}

fn audit_for(field: &ContextField) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        company_id: COMPANY.to_string(),
        key: field.key.clone(),
        source: field.source.clone(),
        source_id: field.source_id.clone(),
        outcome: "accepted".to_string(),
        reason: "no_existing".to_string(),
        value: Some(field.value.clone()),
        confidence: field.confidence,
        recorded_at: field.updated_at,
    }
}

/// Make every audit insert abort until the trigger is dropped
async fn break_audit_trail(pool: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TRIGGER audit_offline BEFORE INSERT ON proposal_audit
        BEGIN
            SELECT RAISE(ABORT, 'audit offline');
        END
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
}

async fn repair_audit_trail(pool: &SqlitePool) {
    sqlx::query("DROP TRIGGER audit_offline").execute(pool).await.unwrap();
}

#[tokio::test]
async fn test_fields_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ctxf.db");
    let clock = Arc::new(ManualClock::new(start()));

    {
        let pool = init_database(&db_path).await.unwrap();
        let store = store_over(SqliteRepository::new(pool.clone()), clock.clone());

        store
            .propose(COMPANY, proposal("identity.industry", json!("Retail"), "website_lab", "run1", 0.6))
            .await
            .unwrap();
        store
            .propose(COMPANY, proposal("identity.industry", json!("E-commerce"), "brand_lab", "run2", 0.8))
            .await
            .unwrap();
        store
            .propose(
                COMPANY,
                proposal("competitive.competitors", json!(["Globex", "Initech"]), "seo_lab", "run3", 0.7),
            )
            .await
            .unwrap();
        store
            .confirm(COMPANY, "competitive.competitors", &HumanReview::new("user", "u1"))
            .await
            .unwrap();
        pool.close().await;
    }

    // Given: a fresh pool over the same file
    let pool = init_database(&db_path).await.unwrap();
    let store = store_over(SqliteRepository::new(pool), clock);

    // Then: values, alternatives and statuses round-trip
    let industry = store.get_field(COMPANY, "identity.industry").await.unwrap().unwrap();
    assert_eq!(industry.value, json!("E-commerce"));
    assert_eq!(industry.status, FieldStatus::Proposed);
    assert_eq!(industry.confidence, Some(0.8));
    assert_eq!(industry.evidence, vec!["brand_lab:finding-1"]);
    assert_eq!(industry.revision, 2);
    assert_eq!(industry.alternatives.len(), 1);
    assert_eq!(industry.alternatives[0].value, json!("Retail"));
    assert_eq!(industry.alternatives[0].source_lab.as_str(), "website_lab");
    assert_eq!(industry.updated_at, start());

    let competitors = store.get_field(COMPANY, "competitive.competitors").await.unwrap().unwrap();
    assert_eq!(competitors.status, FieldStatus::Confirmed);
    assert_eq!(competitors.value, json!(["Globex", "Initech"]));

    let keys: Vec<_> = store.fields(COMPANY).await.unwrap().into_iter().map(|f| f.key).collect();
    assert_eq!(keys, vec!["competitive.competitors", "identity.industry"]);

    let audit = store.audit_log(COMPANY).await.unwrap();
    let outcomes: Vec<_> = audit.iter().map(|r| r.outcome.as_str()).collect();
    assert_eq!(outcomes, vec!["accepted", "accepted", "accepted", "confirmed"]);
    assert_eq!(audit[3].source.as_str(), "user");
}

#[tokio::test]
async fn test_conditional_writes() {
    let repo = SqliteRepository::new(init_memory_database().await.unwrap());
    let candidate = proposal("identity.industry", json!("Retail"), "website_lab", "run1", 0.6);
    let mut field = ContextField::from_candidate(&candidate);

    let insert = FieldWrite::Insert(field.clone());
    assert_eq!(repo.commit(COMPANY, &insert, &audit_for(&field)).await.unwrap(), WriteOutcome::Applied);
    assert_eq!(repo.commit(COMPANY, &insert, &audit_for(&field)).await.unwrap(), WriteOutcome::Conflict);

    field.value = json!("E-commerce");
    field.revision = 2;
    let update = |expected| FieldWrite::Update {
        field: field.clone(),
        expected,
    };
    assert_eq!(repo.commit(COMPANY, &update(1), &audit_for(&field)).await.unwrap(), WriteOutcome::Applied);
    assert_eq!(repo.commit(COMPANY, &update(1), &audit_for(&field)).await.unwrap(), WriteOutcome::Conflict);
    assert_eq!(repo.commit("globex", &update(2), &audit_for(&field)).await.unwrap(), WriteOutcome::Conflict);

    let stored = repo.load_field(COMPANY, "identity.industry").await.unwrap().unwrap();
    assert_eq!(stored.value, json!("E-commerce"));
    assert_eq!(stored.revision, 2);
    assert!(repo.load_field(COMPANY, "brand.voice").await.unwrap().is_none());

    // Only the two applied writes left an audit record
    assert_eq!(repo.audit_log(COMPANY).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_audit_insert_rolls_back_proposal() {
    let pool = init_memory_database().await.unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let store = store_over(SqliteRepository::new(pool.clone()), clock);

    // Given: the audit table refuses inserts
    break_audit_trail(&pool).await;

    // When: a batch would create a new field
    let result = store
        .propose_batch(
            COMPANY,
            vec![proposal("identity.industry", json!("Retail"), "website_lab", "run1", 0.6)],
        )
        .await;

    // Then: the batch fails, no field was written and the cooldown is released
    assert!(matches!(result, Err(EngineError::Store(_))), "got {:?}", result);
    assert!(store.get_field(COMPANY, "identity.industry").await.unwrap().is_none());
    assert!(store.audit_log(COMPANY).await.unwrap().is_empty());
    assert!(!store.cooldown().is_in_cooldown(COMPANY));

    // Once the audit trail is back the same proposal is accepted and audited
    repair_audit_trail(&pool).await;
    let outcome = store
        .propose(COMPANY, proposal("identity.industry", json!("Retail"), "website_lab", "run1", 0.6))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProposalOutcome::Accepted {
            key: "identity.industry".to_string(),
            reason: DecisionReason::NoExisting,
            revision: 1,
        }
    );
    assert_eq!(store.audit_log(COMPANY).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_audit_insert_rolls_back_reviews() {
    let pool = init_memory_database().await.unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let store = store_over(SqliteRepository::new(pool.clone()), clock.clone());
    store
        .propose(COMPANY, proposal("brand.voice", json!("Playful"), "brand_lab", "run7", 0.6))
        .await
        .unwrap();

    break_audit_trail(&pool).await;
    clock.advance(Duration::minutes(5));

    let review = HumanReview::new("user", "u1").with_value(json!("Warm"));
    assert!(matches!(
        store.confirm(COMPANY, "brand.voice", &review).await,
        Err(EngineError::Store(_))
    ));
    assert!(matches!(
        store.reject(COMPANY, "brand.voice", &HumanReview::new("user", "u1")).await,
        Err(EngineError::Store(_))
    ));

    let field = store.get_field(COMPANY, "brand.voice").await.unwrap().unwrap();
    assert_eq!(field.status, FieldStatus::Proposed);
    assert_eq!(field.value, json!("Playful"));
    assert_eq!(field.revision, 1);
    assert!(field.alternatives.is_empty());
    assert_eq!(field.updated_at, start());

    repair_audit_trail(&pool).await;
    let outcomes: Vec<_> = store
        .audit_log(COMPANY)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.outcome)
        .collect();
    assert_eq!(outcomes, vec!["accepted"]);
}

#[tokio::test]
async fn test_rejection_round_trips() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = store_over(SqliteRepository::new(init_memory_database().await.unwrap()), clock.clone());

    store
        .propose(COMPANY, proposal("brand.voice", json!("Playful"), "brand_lab", "run7", 0.6))
        .await
        .unwrap();
    clock.advance(Duration::minutes(5));
    store.reject(COMPANY, "brand.voice", &HumanReview::new("qbr", "qbr-2024-q2")).await.unwrap();

    let field = store.get_field(COMPANY, "brand.voice").await.unwrap().unwrap();
    assert_eq!(field.status, FieldStatus::Rejected);
    assert_eq!(field.rejected_source_id.as_deref(), Some("run7"));
    assert_eq!(field.updated_at, start() + Duration::minutes(5));

    let outcome = store
        .propose(COMPANY, proposal("brand.voice", json!("Playful"), "brand_lab", "run7", 0.9))
        .await
        .unwrap();
    assert!(matches!(outcome, ProposalOutcome::Rejected { .. }));
}

#[tokio::test]
async fn test_score_history_persists() {
    let pool = init_memory_database().await.unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let tracker = QualityTracker::new(
        QualityScorer::default(),
        Arc::new(SqliteRepository::new(pool)),
        clock.clone(),
    );

    let anchored = json!({"findings": [
        {"id": "f1", "text": "Checkout button on /cart is below the fold", "pageUrl": "https://acme.test/cart"}
    ]});
    let unanchored = json!({"findings": [
        {"id": "f1", "text": "Checkout button on /cart is below the fold"}
    ]});

    let run1 = RunContext::new(COMPANY, "r1", start());
    let first = tracker.record_run(ProducerFamily::Website, &anchored, &run1).await.unwrap();
    assert!(matches!(first, ScoreOutcome::Scored(ref s) if s.score == 100));

    clock.advance(Duration::hours(1));
    let run2 = RunContext::new(COMPANY, "r2", start() + Duration::hours(1));
    let second = tracker.record_run(ProducerFamily::Website, &unanchored, &run2).await.unwrap();
    let ScoreOutcome::Scored(second) = second else {
        panic!("expected a score");
    };
    assert_eq!(second.score, 70);
    assert!(second.is_regression());

    let history = tracker.history("website_lab", COMPANY).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].run_id, "r2");
    assert_eq!(history[0].regression.as_ref().unwrap().previous_run_id, "r1");
    assert_eq!(history[1].computed_at, start());
}
