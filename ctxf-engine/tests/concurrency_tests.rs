//! Optimistic write and failure propagation tests
//!
//! Wraps the in-memory repository to inject concurrent writers and outages
//! between the store's read and its conditional commit.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ctxf_common::config::EngineConfig;
use ctxf_common::ManualClock;
use ctxf_engine::cooldown::CooldownThrottle;
use ctxf_engine::store::{FieldRepository, FieldWrite, MemoryRepository, WriteOutcome};
use ctxf_engine::types::{AuditRecord, DecisionReason, HumanReview};
use ctxf_engine::{ContextField, EngineError, EngineResult, FieldStore, ProposalCandidate, ProposalOutcome};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const COMPANY: &str = "acme";
const KEY: &str = "identity.industry";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn store_over(repo: Arc<dyn FieldRepository>) -> FieldStore {
    let clock = Arc::new(ManualClock::new(start()));
    FieldStore::new(
        repo,
        Arc::new(CooldownThrottle::in_memory(clock.clone())),
        &EngineConfig::default(),
        clock,
    )
}

fn proposal(value: &str, source: &str, source_id: &str, confidence: f64) -> ProposalCandidate {
    ProposalCandidate::new(KEY, json!(value), source, source_id, start()).with_confidence(confidence)
}

fn offline() -> EngineError {
    EngineError::Store(ctxf_common::Error::Internal("store offline".to_string()))
}

/// Lets another writer win the next `races` updates
struct RacingRepository {
    inner: MemoryRepository,
    races: AtomicU32,
}

impl RacingRepository {
    fn new(races: u32) -> Self {
        Self {
            inner: MemoryRepository::new(),
            races: AtomicU32::new(races),
        }
    }

    async fn interloper_write(&self, company_id: &str, key: &str) -> EngineResult<()> {
        if let Some(mut current) = self.inner.load_field(company_id, key).await? {
            let expected = current.revision;
            current.value = json!("Interloper");
            current.source = "seo_lab".into();
            current.source_id = format!("interloper-{}", expected);
            current.confidence = Some(0.95);
            current.revision = expected + 1;

            let audit = AuditRecord {
                id: Uuid::new_v4(),
                company_id: company_id.to_string(),
                key: key.to_string(),
                source: current.source.clone(),
                source_id: current.source_id.clone(),
                outcome: "accepted".to_string(),
                reason: "higher_confidence".to_string(),
                value: Some(current.value.clone()),
                confidence: current.confidence,
                recorded_at: current.updated_at,
            };
            let write = FieldWrite::Update {
                field: current,
                expected,
            };
            self.inner.commit(company_id, &write, &audit).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FieldRepository for RacingRepository {
    async fn load_field(&self, company_id: &str, key: &str) -> EngineResult<Option<ContextField>> {
        self.inner.load_field(company_id, key).await
    }

    async fn load_fields(&self, company_id: &str) -> EngineResult<Vec<ContextField>> {
        self.inner.load_fields(company_id).await
    }

    async fn commit(
        &self,
        company_id: &str,
        write: &FieldWrite,
        audit: &AuditRecord,
    ) -> EngineResult<WriteOutcome> {
        if let FieldWrite::Update { field, .. } = write {
            let race = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if race {
                self.interloper_write(company_id, &field.key).await?;
            }
        }
        self.inner.commit(company_id, write, audit).await
    }

    async fn append_audit(&self, record: &AuditRecord) -> EngineResult<()> {
        self.inner.append_audit(record).await
    }

    async fn audit_log(&self, company_id: &str) -> EngineResult<Vec<AuditRecord>> {
        self.inner.audit_log(company_id).await
    }
}

/// Fails every call once `offline` is set; with `audit_offline` only audit
/// writes fail, and a failed commit stores nothing
#[derive(Default)]
struct FlakyRepository {
    inner: MemoryRepository,
    offline: AtomicBool,
    audit_offline: AtomicBool,
}

impl FlakyRepository {
    fn check(&self) -> EngineResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(offline())
        } else {
            Ok(())
        }
    }

    fn check_audit(&self) -> EngineResult<()> {
        self.check()?;
        if self.audit_offline.load(Ordering::SeqCst) {
            Err(offline())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FieldRepository for FlakyRepository {
    async fn load_field(&self, company_id: &str, key: &str) -> EngineResult<Option<ContextField>> {
        self.check()?;
        self.inner.load_field(company_id, key).await
    }

    async fn load_fields(&self, company_id: &str) -> EngineResult<Vec<ContextField>> {
        self.check()?;
        self.inner.load_fields(company_id).await
    }

    async fn commit(
        &self,
        company_id: &str,
        write: &FieldWrite,
        audit: &AuditRecord,
    ) -> EngineResult<WriteOutcome> {
        self.check_audit()?;
        self.inner.commit(company_id, write, audit).await
    }

    async fn append_audit(&self, record: &AuditRecord) -> EngineResult<()> {
        self.check_audit()?;
        self.inner.append_audit(record).await
    }

    async fn audit_log(&self, company_id: &str) -> EngineResult<Vec<AuditRecord>> {
        self.check()?;
        self.inner.audit_log(company_id).await
    }
}

#[tokio::test]
async fn test_lost_write_is_rearbitrated_against_fresh_state() {
    let repo = Arc::new(RacingRepository::new(1));
    let store = store_over(repo.clone());

    // Given: an existing proposed field at 0.6
    store.propose(COMPANY, proposal("Retail", "website_lab", "run1", 0.6)).await.unwrap();

    // When: a 0.8 proposal loses its write to a 0.95 writer
    let outcome = store
        .propose(COMPANY, proposal("E-commerce", "brand_lab", "run2", 0.8))
        .await
        .unwrap();

    // Then: the retry sees the 0.95 value and keeps 0.8 as an alternative
    assert_eq!(
        outcome,
        ProposalOutcome::AddedAsAlternative { key: KEY.to_string(), reason: DecisionReason::LowConfidence }
    );
    let field = store.get_field(COMPANY, KEY).await.unwrap().unwrap();
    assert_eq!(field.value, json!("Interloper"));
    assert!(field.alternatives.iter().any(|a| a.value == json!("E-commerce")));
    assert_eq!(field.revision, 3);
}

#[tokio::test]
async fn test_second_lost_write_gives_up_without_writing() {
    let repo = Arc::new(RacingRepository::new(2));
    let store = store_over(repo.clone());
    store.propose(COMPANY, proposal("Retail", "website_lab", "run1", 0.6)).await.unwrap();

    // 0.99 beats the interloper's 0.95 on both attempts, and loses both writes
    let outcome = store
        .propose(COMPANY, proposal("E-commerce", "brand_lab", "run2", 0.99))
        .await
        .unwrap();

    assert_eq!(outcome, ProposalOutcome::ConcurrentModification { key: KEY.to_string() });
    let field = store.get_field(COMPANY, KEY).await.unwrap().unwrap();
    assert_eq!(field.value, json!("Interloper"));
    assert!(field.alternatives.iter().all(|a| a.value != json!("E-commerce")));

    let audit = store.audit_log(COMPANY).await.unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.outcome, "concurrent_modification");
    assert_eq!(last.reason, "retry_exhausted");
}

#[tokio::test]
async fn test_review_loses_twice_is_an_error() {
    let repo = Arc::new(RacingRepository::new(0));
    let store = store_over(repo.clone());
    store.propose(COMPANY, proposal("Retail", "website_lab", "run1", 0.6)).await.unwrap();

    repo.races.store(2, Ordering::SeqCst);
    let result = store.confirm(COMPANY, KEY, &HumanReview::new("user", "u1")).await;

    assert!(
        matches!(result, Err(EngineError::ConcurrentModification { ref key, .. }) if key == KEY),
        "got {:?}",
        result
    );
}

#[tokio::test]
async fn test_store_outage_fails_batch_and_releases_cooldown() {
    let repo = Arc::new(FlakyRepository::default());
    let store = store_over(repo.clone());

    repo.offline.store(true, Ordering::SeqCst);
    let result = store
        .propose_batch(COMPANY, vec![proposal("Retail", "website_lab", "run1", 0.6)])
        .await;

    assert!(matches!(result, Err(EngineError::Store(_))), "got {:?}", result);
    assert!(!store.cooldown().is_in_cooldown(COMPANY));

    // Once the store is back the same batch goes through
    repo.offline.store(false, Ordering::SeqCst);
    let report = store
        .propose_batch(COMPANY, vec![proposal("Retail", "website_lab", "run1", 0.6)])
        .await
        .unwrap();
    assert_eq!(report.accepted_count(), 1);
    assert!(store.cooldown().is_in_cooldown(COMPANY));
}

#[tokio::test]
async fn test_store_outage_surfaces_on_reads_and_reviews() {
    let repo = Arc::new(FlakyRepository::default());
    let store = store_over(repo.clone());
    repo.offline.store(true, Ordering::SeqCst);

    assert!(matches!(store.readiness(COMPANY).await, Err(EngineError::Store(_))));
    assert!(matches!(store.confirmed_snapshot(COMPANY).await, Err(EngineError::Store(_))));
    assert!(matches!(
        store.reject(COMPANY, KEY, &HumanReview::new("user", "u1")).await,
        Err(EngineError::Store(_))
    ));
    assert!(matches!(
        store.propose(COMPANY, proposal("Retail", "website_lab", "run1", 0.6)).await,
        Err(EngineError::Store(_))
    ));
}

#[tokio::test]
async fn test_audit_outage_leaves_fields_and_cooldown_untouched() {
    let repo = Arc::new(FlakyRepository::default());
    let store = store_over(repo.clone());
    store.propose(COMPANY, proposal("Retail", "website_lab", "run1", 0.6)).await.unwrap();

    // Given: field reads work but the audit trail cannot be written
    repo.audit_offline.store(true, Ordering::SeqCst);

    // When: a winning batch, a losing proposal and a review are attempted
    let batch = store
        .propose_batch(COMPANY, vec![proposal("E-commerce", "brand_lab", "run2", 0.9)])
        .await;
    let losing = store.propose(COMPANY, proposal("Wholesale", "brand_lab", "run3", 0.6)).await;
    let review = store.confirm(COMPANY, KEY, &HumanReview::new("user", "u1")).await;

    // Then: every call fails and the field is exactly as before
    assert!(matches!(batch, Err(EngineError::Store(_))), "got {:?}", batch);
    assert!(matches!(losing, Err(EngineError::Store(_))), "got {:?}", losing);
    assert!(matches!(review, Err(EngineError::Store(_))), "got {:?}", review);
    assert!(!store.cooldown().is_in_cooldown(COMPANY));

    let field = store.get_field(COMPANY, KEY).await.unwrap().unwrap();
    assert_eq!(field.value, json!("Retail"));
    assert_eq!(field.revision, 1);
    assert!(field.alternatives.is_empty());

    repo.audit_offline.store(false, Ordering::SeqCst);
    let audit = store.audit_log(COMPANY).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].reason, "no_existing");
}

#[tokio::test]
async fn test_parallel_first_proposals_create_one_field() {
    let store = Arc::new(store_over(Arc::new(MemoryRepository::new())));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .propose(COMPANY, proposal(&format!("v{}", i), "website_lab", &format!("run{}", i), 0.5))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(!matches!(outcome, ProposalOutcome::Dropped { .. }));
    }

    let fields = store.fields(COMPANY).await.unwrap();
    assert_eq!(fields.len(), 1);
    let audit = store.audit_log(COMPANY).await.unwrap();
    assert_eq!(audit.len(), 8);
}
