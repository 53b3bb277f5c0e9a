//! Field store
//!
//! The aggregate that owns a company's context fields. `propose` and
//! `propose_batch` are the only automated mutation paths; `confirm` and
//! `reject` are the human review paths. A field mutation and its audit
//! record are committed together, so a failed audit append leaves the field
//! untouched.
//!
//! Writes are optimistic: the field is read, arbitrated and written back
//! only if its revision is unchanged. A conflict re-runs the decision once
//! against a fresh read; a second conflict gives up without writing.

pub mod memory;
pub mod repository;
pub mod sqlite;
pub mod views;

pub use memory::MemoryRepository;
pub use repository::{FieldRepository, FieldWrite, ScoreHistory, WriteOutcome};
pub use sqlite::SqliteRepository;
pub use views::{ConfirmedField, ConfirmedSnapshot, ReadinessReport};

use crate::alternatives::AlternativesManager;
use crate::arbiter::MergeArbiter;
use crate::cooldown::CooldownThrottle;
use crate::error::{EngineError, EngineResult};
use crate::priority::{is_human, SourcePriority};
use crate::types::{
    Alternative, ArbiterDecision, AuditRecord, CandidateWarning, ContextField, Decision, DecisionReason,
    FieldStatus, HumanReview, ProposalCandidate, ProposalOutcome,
};
use ctxf_common::config::EngineConfig;
use ctxf_common::events::{EngineEvent, EventBus};
use ctxf_common::{Clock, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optimistic write attempts per candidate (first try plus one retry)
const CAS_ATTEMPTS: u32 = 2;

/// Per-batch result of `propose_batch`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub company_id: String,
    /// One outcome per well-formed candidate, in input order
    pub outcomes: Vec<ProposalOutcome>,
    pub dropped: Vec<CandidateWarning>,
    /// Set when the batch was refused; nothing was applied
    pub cooldown_remaining: Option<u64>,
    /// Cooldown started by this batch, in seconds
    pub cooldown_applied: Option<u64>,
}

impl BatchReport {
    fn new(company_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            outcomes: Vec::new(),
            dropped: Vec::new(),
            cooldown_remaining: None,
            cooldown_applied: None,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.cooldown_remaining.is_some()
    }

    pub fn accepted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ProposalOutcome::Accepted { .. }))
            .count()
    }
}

pub struct FieldStore {
    repo: Arc<dyn FieldRepository>,
    cooldown: Arc<CooldownThrottle>,
    arbiter: MergeArbiter,
    alternatives: AlternativesManager,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    required_keys: Vec<String>,
    batch_cooldown_secs: u64,
}

impl FieldStore {
    pub fn new(
        repo: Arc<dyn FieldRepository>,
        cooldown: Arc<CooldownThrottle>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let priority = Arc::new(SourcePriority::from_config(&config.priority));
        Self {
            repo,
            cooldown,
            arbiter: MergeArbiter::new(),
            alternatives: AlternativesManager::new(priority),
            clock,
            events: None,
            required_keys: config.readiness.required_keys.clone(),
            batch_cooldown_secs: config.cooldown.default_seconds,
        }
    }

    /// Store backed by process memory and the system clock
    pub fn in_memory(config: &EngineConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cooldown = Arc::new(CooldownThrottle::in_memory(clock.clone()));
        Self::new(Arc::new(MemoryRepository::new()), cooldown, config, clock)
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cooldown(&self) -> &CooldownThrottle {
        &self.cooldown
    }

    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    // ------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------

    /// Arbitrate and commit one candidate
    ///
    /// Malformed candidates and active cooldowns are outcomes, not errors.
    /// Human sources are never throttled.
    pub async fn propose(
        &self,
        company_id: &str,
        candidate: ProposalCandidate,
    ) -> EngineResult<ProposalOutcome> {
        if let Err(warning) = candidate.validate() {
            warn!(company_id, source = %warning.source, "Dropped malformed candidate: {}", warning.message);
            return Ok(ProposalOutcome::Dropped { warning });
        }

        if !is_human(&candidate.source) {
            if let Some(remaining) = self.cooldown.get_cooldown_remaining(company_id) {
                debug!(company_id, remaining, "Proposal refused during cooldown");
                return Ok(ProposalOutcome::CooldownActive {
                    remaining_seconds: remaining,
                });
            }
        }

        self.commit_candidate(company_id, &candidate).await
    }

    /// Apply a producer batch under the company cooldown
    ///
    /// The cooldown is checked and started atomically before any field is
    /// touched; a throttled batch applies nothing. A batch made only of
    /// human candidates neither checks nor starts a cooldown. A store failure
    /// aborts the batch and releases the cooldown it started.
    pub async fn propose_batch(
        &self,
        company_id: &str,
        candidates: Vec<ProposalCandidate>,
    ) -> EngineResult<BatchReport> {
        let mut report = BatchReport::new(company_id);
        let mut valid = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match candidate.validate() {
                Ok(()) => valid.push(candidate),
                Err(warning) => {
                    warn!(company_id, source = %warning.source, "Dropped malformed candidate: {}", warning.message);
                    report.dropped.push(warning);
                }
            }
        }

        if valid.is_empty() {
            return Ok(report);
        }

        let grant = if valid.iter().any(|c| !is_human(&c.source)) {
            match self.cooldown.try_begin(company_id, self.batch_cooldown_secs) {
                Ok(grant) => Some(grant),
                Err(remaining) => {
                    info!(company_id, remaining, candidates = valid.len(), "Proposal batch refused during cooldown");
                    report.cooldown_remaining = Some(remaining);
                    return Ok(report);
                }
            }
        } else {
            None
        };

        for candidate in &valid {
            match self.commit_candidate(company_id, candidate).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    if let Some(grant) = grant {
                        self.cooldown.release(company_id, grant);
                    }
                    return Err(e);
                }
            }
        }

        if let Some(grant) = grant {
            report.cooldown_applied = Some(grant.seconds);
            self.emit(EngineEvent::CooldownEngaged {
                company_id: company_id.to_string(),
                seconds: grant.seconds,
                timestamp: self.clock.now(),
            });
        }

        info!(
            company_id,
            applied = report.outcomes.len(),
            accepted = report.accepted_count(),
            dropped = report.dropped.len(),
            "Applied proposal batch"
        );
        Ok(report)
    }

    async fn commit_candidate(
        &self,
        company_id: &str,
        candidate: &ProposalCandidate,
    ) -> EngineResult<ProposalOutcome> {
        for attempt in 1..=CAS_ATTEMPTS {
            let existing = self.repo.load_field(company_id, &candidate.key).await?;
            let decision = self.arbiter.can_propose(existing.as_ref(), candidate);
            let decision = skip_duplicate_alternative(existing.as_ref(), candidate, decision);

            let (write, revision) = self.plan_write(existing, decision, candidate);
            let outcome = ProposalOutcome::from_decision(&candidate.key, decision, revision);
            let record = self.proposal_record(company_id, candidate, &outcome, decision.reason.as_str());

            match write {
                None => self.repo.append_audit(&record).await?,
                Some(write) => {
                    if self.repo.commit(company_id, &write, &record).await? == WriteOutcome::Conflict {
                        debug!(company_id, key = %candidate.key, attempt, "Field changed during proposal, re-reading");
                        continue;
                    }
                }
            }
            self.emit_proposal(record);

            if let ProposalOutcome::Accepted { revision, .. } = &outcome {
                info!(
                    company_id,
                    key = %candidate.key,
                    source = %candidate.source,
                    reason = %decision.reason,
                    revision,
                    "Accepted proposal"
                );
            }
            return Ok(outcome);
        }

        warn!(company_id, key = %candidate.key, source = %candidate.source, "Proposal lost concurrent writes twice, skipped");
        let outcome = ProposalOutcome::ConcurrentModification {
            key: candidate.key.clone(),
        };
        let record = self.proposal_record(company_id, candidate, &outcome, "retry_exhausted");
        self.repo.append_audit(&record).await?;
        self.emit_proposal(record);
        Ok(outcome)
    }

    /// Turn a decision into the write it implies; the revision is the
    /// field's revision after the write
    fn plan_write(
        &self,
        existing: Option<ContextField>,
        decision: ArbiterDecision,
        candidate: &ProposalCandidate,
    ) -> (Option<FieldWrite>, u64) {
        match (decision.decision, existing) {
            (Decision::Accept, None) => {
                let field = ContextField::from_candidate(candidate);
                let revision = field.revision;
                (Some(FieldWrite::Insert(field)), revision)
            }
            (Decision::Accept, Some(mut field)) => {
                let expected = field.revision;
                // A rejected value is not worth retaining as a runner-up
                if field.status == FieldStatus::Proposed {
                    self.alternatives.demote_current(&mut field);
                }
                self.alternatives
                    .remove_matching(&mut field, &candidate.value, &candidate.source);

                field.value = candidate.value.clone();
                field.status = FieldStatus::Proposed;
                field.source = candidate.source.clone();
                field.source_id = candidate.source_id.clone();
                field.confidence = candidate.confidence;
                field.evidence = candidate.evidence.clone();
                field.updated_at = candidate.timestamp;
                field.revision = expected + 1;

                let revision = field.revision;
                (Some(FieldWrite::Update { field, expected }), revision)
            }
            (Decision::AcceptAsAlternative, Some(mut field)) => {
                let expected = field.revision;
                self.alternatives
                    .insert(&mut field, Alternative::from_candidate(candidate));
                field.revision = expected + 1;

                let revision = field.revision;
                (Some(FieldWrite::Update { field, expected }), revision)
            }
            (Decision::Reject, existing) | (Decision::AcceptAsAlternative, existing @ None) => {
                (None, existing.map(|f| f.revision).unwrap_or(0))
            }
        }
    }

    fn proposal_record(
        &self,
        company_id: &str,
        candidate: &ProposalCandidate,
        outcome: &ProposalOutcome,
        reason: &str,
    ) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            company_id: company_id.to_string(),
            key: candidate.key.clone(),
            source: candidate.source.clone(),
            source_id: candidate.source_id.clone(),
            outcome: outcome.label().to_string(),
            reason: reason.to_string(),
            value: Some(candidate.value.clone()),
            confidence: candidate.confidence,
            recorded_at: self.clock.now(),
        }
    }

    fn emit_proposal(&self, record: AuditRecord) {
        self.emit(EngineEvent::ProposalRecorded {
            company_id: record.company_id,
            key: record.key,
            source: record.source.to_string(),
            source_id: record.source_id,
            outcome: record.outcome,
            reason: record.reason,
            timestamp: record.recorded_at,
        });
    }

    // ------------------------------------------------------------------
    // Human review
    // ------------------------------------------------------------------

    /// Mark a field `Confirmed`, optionally replacing its value
    ///
    /// A replacement value demotes the current one into the alternatives.
    /// Confirming a key that has no field yet requires a value and creates
    /// the field directly.
    pub async fn confirm(
        &self,
        company_id: &str,
        key: &str,
        review: &HumanReview,
    ) -> EngineResult<ContextField> {
        ensure_human(review)?;
        let replacement = review.value.as_ref().filter(|v| !v.is_null());

        for attempt in 1..=CAS_ATTEMPTS {
            let now = self.clock.now();
            let existing = self.repo.load_field(company_id, key).await?;

            let write = match existing {
                None => {
                    let Some(value) = replacement else {
                        return Err(EngineError::FieldNotFound {
                            company_id: company_id.to_string(),
                            key: key.to_string(),
                        });
                    };
                    let candidate = ProposalCandidate::new(
                        key,
                        value.clone(),
                        review.reviewer.clone(),
                        review.review_id.clone(),
                        now,
                    )
                    .with_confidence(1.0);
                    let mut field = ContextField::from_candidate(&candidate);
                    field.status = FieldStatus::Confirmed;
                    FieldWrite::Insert(field)
                }
                Some(mut field) => {
                    let expected = field.revision;
                    if let Some(value) = replacement.filter(|v| **v != field.value) {
                        if field.status != FieldStatus::Rejected {
                            self.alternatives.demote_current(&mut field);
                        }
                        self.alternatives
                            .remove_matching(&mut field, value, &review.reviewer);
                        field.value = value.clone();
                        field.source = review.reviewer.clone();
                        field.source_id = review.review_id.clone();
                        field.confidence = Some(1.0);
                        field.evidence.clear();
                    }
                    field.status = FieldStatus::Confirmed;
                    field.updated_at = now;
                    field.revision = expected + 1;
                    FieldWrite::Update { field, expected }
                }
            };

            let record = review_record(company_id, write.field(), review, "confirmed");
            if self.repo.commit(company_id, &write, &record).await? == WriteOutcome::Conflict {
                debug!(company_id, key, attempt, "Field changed during confirm, re-reading");
                continue;
            }
            self.emit(EngineEvent::FieldConfirmed {
                company_id: company_id.to_string(),
                key: key.to_string(),
                reviewer: review.reviewer.to_string(),
                timestamp: now,
            });
            info!(company_id, key, reviewer = %review.reviewer, "Field confirmed");
            return Ok(write.into_field());
        }

        Err(EngineError::ConcurrentModification {
            company_id: company_id.to_string(),
            key: key.to_string(),
        })
    }

    /// Mark a field `Rejected`, remembering which run produced the value
    pub async fn reject(
        &self,
        company_id: &str,
        key: &str,
        review: &HumanReview,
    ) -> EngineResult<ContextField> {
        ensure_human(review)?;

        for attempt in 1..=CAS_ATTEMPTS {
            let now = self.clock.now();
            let Some(mut field) = self.repo.load_field(company_id, key).await? else {
                return Err(EngineError::FieldNotFound {
                    company_id: company_id.to_string(),
                    key: key.to_string(),
                });
            };

            let expected = field.revision;
            field.status = FieldStatus::Rejected;
            field.rejected_source_id = Some(field.source_id.clone());
            field.updated_at = now;
            field.revision = expected + 1;

            let record = review_record(company_id, &field, review, "rejected_by_review");
            let write = FieldWrite::Update { field, expected };
            if self.repo.commit(company_id, &write, &record).await? == WriteOutcome::Conflict {
                debug!(company_id, key, attempt, "Field changed during reject, re-reading");
                continue;
            }

            let field = write.into_field();
            self.emit(EngineEvent::FieldRejected {
                company_id: company_id.to_string(),
                key: key.to_string(),
                reviewer: review.reviewer.to_string(),
                rejected_source_id: field.source_id.clone(),
                timestamp: now,
            });
            info!(company_id, key, reviewer = %review.reviewer, rejected_source_id = %field.source_id, "Field rejected");
            return Ok(field);
        }

        Err(EngineError::ConcurrentModification {
            company_id: company_id.to_string(),
            key: key.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Every field for the company, all statuses, ordered by key
    pub async fn fields(&self, company_id: &str) -> EngineResult<Vec<ContextField>> {
        self.repo.load_fields(company_id).await
    }

    pub async fn get_field(&self, company_id: &str, key: &str) -> EngineResult<Option<ContextField>> {
        self.repo.load_field(company_id, key).await
    }

    pub async fn confirmed_snapshot(&self, company_id: &str) -> EngineResult<ConfirmedSnapshot> {
        let fields = self.repo.load_fields(company_id).await?;
        Ok(ConfirmedSnapshot::build(company_id, &fields, self.clock.now()))
    }

    pub async fn readiness(&self, company_id: &str) -> EngineResult<ReadinessReport> {
        let fields = self.repo.load_fields(company_id).await?;
        Ok(ReadinessReport::compute(company_id, &fields, &self.required_keys))
    }

    /// Audit trail, oldest first
    pub async fn audit_log(&self, company_id: &str) -> EngineResult<Vec<AuditRecord>> {
        self.repo.audit_log(company_id).await
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }
}

/// An alternative that repeats the current value and source adds nothing;
/// it is refused instead of taking an alternatives slot
fn skip_duplicate_alternative(
    existing: Option<&ContextField>,
    candidate: &ProposalCandidate,
    decision: ArbiterDecision,
) -> ArbiterDecision {
    match existing {
        Some(field)
            if decision.decision == Decision::AcceptAsAlternative
                && field.value == candidate.value
                && field.source == candidate.source =>
        {
            ArbiterDecision::reject(DecisionReason::DuplicateOfCurrent)
        }
        _ => decision,
    }
}

fn review_record(company_id: &str, field: &ContextField, review: &HumanReview, outcome: &str) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        company_id: company_id.to_string(),
        key: field.key.clone(),
        source: review.reviewer.clone(),
        source_id: review.review_id.clone(),
        outcome: outcome.to_string(),
        reason: "human_review".to_string(),
        value: Some(field.value.clone()),
        confidence: field.confidence,
        recorded_at: field.updated_at,
    }
}

fn ensure_human(review: &HumanReview) -> EngineResult<()> {
    if is_human(&review.reviewer) {
        Ok(())
    } else {
        Err(EngineError::NotHumanSource(review.reviewer.to_string()))
    }
}
