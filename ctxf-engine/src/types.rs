// Shared types and data contracts
//
// ContextField is the only persisted record; ProposalCandidate is the
// ephemeral input every producer is normalised into; decisions and outcomes
// carry the reason codes recorded in the audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type JsonValue = serde_json::Value;

/// Maximum number of alternatives retained per field
pub const MAX_ALTERNATIVES: usize = 5;

// ============================================================================
// Fields
// ============================================================================

/// Review status of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Proposed,
    Confirmed,
    Rejected,
}

impl FieldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Producer identity (`user`, `manual`, `website_lab`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTag(String);

impl SourceTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A retained-but-not-adopted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alternative {
    pub value: JsonValue,
    pub confidence: Option<f64>,
    pub source_lab: SourceTag,
    pub source_id: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    pub proposed_at: DateTime<Utc>,
}

impl Alternative {
    pub fn from_candidate(candidate: &ProposalCandidate) -> Self {
        Self {
            value: candidate.value.clone(),
            confidence: candidate.confidence,
            source_lab: candidate.source.clone(),
            source_id: candidate.source_id.clone(),
            evidence_refs: candidate.evidence.clone(),
            proposed_at: candidate.timestamp,
        }
    }

    /// Snapshot of a field's current value, for demotion on replacement
    pub fn from_field(field: &ContextField) -> Self {
        Self {
            value: field.value.clone(),
            confidence: field.confidence,
            source_lab: field.source.clone(),
            source_id: field.source_id.clone(),
            evidence_refs: field.evidence.clone(),
            proposed_at: field.updated_at,
        }
    }

    /// Alternatives are identified by value + source
    pub fn same_origin(&self, value: &JsonValue, source: &SourceTag) -> bool {
        &self.value == value && &self.source_lab == source
    }
}

/// One fact slot about a company, identified by `domain.factName`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextField {
    pub key: String,
    pub domain: String,
    pub value: JsonValue,
    pub status: FieldStatus,
    pub source: SourceTag,
    pub source_id: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub rejected_source_id: Option<String>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; guards optimistic updates
    pub revision: u64,
}

impl ContextField {
    /// New `Proposed` field from an accepted candidate
    pub fn from_candidate(candidate: &ProposalCandidate) -> Self {
        Self {
            key: candidate.key.clone(),
            domain: domain_of(&candidate.key).to_string(),
            value: candidate.value.clone(),
            status: FieldStatus::Proposed,
            source: candidate.source.clone(),
            source_id: candidate.source_id.clone(),
            confidence: candidate.confidence,
            evidence: candidate.evidence.clone(),
            rejected_source_id: None,
            alternatives: Vec::new(),
            updated_at: candidate.timestamp,
            revision: 1,
        }
    }
}

/// Domain prefix of a dotted key (`identity.industry` → `identity`)
pub fn domain_of(key: &str) -> &str {
    key.split_once('.').map(|(domain, _)| domain).unwrap_or(key)
}

// ============================================================================
// Proposals
// ============================================================================

/// Ephemeral producer input, consumed by the arbiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalCandidate {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: JsonValue,
    /// `None` is maximally uncertain, never a default high value
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub source: SourceTag,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ProposalCandidate {
    pub fn new(
        key: impl Into<String>,
        value: JsonValue,
        source: impl Into<SourceTag>,
        source_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            confidence: None,
            evidence: Vec::new(),
            source: source.into(),
            source_id: source_id.into(),
            timestamp,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Confidence used for arbitration comparisons
    pub fn effective_confidence(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }

    /// Structural validation; malformed candidates are dropped, not merged
    pub fn validate(&self) -> Result<(), CandidateWarning> {
        let problem = if self.key.trim().is_empty() {
            Some("missing key".to_string())
        } else if !self.key.contains('.') || self.key.starts_with('.') || self.key.ends_with('.') {
            Some(format!("key '{}' is not of the form domain.factName", self.key))
        } else if self.value.is_null() {
            Some("missing value".to_string())
        } else if self.source.as_str().trim().is_empty() {
            Some("missing source".to_string())
        } else if self.source_id.trim().is_empty() {
            Some("missing sourceId".to_string())
        } else {
            match self.confidence {
                Some(c) if !(0.0..=1.0).contains(&c) => {
                    Some(format!("confidence {} outside [0, 1]", c))
                }
                _ => None,
            }
        };

        match problem {
            Some(message) => Err(CandidateWarning {
                key: (!self.key.trim().is_empty()).then(|| self.key.clone()),
                source: self.source.clone(),
                source_id: self.source_id.clone(),
                message,
            }),
            None => Ok(()),
        }
    }
}

impl From<String> for SourceTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// Record of a candidate dropped before arbitration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateWarning {
    pub key: Option<String>,
    pub source: SourceTag,
    pub source_id: String,
    pub message: String,
}

// ============================================================================
// Decisions and outcomes
// ============================================================================

/// Arbiter verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    AcceptAsAlternative,
    Reject,
}

/// Reason code attached to every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoExisting,
    ExistingConfirmed,
    ExistingRejectedSameSource,
    ExistingRejectedDifferentSource,
    HigherConfidence,
    LowConfidence,
    SamePriorityNewer,
    LowerOrEqualConfidence,
    /// Would-be alternative repeats the field's current value and source
    DuplicateOfCurrent,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoExisting => "no_existing",
            Self::ExistingConfirmed => "existing_confirmed",
            Self::ExistingRejectedSameSource => "existing_rejected_same_source",
            Self::ExistingRejectedDifferentSource => "existing_rejected_different_source",
            Self::HigherConfidence => "higher_confidence",
            Self::LowConfidence => "low_confidence",
            Self::SamePriorityNewer => "same_priority_newer",
            Self::LowerOrEqualConfidence => "lower_or_equal_confidence",
            Self::DuplicateOfCurrent => "duplicate_of_current",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of `MergeArbiter::can_propose`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterDecision {
    pub decision: Decision,
    pub reason: DecisionReason,
}

impl ArbiterDecision {
    pub fn accept(reason: DecisionReason) -> Self {
        Self { decision: Decision::Accept, reason }
    }

    pub fn alternative(reason: DecisionReason) -> Self {
        Self { decision: Decision::AcceptAsAlternative, reason }
    }

    pub fn reject(reason: DecisionReason) -> Self {
        Self { decision: Decision::Reject, reason }
    }
}

/// Result of one `propose` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProposalOutcome {
    Accepted {
        key: String,
        reason: DecisionReason,
        revision: u64,
    },
    AddedAsAlternative {
        key: String,
        reason: DecisionReason,
    },
    Rejected {
        key: String,
        reason: DecisionReason,
    },
    /// Company is throttled; back off for `remaining_seconds`
    CooldownActive {
        remaining_seconds: u64,
    },
    /// Malformed candidate, skipped
    Dropped {
        warning: CandidateWarning,
    },
    /// Lost the optimistic write twice; nothing was written
    ConcurrentModification {
        key: String,
    },
}

impl ProposalOutcome {
    pub fn from_decision(key: &str, decision: ArbiterDecision, revision: u64) -> Self {
        let key = key.to_string();
        match decision.decision {
            Decision::Accept => Self::Accepted {
                key,
                reason: decision.reason,
                revision,
            },
            Decision::AcceptAsAlternative => Self::AddedAsAlternative {
                key,
                reason: decision.reason,
            },
            Decision::Reject => Self::Rejected {
                key,
                reason: decision.reason,
            },
        }
    }

    /// Short label used in audit records and events
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::AddedAsAlternative { .. } => "added_as_alternative",
            Self::Rejected { .. } => "rejected",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::Dropped { .. } => "dropped",
            Self::ConcurrentModification { .. } => "concurrent_modification",
        }
    }
}

// ============================================================================
// Audit
// ============================================================================

/// One entry of the per-company mutation audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub company_id: String,
    pub key: String,
    pub source: SourceTag,
    pub source_id: String,
    /// `accepted`, `added_as_alternative`, `rejected`, `confirmed`, ...
    pub outcome: String,
    pub reason: String,
    pub value: Option<JsonValue>,
    pub confidence: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Human review action (confirm / reject)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanReview {
    pub reviewer: SourceTag,
    pub review_id: String,
    /// Replacement value on confirm; `None` confirms the current value
    #[serde(default)]
    pub value: Option<JsonValue>,
}

impl HumanReview {
    pub fn new(reviewer: impl Into<SourceTag>, review_id: impl Into<String>) -> Self {
        Self {
            reviewer: reviewer.into(),
            review_id: review_id.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = Some(value);
        self
    }
}
