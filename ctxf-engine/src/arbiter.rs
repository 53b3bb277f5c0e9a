// Merge Arbiter
//
// Decides what happens to an incoming proposal given the field's current
// state. The table is evaluated top to bottom, first match wins:
//
//   1. no existing field                          → accept        no_existing
//   2. existing confirmed                         → reject        existing_confirmed
//   3. existing rejected, same sourceId           → reject        existing_rejected_same_source
//   4. existing rejected, different sourceId      → accept        existing_rejected_different_source
//   5. proposed, incoming confidence higher       → accept        higher_confidence
//   6. proposed, incoming confidence lower        → alternative   low_confidence
//   7. proposed, equal confidence, incoming newer → alternative   same_priority_newer
//      proposed, equal confidence, otherwise      → reject        lower_or_equal_confidence

use crate::types::{ArbiterDecision, ContextField, DecisionReason, FieldStatus, ProposalCandidate};
use std::cmp::Ordering;
use tracing::debug;

/// Stateless decision function over `(existing, incoming)`
///
/// Reads no clock and no shared state: the same inputs always produce the
/// same decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeArbiter;

impl MergeArbiter {
    pub fn new() -> Self {
        Self
    }

    /// Apply the decision table
    pub fn can_propose(
        &self,
        existing: Option<&ContextField>,
        incoming: &ProposalCandidate,
    ) -> ArbiterDecision {
        let decision = decide(existing, incoming);

        debug!(
            key = %incoming.key,
            source = %incoming.source,
            source_id = %incoming.source_id,
            decision = ?decision.decision,
            reason = %decision.reason,
            "Arbitrated proposal"
        );

        decision
    }
}

fn decide(existing: Option<&ContextField>, incoming: &ProposalCandidate) -> ArbiterDecision {
    let Some(existing) = existing else {
        return ArbiterDecision::accept(DecisionReason::NoExisting);
    };

    match existing.status {
        FieldStatus::Confirmed => ArbiterDecision::reject(DecisionReason::ExistingConfirmed),

        FieldStatus::Rejected => {
            if existing.rejected_source_id.as_deref() == Some(incoming.source_id.as_str()) {
                ArbiterDecision::reject(DecisionReason::ExistingRejectedSameSource)
            } else {
                ArbiterDecision::accept(DecisionReason::ExistingRejectedDifferentSource)
            }
        }

        FieldStatus::Proposed => {
            let incoming_confidence = incoming.effective_confidence();
            let existing_confidence = existing.confidence.unwrap_or(0.0);

            match incoming_confidence.total_cmp(&existing_confidence) {
                Ordering::Greater => ArbiterDecision::accept(DecisionReason::HigherConfidence),
                Ordering::Less => ArbiterDecision::alternative(DecisionReason::LowConfidence),
                Ordering::Equal if incoming.timestamp > existing.updated_at => {
                    ArbiterDecision::alternative(DecisionReason::SamePriorityNewer)
                }
                Ordering::Equal => ArbiterDecision::reject(DecisionReason::LowerOrEqualConfidence),
            }
        }
    }
}
