// Alternatives Manager
//
// Bounds the runner-up values of a field to MAX_ALTERNATIVES and keeps them
// ordered best-first. Ranking key, descending:
//   1. source priority (trust in the origin dominates)
//   2. confidence (missing confidence ranks below any known value)
//   3. recency (proposed_at)
//   4. sourceId, lexically ascending (deterministic final tie-break)
// On overflow the lowest-ranked alternative is evicted.

use crate::priority::SourcePriority;
use crate::types::{Alternative, ContextField, JsonValue, SourceTag, MAX_ALTERNATIVES};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Result of inserting an alternative
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// New entry, list within bounds
    Added,
    /// Same value + source already present; refreshed in place
    Refreshed,
    /// New entry pushed the list over the cap; the evicted entry is returned
    /// (may be the inserted alternative itself)
    Evicted(Alternative),
}

pub struct AlternativesManager {
    priority: Arc<SourcePriority>,
    max_alternatives: usize,
}

impl AlternativesManager {
    pub fn new(priority: Arc<SourcePriority>) -> Self {
        Self {
            priority,
            max_alternatives: MAX_ALTERNATIVES,
        }
    }

    pub fn max_alternatives(&self) -> usize {
        self.max_alternatives
    }

    /// Insert `alternative` into `field`, deduplicating by value + source
    pub fn insert(&self, field: &mut ContextField, alternative: Alternative) -> InsertOutcome {
        if let Some(existing) = field
            .alternatives
            .iter_mut()
            .find(|a| a.same_origin(&alternative.value, &alternative.source_lab))
        {
            refresh(existing, alternative);
            self.sort(field);
            return InsertOutcome::Refreshed;
        }

        field.alternatives.push(alternative);
        self.sort(field);

        if field.alternatives.len() > self.max_alternatives {
            // Sorted best-first: the last entry is the lowest ranked
            if let Some(evicted) = field.alternatives.pop() {
                debug!(
                    key = %field.key,
                    source = %evicted.source_lab,
                    source_id = %evicted.source_id,
                    "Evicted lowest-ranked alternative"
                );
                return InsertOutcome::Evicted(evicted);
            }
        }

        InsertOutcome::Added
    }

    /// Demote the field's current value into its alternatives
    ///
    /// Skipped when the same value + source is already retained.
    pub fn demote_current(&self, field: &mut ContextField) -> Option<InsertOutcome> {
        if self.contains(field, &field.value, &field.source) {
            return None;
        }
        let demoted = Alternative::from_field(field);
        Some(self.insert(field, demoted))
    }

    pub fn contains(&self, field: &ContextField, value: &JsonValue, source: &SourceTag) -> bool {
        field.alternatives.iter().any(|a| a.same_origin(value, source))
    }

    /// Drop alternatives matching value + source (used when one is adopted)
    pub fn remove_matching(&self, field: &mut ContextField, value: &JsonValue, source: &SourceTag) {
        field.alternatives.retain(|a| !a.same_origin(value, source));
    }

    /// Ordering used for retention; `Less` means `a` ranks higher than `b`
    pub fn rank_cmp(&self, domain: &str, a: &Alternative, b: &Alternative) -> Ordering {
        let priority_a = self.priority.priority_of(&a.source_lab, domain);
        let priority_b = self.priority.priority_of(&b.source_lab, domain);

        priority_b
            .cmp(&priority_a)
            .then_with(|| compare_confidence(b.confidence, a.confidence))
            .then_with(|| b.proposed_at.cmp(&a.proposed_at))
            .then_with(|| a.source_id.cmp(&b.source_id))
    }

    fn sort(&self, field: &mut ContextField) {
        let domain = field.domain.clone();
        field.alternatives.sort_by(|a, b| self.rank_cmp(&domain, a, b));
    }
}

/// `None` sorts below every known confidence
fn compare_confidence(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn refresh(existing: &mut Alternative, incoming: Alternative) {
    if compare_confidence(incoming.confidence, existing.confidence) == Ordering::Greater {
        existing.confidence = incoming.confidence;
    }
    if incoming.proposed_at > existing.proposed_at {
        existing.proposed_at = incoming.proposed_at;
        existing.source_id = incoming.source_id;
    }
    for evidence in incoming.evidence_refs {
        if !existing.evidence_refs.contains(&evidence) {
            existing.evidence_refs.push(evidence);
        }
    }
}
