//! Candidate extraction
//!
//! A `CandidateExtractor` turns one producer run's raw payload into
//! `ProposalCandidate`s. Extractors own nothing beyond the candidates they
//! emit. A payload whose shape is not recognised yields an explicit
//! `UnknownShape` outcome with diagnostics rather than a guessed parse.

pub mod report;
pub mod shape;

pub use report::{
    AudienceReport, Finding, LabReport, PersonaJourney, ProducerFamily, RawProducerOutput,
    Recommendation, ReportedFact,
};
pub use shape::{resolve_shape, ShapeResolution, StrategyAttempt};

use crate::types::{JsonValue, ProposalCandidate, SourceTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Identity of one producer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub company_id: String,
    pub run_id: String,
    pub completed_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(company_id: impl Into<String>, run_id: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            company_id: company_id.into(),
            run_id: run_id.into(),
            completed_at,
        }
    }
}

/// Result of extracting candidates from one payload
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Candidates {
        candidates: Vec<ProposalCandidate>,
        /// Strategy that located the report
        strategy: &'static str,
    },
    /// Zero candidates: no strategy recognised the payload
    UnknownShape {
        top_level_keys: Vec<String>,
        attempts: Vec<StrategyAttempt>,
    },
}

impl ExtractionOutcome {
    pub fn candidates(&self) -> &[ProposalCandidate] {
        match self {
            Self::Candidates { candidates, .. } => candidates,
            Self::UnknownShape { .. } => &[],
        }
    }
}

/// Producer-specific adapter into proposal candidates
pub trait CandidateExtractor: Send + Sync {
    /// Source tag stamped on every emitted candidate
    fn lab_key(&self) -> &str;

    fn extract(&self, raw: &JsonValue, run: &RunContext) -> ExtractionOutcome;
}

/// Extractor for the lab report families
///
/// Each reported fact becomes one candidate sourced from the lab, with the
/// run id as `sourceId`. Facts are passed through as-is; structural
/// validation happens when the store receives them.
#[derive(Debug, Clone, Copy)]
pub struct ReportExtractor {
    family: ProducerFamily,
}

impl ReportExtractor {
    pub fn new(family: ProducerFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> ProducerFamily {
        self.family
    }

    /// Candidates from an already-normalised payload
    pub fn candidates_from(&self, output: &RawProducerOutput, run: &RunContext) -> Vec<ProposalCandidate> {
        let source = SourceTag::from(self.family.lab_key());

        output
            .report()
            .facts
            .iter()
            .map(|fact| ProposalCandidate {
                key: fact.key.clone(),
                value: fact.value.clone(),
                confidence: fact.confidence,
                evidence: fact.evidence.clone(),
                source: source.clone(),
                source_id: run.run_id.clone(),
                timestamp: run.completed_at,
            })
            .collect()
    }
}

impl CandidateExtractor for ReportExtractor {
    fn lab_key(&self) -> &str {
        self.family.lab_key()
    }

    fn extract(&self, raw: &JsonValue, run: &RunContext) -> ExtractionOutcome {
        match resolve_shape(self.family, raw) {
            ShapeResolution::Resolved { output, strategy } => {
                let candidates = self.candidates_from(&output, run);
                info!(
                    lab = self.lab_key(),
                    company_id = %run.company_id,
                    run_id = %run.run_id,
                    strategy,
                    count = candidates.len(),
                    "Extracted proposal candidates"
                );
                ExtractionOutcome::Candidates {
                    candidates,
                    strategy,
                }
            }
            ShapeResolution::Unrecognized {
                top_level_keys,
                attempts,
            } => ExtractionOutcome::UnknownShape {
                top_level_keys,
                attempts,
            },
        }
    }
}
