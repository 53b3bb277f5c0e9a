//! Lab quality scoring
//!
//! Grades one producer run 0-100 from the structure of its findings,
//! recommendations and persona journeys. Scoring is deterministic: the same
//! payload and weights always give the same score, so runs are comparable
//! over time.
//!
//! # Algorithm
//! 1. Compute each metric as an integer percentage (see [`metrics`])
//! 2. Pick the weight set: persona weights only when the run carries
//!    persona journeys, otherwise the persona weight is spread over the rest
//! 3. Composite = Σ weight × metric / 100, rounded
//! 4. Compare against the previous score for the same lab and company

pub mod metrics;
pub mod tracker;

pub use tracker::QualityTracker;

use crate::extract::{
    resolve_shape, Finding, PersonaJourney, ProducerFamily, RawProducerOutput, Recommendation,
    RunContext, ShapeResolution, StrategyAttempt,
};
use crate::types::JsonValue;
use chrono::{DateTime, Utc};
use ctxf_common::config::{MetricWeights, QualityConfig};
use metrics::GenericPhrases;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Band a composite score falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Excellent,
    Good,
    Weak,
    Poor,
}

impl QualityBand {
    pub fn from_score(score: u32) -> Self {
        if score >= 85 {
            Self::Excellent
        } else if score >= 70 {
            Self::Good
        } else if score >= 50 {
            Self::Weak
        } else {
            Self::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Weak => "weak",
            Self::Poor => "poor",
        }
    }
}

/// One metric's score against its pass threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricResult {
    pub score: u32,
    pub threshold: u32,
    pub passed: bool,
}

impl MetricResult {
    pub fn new(score: u32, threshold: u32) -> Self {
        Self {
            score,
            threshold,
            passed: score >= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub evidence_anchoring: MetricResult,
    pub specificity: MetricResult,
    pub deduplicated_signal_density: MetricResult,
    pub recommendation_traceability: MetricResult,
    /// Only for runs that carry persona journeys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_diagnostic_quality: Option<MetricResult>,
}

impl QualityMetrics {
    fn named(&self) -> Vec<(&'static str, MetricResult)> {
        let mut named = vec![
            ("evidence anchoring", self.evidence_anchoring),
            ("specificity", self.specificity),
            ("deduplicated signal density", self.deduplicated_signal_density),
            ("recommendation traceability", self.recommendation_traceability),
        ];
        if let Some(persona) = self.persona_diagnostic_quality {
            named.push(("persona diagnostic quality", persona));
        }
        named
    }
}

/// Comparison against the previous run for the same lab and company
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Regression {
    pub previous_score: u32,
    pub previous_run_id: String,
    /// `score - previous_score`; negative on a drop
    pub delta: i64,
    pub is_regression: bool,
}

/// Immutable score of one producer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabQualityScore {
    pub lab_key: String,
    pub run_id: String,
    pub company_id: String,
    pub computed_at: DateTime<Utc>,
    pub score: u32,
    pub quality_band: QualityBand,
    pub metrics: QualityMetrics,
    pub weights: MetricWeights,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub regression: Option<Regression>,
}

impl LabQualityScore {
    pub fn is_regression(&self) -> bool {
        self.regression.as_ref().is_some_and(|r| r.is_regression)
    }
}

/// Borrowed view of the parts of a payload the scorer reads
#[derive(Debug, Clone, Copy)]
pub struct LabOutput<'a> {
    pub findings: &'a [Finding],
    pub recommendations: &'a [Recommendation],
    pub persona_journeys: Option<&'a [PersonaJourney]>,
}

impl<'a> LabOutput<'a> {
    pub fn from_raw(output: &'a RawProducerOutput) -> Self {
        let report = output.report();
        Self {
            findings: &report.findings,
            recommendations: &report.recommendations,
            persona_journeys: output
                .persona_journeys()
                .filter(|_| output.family().emits_personas()),
        }
    }

    fn has_personas(&self) -> bool {
        self.persona_journeys.is_some_and(|j| !j.is_empty())
    }
}

/// Who and when a score is for
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreContext {
    pub lab_key: String,
    pub run_id: String,
    pub company_id: String,
    pub computed_at: DateTime<Utc>,
}

impl ScoreContext {
    pub fn for_run(lab_key: impl Into<String>, run: &RunContext, computed_at: DateTime<Utc>) -> Self {
        Self {
            lab_key: lab_key.into(),
            run_id: run.run_id.clone(),
            company_id: run.company_id.clone(),
            computed_at,
        }
    }
}

/// Result of scoring a raw payload
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(Box<LabQualityScore>),
    /// No findings and no recommendations; nothing to grade
    NoSignal,
    UnknownShape {
        top_level_keys: Vec<String>,
        attempts: Vec<StrategyAttempt>,
    },
}

pub struct QualityScorer {
    weights_with_persona: MetricWeights,
    weights_without_persona: MetricWeights,
    generic_phrases: GenericPhrases,
    regression_threshold: u32,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

impl QualityScorer {
    pub fn from_config(config: &QualityConfig) -> Self {
        Self {
            weights_with_persona: config.weights_with_persona,
            weights_without_persona: config.weights_without_persona,
            generic_phrases: GenericPhrases::new(&config.generic_phrases),
            regression_threshold: config.regression_threshold,
        }
    }

    pub fn regression_threshold(&self) -> u32 {
        self.regression_threshold
    }

    /// Score one run, or `None` when it has neither findings nor recommendations
    pub fn compute_lab_quality_score(
        &self,
        output: &LabOutput<'_>,
        ctx: &ScoreContext,
        previous: Option<&LabQualityScore>,
    ) -> Option<LabQualityScore> {
        if output.findings.is_empty() && output.recommendations.is_empty() {
            debug!(lab = %ctx.lab_key, run_id = %ctx.run_id, "No findings or recommendations to score");
            return None;
        }

        let persona = output
            .persona_journeys
            .filter(|_| output.has_personas())
            .map(|journeys| {
                MetricResult::new(
                    metrics::persona_quality(journeys),
                    metrics::PERSONA_QUALITY_THRESHOLD,
                )
            });

        let quality_metrics = QualityMetrics {
            evidence_anchoring: MetricResult::new(
                metrics::evidence_anchoring(output.findings),
                metrics::EVIDENCE_ANCHORING_THRESHOLD,
            ),
            specificity: MetricResult::new(
                metrics::specificity(output.findings, &self.generic_phrases),
                metrics::SPECIFICITY_THRESHOLD,
            ),
            deduplicated_signal_density: MetricResult::new(
                metrics::signal_density(output.findings),
                metrics::SIGNAL_DENSITY_THRESHOLD,
            ),
            recommendation_traceability: MetricResult::new(
                metrics::traceability(output.findings, output.recommendations),
                metrics::TRACEABILITY_THRESHOLD,
            ),
            persona_diagnostic_quality: persona,
        };

        let weights = if persona.is_some() {
            self.weights_with_persona
        } else {
            self.weights_without_persona
        };

        let score = composite(&quality_metrics, &weights);
        let regression = previous.map(|prev| self.compare(prev, score));

        let mut warnings: Vec<String> = quality_metrics
            .named()
            .into_iter()
            .filter(|(_, m)| !m.passed)
            .map(|(name, m)| format!("{} {} below threshold {}", name, m.score, m.threshold))
            .collect();
        if output.findings.is_empty() {
            warnings.push("no findings; finding metrics are vacuous".to_string());
        }
        let mismatched = metrics::mismatched_hashes(output.findings);
        if mismatched > 0 {
            warnings.push(format!(
                "{} findings carry a canonicalHash that does not match their text",
                mismatched
            ));
        }
        if let Some(r) = regression.as_ref().filter(|r| r.is_regression) {
            warnings.push(format!(
                "score dropped {} points since run {}",
                -r.delta, r.previous_run_id
            ));
        }

        debug!(
            lab = %ctx.lab_key,
            company_id = %ctx.company_id,
            run_id = %ctx.run_id,
            score,
            "Computed lab quality score"
        );

        Some(LabQualityScore {
            lab_key: ctx.lab_key.clone(),
            run_id: ctx.run_id.clone(),
            company_id: ctx.company_id.clone(),
            computed_at: ctx.computed_at,
            score,
            quality_band: QualityBand::from_score(score),
            metrics: quality_metrics,
            weights,
            warnings,
            regression,
        })
    }

    /// Resolve the payload shape, then score
    pub fn score_raw(
        &self,
        family: ProducerFamily,
        raw: &JsonValue,
        ctx: &ScoreContext,
        previous: Option<&LabQualityScore>,
    ) -> ScoreOutcome {
        match resolve_shape(family, raw) {
            ShapeResolution::Resolved { output, .. } => {
                match self.compute_lab_quality_score(&LabOutput::from_raw(&output), ctx, previous) {
                    Some(score) => ScoreOutcome::Scored(Box::new(score)),
                    None => ScoreOutcome::NoSignal,
                }
            }
            ShapeResolution::Unrecognized {
                top_level_keys,
                attempts,
            } => ScoreOutcome::UnknownShape {
                top_level_keys,
                attempts,
            },
        }
    }

    fn compare(&self, previous: &LabQualityScore, score: u32) -> Regression {
        let delta = score as i64 - previous.score as i64;
        Regression {
            previous_score: previous.score,
            previous_run_id: previous.run_id.clone(),
            delta,
            is_regression: -delta >= self.regression_threshold as i64,
        }
    }
}

/// Weighted composite, rounded to the nearest integer
fn composite(metrics: &QualityMetrics, weights: &MetricWeights) -> u32 {
    let persona = metrics
        .persona_diagnostic_quality
        .map(|m| m.score * weights.persona_diagnostic_quality)
        .unwrap_or(0);

    let weighted = metrics.evidence_anchoring.score * weights.evidence_anchoring
        + metrics.specificity.score * weights.specificity
        + metrics.deduplicated_signal_density.score * weights.deduplicated_signal_density
        + metrics.recommendation_traceability.score * weights.recommendation_traceability
        + persona;

    let total = weights.sum().max(1);
    ((weighted + total / 2) / total).min(100)
}
