//! Score history tracking
//!
//! Scores each producer run against the latest prior score for the same lab
//! and company, appends the result to the history and reports regressions.
//! Stored scores are never modified.

use super::{LabQualityScore, QualityScorer, ScoreContext, ScoreOutcome};
use crate::error::EngineResult;
use crate::extract::{ProducerFamily, RunContext};
use crate::store::ScoreHistory;
use crate::types::JsonValue;
use ctxf_common::events::{EngineEvent, EventBus};
use ctxf_common::Clock;
use std::sync::Arc;
use tracing::{info, warn};

pub struct QualityTracker {
    scorer: QualityScorer,
    history: Arc<dyn ScoreHistory>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
}

impl QualityTracker {
    pub fn new(scorer: QualityScorer, history: Arc<dyn ScoreHistory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scorer,
            history,
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    /// Score one run and append it to the history
    ///
    /// `NoSignal` and `UnknownShape` outcomes are returned without touching
    /// the history.
    pub async fn record_run(
        &self,
        family: ProducerFamily,
        raw: &JsonValue,
        run: &RunContext,
    ) -> EngineResult<ScoreOutcome> {
        let lab_key = family.lab_key();
        let previous = self.history.latest_score(lab_key, &run.company_id).await?;
        let ctx = ScoreContext::for_run(lab_key, run, self.clock.now());

        let outcome = self.scorer.score_raw(family, raw, &ctx, previous.as_ref());
        match &outcome {
            ScoreOutcome::Scored(score) => {
                self.history.append_score(score).await?;
                self.report(score);
            }
            ScoreOutcome::NoSignal => {
                info!(lab = lab_key, company_id = %run.company_id, run_id = %run.run_id, "Run has no findings or recommendations, not scored");
            }
            ScoreOutcome::UnknownShape { top_level_keys, .. } => {
                warn!(lab = lab_key, company_id = %run.company_id, run_id = %run.run_id, keys = ?top_level_keys, "Run not scored: unknown payload shape");
            }
        }

        Ok(outcome)
    }

    /// Scores for a lab and company, newest first
    pub async fn history(&self, lab_key: &str, company_id: &str) -> EngineResult<Vec<LabQualityScore>> {
        self.history.score_history(lab_key, company_id).await
    }

    fn report(&self, score: &LabQualityScore) {
        info!(
            lab = %score.lab_key,
            company_id = %score.company_id,
            run_id = %score.run_id,
            score = score.score,
            band = score.quality_band.as_str(),
            "Recorded lab quality score"
        );
        self.emit(EngineEvent::QualityScored {
            company_id: score.company_id.clone(),
            lab_key: score.lab_key.clone(),
            run_id: score.run_id.clone(),
            score: score.score,
            timestamp: score.computed_at,
        });

        if let Some(regression) = score.regression.as_ref().filter(|r| r.is_regression) {
            warn!(
                lab = %score.lab_key,
                company_id = %score.company_id,
                run_id = %score.run_id,
                previous = regression.previous_score,
                score = score.score,
                "Lab quality regression"
            );
            self.emit(EngineEvent::QualityRegression {
                company_id: score.company_id.clone(),
                lab_key: score.lab_key.clone(),
                run_id: score.run_id.clone(),
                previous_score: regression.previous_score,
                score: score.score,
                delta: regression.delta,
                timestamp: score.computed_at,
            });
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }
}
