//! Lab quality score history
//!
//! `GET /companies/:id/labs/:lab/scores` returns the score history for one
//! lab, newest first, with the latest regression flag lifted to the top
//! level for dashboards.

use super::{ApiError, ApiResult, AppState};
use crate::extract::ProducerFamily;
use crate::quality::LabQualityScore;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreHistoryResponse {
    pub company_id: String,
    pub lab_key: String,
    pub latest_score: Option<u32>,
    pub latest_is_regression: bool,
    pub scores: Vec<LabQualityScore>,
}

/// GET /companies/:id/labs/:lab/scores
pub async fn lab_scores(
    State(state): State<AppState>,
    Path((company_id, lab_key)): Path<(String, String)>,
) -> ApiResult<Json<ScoreHistoryResponse>> {
    if ProducerFamily::from_lab_key(&lab_key).is_none() {
        return Err(ApiError::NotFound(format!("unknown lab {}", lab_key)));
    }

    let scores = state.quality.history(&lab_key, &company_id).await?;
    let latest = scores.first();

    Ok(Json(ScoreHistoryResponse {
        latest_score: latest.map(|s| s.score),
        latest_is_regression: latest.is_some_and(LabQualityScore::is_regression),
        company_id,
        lab_key,
        scores,
    }))
}

pub fn quality_routes() -> Router<AppState> {
    Router::new().route("/companies/:id/labs/:lab/scores", get(lab_scores))
}
