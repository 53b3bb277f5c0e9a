//! Field store views
//!
//! - `GET /companies/:id/fields` - every field, all statuses, with alternatives
//! - `GET /companies/:id/fields/:key` - one field
//! - `GET /companies/:id/snapshot` - confirmed-only snapshot
//! - `GET /companies/:id/readiness` - readiness score and key breakdown
//! - `GET /companies/:id/audit` - proposal and review audit trail

use super::{ApiError, ApiResult, AppState};
use crate::store::{ConfirmedSnapshot, ReadinessReport};
use crate::types::{AuditRecord, ContextField};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldsResponse {
    pub company_id: String,
    pub field_count: usize,
    pub fields: Vec<ContextField>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub company_id: String,
    pub records: Vec<AuditRecord>,
}

/// GET /companies/:id/fields
pub async fn list_fields(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<FieldsResponse>> {
    let fields = state.store.fields(&company_id).await?;
    Ok(Json(FieldsResponse {
        company_id,
        field_count: fields.len(),
        fields,
    }))
}

/// GET /companies/:id/fields/:key
pub async fn get_field(
    State(state): State<AppState>,
    Path((company_id, key)): Path<(String, String)>,
) -> ApiResult<Json<ContextField>> {
    state
        .store
        .get_field(&company_id, &key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("field {} for company {}", key, company_id)))
}

/// GET /companies/:id/snapshot
pub async fn confirmed_snapshot(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<ConfirmedSnapshot>> {
    Ok(Json(state.store.confirmed_snapshot(&company_id).await?))
}

/// GET /companies/:id/readiness
pub async fn readiness(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<ReadinessReport>> {
    Ok(Json(state.store.readiness(&company_id).await?))
}

/// GET /companies/:id/audit
pub async fn audit_log(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
) -> ApiResult<Json<AuditResponse>> {
    let records = state.store.audit_log(&company_id).await?;
    Ok(Json(AuditResponse { company_id, records }))
}

pub fn field_routes() -> Router<AppState> {
    Router::new()
        .route("/companies/:id/fields", get(list_fields))
        .route("/companies/:id/fields/:key", get(get_field))
        .route("/companies/:id/snapshot", get(confirmed_snapshot))
        .route("/companies/:id/readiness", get(readiness))
        .route("/companies/:id/audit", get(audit_log))
}
