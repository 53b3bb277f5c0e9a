//! Read views over a company's fields
//!
//! Both views are computed from one consistent copy of the field map and
//! never touch storage themselves.

use crate::types::{ContextField, FieldStatus, JsonValue, SourceTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub const SNAPSHOT_ID_PREFIX: &str = "snap_";

/// A confirmed value as exposed to external consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedField {
    pub key: String,
    pub value: JsonValue,
    pub source: SourceTag,
    pub source_id: String,
    pub confidence: Option<f64>,
    pub evidence: Vec<String>,
    pub confirmed_at: DateTime<Utc>,
}

impl ConfirmedField {
    fn from_field(field: &ContextField) -> Self {
        Self {
            key: field.key.clone(),
            value: field.value.clone(),
            source: field.source.clone(),
            source_id: field.source_id.clone(),
            confidence: field.confidence,
            evidence: field.evidence.clone(),
            confirmed_at: field.updated_at,
        }
    }
}

/// Confirmed-only view; proposed and rejected values never appear here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedSnapshot {
    pub snapshot_id: String,
    pub company_id: String,
    pub created_at: DateTime<Utc>,
    pub field_count: usize,
    /// domain -> fields, each list ordered by key
    pub fields: BTreeMap<String, Vec<ConfirmedField>>,
    pub domains: Vec<String>,
}

impl ConfirmedSnapshot {
    pub fn build(company_id: &str, fields: &[ContextField], created_at: DateTime<Utc>) -> Self {
        let mut by_domain: BTreeMap<String, Vec<ConfirmedField>> = BTreeMap::new();

        for field in fields.iter().filter(|f| f.status == FieldStatus::Confirmed) {
            by_domain
                .entry(field.domain.clone())
                .or_default()
                .push(ConfirmedField::from_field(field));
        }
        for list in by_domain.values_mut() {
            list.sort_by(|a, b| a.key.cmp(&b.key));
        }

        Self {
            snapshot_id: format!("{}{}", SNAPSHOT_ID_PREFIX, Uuid::new_v4().simple()),
            company_id: company_id.to_string(),
            created_at,
            field_count: by_domain.values().map(Vec::len).sum(),
            domains: by_domain.keys().cloned().collect(),
            fields: by_domain,
        }
    }
}

/// How complete a company profile is over the required key set
///
/// Confirmed keys count fully, proposed keys at half weight; rejected or
/// absent keys are missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub company_id: String,
    /// 0-100, one decimal place
    pub score: f64,
    pub required_count: usize,
    pub confirmed: Vec<String>,
    pub proposed: Vec<String>,
    pub missing: Vec<String>,
}

impl ReadinessReport {
    pub fn compute(company_id: &str, fields: &[ContextField], required_keys: &[String]) -> Self {
        let statuses: HashMap<&str, FieldStatus> =
            fields.iter().map(|f| (f.key.as_str(), f.status)).collect();

        let mut confirmed = Vec::new();
        let mut proposed = Vec::new();
        let mut missing = Vec::new();

        for key in required_keys {
            match statuses.get(key.as_str()) {
                Some(FieldStatus::Confirmed) => confirmed.push(key.clone()),
                Some(FieldStatus::Proposed) => proposed.push(key.clone()),
                Some(FieldStatus::Rejected) | None => missing.push(key.clone()),
            }
        }

        let score = if required_keys.is_empty() {
            100.0
        } else {
            let weighted = confirmed.len() as f64 + 0.5 * proposed.len() as f64;
            (weighted / required_keys.len() as f64 * 1000.0).round() / 10.0
        };

        Self {
            company_id: company_id.to_string(),
            score,
            required_count: required_keys.len(),
            confirmed,
            proposed,
            missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.proposed.is_empty()
    }
}
