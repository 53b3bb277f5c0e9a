// Payload shape resolution
//
// Producers wrap their report at different nesting paths. Each strategy is a
// pure function that locates the report object at one path; strategies are
// tried in order and the first that both locates and decodes a report wins.
// Every failed attempt is kept so an unrecognised payload can be diagnosed.

use super::report::{ProducerFamily, RawProducerOutput};
use crate::types::JsonValue;
use serde::Serialize;
use tracing::{debug, warn};

/// Top-level keys that mark an object as a lab report
const REPORT_KEYS: [&str; 4] = ["findings", "recommendations", "facts", "personaJourneys"];

type LocateFn = fn(&JsonValue) -> Result<JsonValue, String>;

/// A named way of locating the report inside a raw payload
pub struct ExtractionStrategy {
    pub name: &'static str,
    locate: LocateFn,
}

impl ExtractionStrategy {
    pub fn locate(&self, raw: &JsonValue) -> Result<JsonValue, String> {
        (self.locate)(raw)
    }
}

/// Strategies in priority order
pub static STRATEGIES: [ExtractionStrategy; 4] = [
    ExtractionStrategy { name: "root", locate: locate_root },
    ExtractionStrategy { name: "result", locate: locate_result },
    ExtractionStrategy { name: "data", locate: locate_data },
    ExtractionStrategy { name: "dataJson", locate: locate_data_json },
];

/// Why one strategy did not apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: &'static str,
    pub reason: String,
}

/// Outcome of shape resolution
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeResolution {
    Resolved {
        output: RawProducerOutput,
        strategy: &'static str,
    },
    Unrecognized {
        top_level_keys: Vec<String>,
        attempts: Vec<StrategyAttempt>,
    },
}

/// Try each strategy in order against `raw`
pub fn resolve_shape(family: ProducerFamily, raw: &JsonValue) -> ShapeResolution {
    let mut attempts = Vec::new();

    for strategy in STRATEGIES.iter() {
        let reason = match strategy.locate(raw) {
            Ok(report) => match RawProducerOutput::decode(family, report) {
                Ok(output) => {
                    debug!(lab = family.lab_key(), strategy = strategy.name, "Resolved payload shape");
                    return ShapeResolution::Resolved {
                        output,
                        strategy: strategy.name,
                    };
                }
                Err(e) => format!("report located but failed to decode: {}", e),
            },
            Err(reason) => reason,
        };

        attempts.push(StrategyAttempt {
            strategy: strategy.name,
            reason,
        });
    }

    let top_level_keys = top_level_keys(raw);
    warn!(
        lab = family.lab_key(),
        keys = ?top_level_keys,
        "Unrecognized producer payload shape"
    );

    ShapeResolution::Unrecognized {
        top_level_keys,
        attempts,
    }
}

/// Sorted top-level keys, for diagnostics
pub fn top_level_keys(raw: &JsonValue) -> Vec<String> {
    let mut keys: Vec<String> = raw
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}

fn looks_like_report(value: &JsonValue) -> bool {
    value
        .as_object()
        .map(|obj| REPORT_KEYS.iter().any(|k| obj.get(*k).is_some_and(JsonValue::is_array)))
        .unwrap_or(false)
}

fn check_report(value: &JsonValue, path: &str) -> Result<JsonValue, String> {
    if looks_like_report(value) {
        Ok(value.clone())
    } else if value.is_object() {
        Err(format!("no report arrays at {}", path))
    } else {
        Err(format!("{} is not an object", path))
    }
}

fn locate_root(raw: &JsonValue) -> Result<JsonValue, String> {
    check_report(raw, "top level")
}

fn locate_nested(raw: &JsonValue, key: &str) -> Result<JsonValue, String> {
    match raw.get(key) {
        Some(value) => check_report(value, key),
        None => Err(format!("no '{}' key", key)),
    }
}

fn locate_result(raw: &JsonValue) -> Result<JsonValue, String> {
    locate_nested(raw, "result")
}

fn locate_data(raw: &JsonValue) -> Result<JsonValue, String> {
    locate_nested(raw, "data")
}

/// `dataJson` may hold the report as an object or as serialised JSON text
fn locate_data_json(raw: &JsonValue) -> Result<JsonValue, String> {
    match raw.get("dataJson") {
        Some(JsonValue::String(text)) => {
            let parsed: JsonValue = serde_json::from_str(text)
                .map_err(|e| format!("dataJson is not valid JSON: {}", e))?;
            check_report(&parsed, "dataJson")
        }
        Some(value) => check_report(value, "dataJson"),
        None => Err("no 'dataJson' key".to_string()),
    }
}
