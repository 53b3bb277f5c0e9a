//! Source priority
//!
//! Human sources form a closed set and always outrank automated producers.
//! Automated producers are ranked per domain from configuration, so a
//! specialised lab can outrank a generic one inside its own domain.

use crate::types::SourceTag;
use ctxf_common::config::PriorityConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rank assigned to every human source, above any configurable rank
pub const HUMAN_PRIORITY: i32 = 1_000;

/// The fixed set of human sources
///
/// Adding a variant widens the trust boundary: every human source can
/// confirm, reject and bypass throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanSource {
    User,
    Manual,
    Qbr,
    Strategy,
}

impl HumanSource {
    pub const ALL: [HumanSource; 4] = [Self::User, Self::Manual, Self::Qbr, Self::Strategy];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Manual => "manual",
            Self::Qbr => "qbr",
            Self::Strategy => "strategy",
        }
    }

    /// Exact, case-sensitive match
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == tag)
    }
}

/// Per-domain ranking of producers
#[derive(Debug, Clone)]
pub struct SourcePriority {
    fallback: i32,
    default: HashMap<String, i32>,
    domains: HashMap<String, HashMap<String, i32>>,
}

impl SourcePriority {
    pub fn from_config(config: &PriorityConfig) -> Self {
        Self {
            // Configured ranks may never reach the human tier
            fallback: config.fallback.min(HUMAN_PRIORITY - 1),
            default: config
                .default
                .iter()
                .map(|(source, rank)| (source.clone(), (*rank).min(HUMAN_PRIORITY - 1)))
                .collect(),
            domains: config
                .domains
                .iter()
                .map(|(domain, table)| {
                    let table = table
                        .iter()
                        .map(|(source, rank)| (source.clone(), (*rank).min(HUMAN_PRIORITY - 1)))
                        .collect();
                    (domain.clone(), table)
                })
                .collect(),
        }
    }

    /// Rank of `source` within `domain`; higher is more trusted
    pub fn priority_of(&self, source: &SourceTag, domain: &str) -> i32 {
        if self.is_human(source) {
            return HUMAN_PRIORITY;
        }

        self.domains
            .get(domain)
            .and_then(|table| table.get(source.as_str()))
            .or_else(|| self.default.get(source.as_str()))
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn is_human(&self, source: &SourceTag) -> bool {
        is_human(source)
    }
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self::from_config(&PriorityConfig::default())
    }
}

/// True for exactly `user`, `manual`, `qbr` and `strategy`
pub fn is_human(source: &SourceTag) -> bool {
    HumanSource::parse(source.as_str()).is_some()
}
