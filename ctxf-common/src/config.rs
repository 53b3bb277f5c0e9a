//! Configuration loading and resolution
//!
//! Config file resolution priority order:
//! 1. Explicit path supplied by the host
//! 2. `CTXF_CONFIG` environment variable
//! 3. `<config_dir>/ctxf/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing file never prevents startup: it logs a warning and the compiled
//! defaults are used. A file that exists but fails to parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CTXF_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cooldown: CooldownConfig,
    pub priority: PriorityConfig,
    pub readiness: ReadinessConfig,
    pub quality: QualityConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Cooldown throttle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Cooldown applied after a successful proposal batch (clamped to [30, 120])
    pub default_seconds: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self { default_seconds: 60 }
    }
}

/// Automated source ranking
///
/// `default` applies to every domain; `domains` overrides per domain.
/// Sources absent from both tables rank at `fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub fallback: i32,
    pub default: BTreeMap<String, i32>,
    pub domains: BTreeMap<String, BTreeMap<String, i32>>,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        let default: BTreeMap<String, i32> = [
            ("website_lab", 50),
            ("brand_lab", 50),
            ("content_lab", 50),
            ("seo_lab", 50),
            ("audience_lab", 50),
            ("gap_analysis", 40),
            ("ai_inference", 20),
        ]
        .into_iter()
        .map(|(source, rank)| (source.to_string(), rank))
        .collect();

        // Each specialised lab outranks the generic ones inside its own domain
        let domains = [
            ("website", "website_lab"),
            ("brand", "brand_lab"),
            ("content", "content_lab"),
            ("seo", "seo_lab"),
            ("audience", "audience_lab"),
        ]
        .into_iter()
        .map(|(domain, lab)| {
            let mut table = BTreeMap::new();
            table.insert(lab.to_string(), 80);
            (domain.to_string(), table)
        })
        .collect();

        Self {
            fallback: 10,
            default,
            domains,
        }
    }
}

/// Readiness scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Field keys a company profile needs before it counts as established
    pub required_keys: Vec<String>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            required_keys: [
                "identity.industry",
                "identity.businessModel",
                "audience.primaryAudience",
                "brand.positioning",
                "competitive.competitors",
                "objectives.primaryObjective",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Weight set for the lab quality composite score (must sum to 100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricWeights {
    pub evidence_anchoring: u32,
    pub specificity: u32,
    pub deduplicated_signal_density: u32,
    pub recommendation_traceability: u32,
    #[serde(default)]
    pub persona_diagnostic_quality: u32,
}

impl MetricWeights {
    /// Default weights for producers that emit persona journeys
    pub const WITH_PERSONA: MetricWeights = MetricWeights {
        evidence_anchoring: 25,
        specificity: 20,
        deduplicated_signal_density: 15,
        recommendation_traceability: 20,
        persona_diagnostic_quality: 20,
    };

    /// Default weights for producers without persona output
    pub const WITHOUT_PERSONA: MetricWeights = MetricWeights {
        evidence_anchoring: 30,
        specificity: 25,
        deduplicated_signal_density: 20,
        recommendation_traceability: 25,
        persona_diagnostic_quality: 0,
    };

    pub fn sum(&self) -> u32 {
        self.evidence_anchoring
            + self.specificity
            + self.deduplicated_signal_density
            + self.recommendation_traceability
            + self.persona_diagnostic_quality
    }
}

/// Lab quality scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights_with_persona: MetricWeights,
    pub weights_without_persona: MetricWeights,
    /// Boilerplate phrases that disqualify a finding from counting as specific
    pub generic_phrases: Vec<String>,
    /// Minimum drop (points) against the previous score that flags a regression
    pub regression_threshold: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights_with_persona: MetricWeights::WITH_PERSONA,
            weights_without_persona: MetricWeights::WITHOUT_PERSONA,
            generic_phrases: [
                "improve seo",
                "optimize your website",
                "improve user experience",
                "enhance user experience",
                "consider improving",
                "follow best practices",
                "increase engagement",
                "boost conversions",
                "leverage social media",
                "create more content",
                "strengthen your brand",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            regression_threshold: 10,
        }
    }
}

/// SQLite storage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file; `None` means the platform data directory default
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Resolve the database path, falling back to the platform default
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

/// Tracing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration following the resolution priority order
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = resolve_config_path(explicit) else {
            warn!("No config file found, using compiled defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!("Config file {} does not exist, using compiled defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject weight sets that do not sum to exactly 100
    pub fn validate(&self) -> Result<()> {
        for (name, weights) in [
            ("weights_with_persona", &self.quality.weights_with_persona),
            ("weights_without_persona", &self.quality.weights_without_persona),
        ] {
            if weights.sum() != 100 {
                return Err(Error::Config(format!(
                    "quality.{} must sum to 100 (got {})",
                    name,
                    weights.sum()
                )));
            }
        }

        if self.quality.weights_without_persona.persona_diagnostic_quality != 0 {
            return Err(Error::Config(
                "quality.weights_without_persona cannot weight persona_diagnostic_quality"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolve which config file to read, if any
///
/// Returns the first candidate in priority order; the caller decides what
/// to do when it does not exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Explicit path
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("ctxf").join("config.toml"))
        .filter(|p| p.exists())
}

/// Get OS-dependent default database path
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ctxf").join("ctxf.db"))
        .unwrap_or_else(|| PathBuf::from("./ctxf_data/ctxf.db"))
}
