//! Normalised producer payloads
//!
//! Every known producer family decodes into one variant of
//! [`RawProducerOutput`]. New producers add a family and an adapter here
//! rather than teaching the merge engine another payload layout.

use crate::types::JsonValue;
use serde::{Deserialize, Serialize};

/// Known producer families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerFamily {
    Website,
    Brand,
    Content,
    Seo,
    Audience,
}

impl ProducerFamily {
    pub const ALL: [ProducerFamily; 5] = [
        Self::Website,
        Self::Brand,
        Self::Content,
        Self::Seo,
        Self::Audience,
    ];

    /// Source tag used for candidates and score history
    pub fn lab_key(self) -> &'static str {
        match self {
            Self::Website => "website_lab",
            Self::Brand => "brand_lab",
            Self::Content => "content_lab",
            Self::Seo => "seo_lab",
            Self::Audience => "audience_lab",
        }
    }

    pub fn from_lab_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.lab_key() == key)
    }

    pub fn emits_personas(self) -> bool {
        matches!(self, Self::Audience)
    }
}

/// One diagnostic finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub quoted_text: Option<String>,
    #[serde(default)]
    pub canonical_hash: Option<String>,
}

impl Finding {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            page_url: None,
            selector: None,
            quoted_text: None,
            canonical_hash: None,
        }
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_quoted_text(mut self, quote: impl Into<String>) -> Self {
        self.quoted_text = Some(quote.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub linked_finding_id: Option<String>,
}

impl Recommendation {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            linked_finding_id: None,
        }
    }

    pub fn linked_to(mut self, finding_id: impl Into<String>) -> Self {
        self.linked_finding_id = Some(finding_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaJourney {
    pub persona: String,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub failure_point: Option<String>,
}

/// A fact a producer asserts about the company, proposed into the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedFact {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Payload shared by every lab family
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabReport {
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub facts: Vec<ReportedFact>,
}

/// Audience lab payload: a lab report plus persona journeys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudienceReport {
    #[serde(flatten)]
    pub report: LabReport,
    pub persona_journeys: Vec<PersonaJourney>,
}

/// Normalised output of one producer run
#[derive(Debug, Clone, PartialEq)]
pub enum RawProducerOutput {
    Website(LabReport),
    Brand(LabReport),
    Content(LabReport),
    Seo(LabReport),
    Audience(AudienceReport),
}

impl RawProducerOutput {
    /// Decode a located report object into the family's variant
    pub fn decode(family: ProducerFamily, report: JsonValue) -> Result<Self, serde_json::Error> {
        Ok(match family {
            ProducerFamily::Website => Self::Website(serde_json::from_value(report)?),
            ProducerFamily::Brand => Self::Brand(serde_json::from_value(report)?),
            ProducerFamily::Content => Self::Content(serde_json::from_value(report)?),
            ProducerFamily::Seo => Self::Seo(serde_json::from_value(report)?),
            ProducerFamily::Audience => Self::Audience(serde_json::from_value(report)?),
        })
    }

    pub fn family(&self) -> ProducerFamily {
        match self {
            Self::Website(_) => ProducerFamily::Website,
            Self::Brand(_) => ProducerFamily::Brand,
            Self::Content(_) => ProducerFamily::Content,
            Self::Seo(_) => ProducerFamily::Seo,
            Self::Audience(_) => ProducerFamily::Audience,
        }
    }

    pub fn report(&self) -> &LabReport {
        match self {
            Self::Website(r) | Self::Brand(r) | Self::Content(r) | Self::Seo(r) => r,
            Self::Audience(a) => &a.report,
        }
    }

    /// Persona journeys, only for families that emit them
    pub fn persona_journeys(&self) -> Option<&[PersonaJourney]> {
        match self {
            Self::Audience(a) => Some(&a.persona_journeys),
            _ => None,
        }
    }
}
