// Quality metrics
//
// Pure functions over one run's findings, recommendations and persona
// journeys. Each metric is a ratio scaled to an integer 0-100; an empty
// denominator scores 100 (nothing in the set fails the check). None of these
// look at anything beyond the structure and text of the payload.

use crate::extract::{Finding, PersonaJourney, Recommendation};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

pub const EVIDENCE_ANCHORING_THRESHOLD: u32 = 80;
pub const SPECIFICITY_THRESHOLD: u32 = 60;
pub const SIGNAL_DENSITY_THRESHOLD: u32 = 70;
pub const TRACEABILITY_THRESHOLD: u32 = 70;
pub const PERSONA_QUALITY_THRESHOLD: u32 = 75;

/// A URL, `www.` host, site path, quoted passage or measured quantity
static CONCRETE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)
        https?://\S+
        | \bwww\.\S+
        | (?:^|[\s(])/[a-z0-9_\-]+(?:/[a-z0-9_\-.]*)*
        | "[^"]{3,}"
        | “[^”]{3,}”
        | \b\d+(?:\.\d+)?\s?(?:%|(?:ms|px|kb|mb|s|seconds|words|pages|chars|characters)\b)
        "#,
    )
    .expect("concrete reference pattern compiles")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

/// Integer percentage of `hits` over `total`; 100 when `total` is zero
pub fn ratio_score(hits: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((hits as f64 / total as f64) * 100.0).round() as u32
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// A finding is anchored by a page URL, DOM selector or quoted text
pub fn is_anchored(finding: &Finding) -> bool {
    present(&finding.page_url) || present(&finding.selector) || present(&finding.quoted_text)
}

pub fn evidence_anchoring(findings: &[Finding]) -> u32 {
    let anchored = findings.iter().filter(|f| is_anchored(f)).count();
    ratio_score(anchored, findings.len())
}

/// Lowercased boilerplate phrases matched as substrings
#[derive(Debug, Clone, Default)]
pub struct GenericPhrases {
    phrases: Vec<String>,
}

impl GenericPhrases {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| normalize_text(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = normalize_text(text);
        self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

pub fn has_concrete_reference(finding: &Finding) -> bool {
    present(&finding.page_url) || CONCRETE_REFERENCE.is_match(&finding.text)
}

/// Specific = concrete reference present AND no boilerplate phrase
pub fn is_specific(finding: &Finding, generic: &GenericPhrases) -> bool {
    has_concrete_reference(finding) && !generic.matches(&finding.text)
}

pub fn specificity(findings: &[Finding], generic: &GenericPhrases) -> u32 {
    let specific = findings.iter().filter(|f| is_specific(f, generic)).count();
    ratio_score(specific, findings.len())
}

/// Whitespace-collapsed, case-folded text
pub fn normalize_text(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_lowercase()
}

/// Hex SHA-256 of the normalised finding text
pub fn canonical_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(normalize_text(text).as_bytes()))
}

/// Unique canonical hashes over total findings
///
/// Hashes are always recomputed from the text; a producer-supplied
/// `canonicalHash` never counts toward uniqueness.
pub fn signal_density(findings: &[Finding]) -> u32 {
    let unique: HashSet<String> = findings.iter().map(|f| canonical_hash(&f.text)).collect();
    ratio_score(unique.len(), findings.len())
}

/// Findings whose supplied `canonicalHash` disagrees with their text
pub fn mismatched_hashes(findings: &[Finding]) -> usize {
    findings
        .iter()
        .filter(|f| match f.canonical_hash.as_deref().map(str::trim) {
            Some(hash) if !hash.is_empty() => !hash.eq_ignore_ascii_case(&canonical_hash(&f.text)),
            _ => false,
        })
        .count()
}

/// Recommendations whose `linkedFindingId` resolves to a finding in the run
pub fn traceability(findings: &[Finding], recommendations: &[Recommendation]) -> u32 {
    let ids: HashSet<&str> = findings.iter().map(|f| f.id.as_str()).collect();
    let traced = recommendations
        .iter()
        .filter(|r| {
            r.linked_finding_id
                .as_deref()
                .is_some_and(|id| ids.contains(id))
        })
        .count();
    ratio_score(traced, recommendations.len())
}

pub fn is_diagnostic(journey: &PersonaJourney) -> bool {
    present(&journey.goal) && present(&journey.failure_point)
}

pub fn persona_quality(journeys: &[PersonaJourney]) -> u32 {
    let diagnostic = journeys.iter().filter(|j| is_diagnostic(j)).count();
    ratio_score(diagnostic, journeys.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic() -> GenericPhrases {
        GenericPhrases::new(["improve seo", "follow best practices"])
    }

    #[test]
    fn test_ratio_score_rounding() {
        assert_eq!(ratio_score(0, 0), 100);
        assert_eq!(ratio_score(1, 3), 33);
        assert_eq!(ratio_score(2, 3), 67);
        assert_eq!(ratio_score(3, 3), 100);
    }

    #[test]
    fn test_anchors() {
        let findings = vec![
            Finding::new("f1", "CTA missing").with_page_url("https://acme.test/pricing"),
            Finding::new("f2", "Low contrast").with_selector("#hero .btn"),
            Finding::new("f3", "Tagline").with_quoted_text("We do things"),
            Finding::new("f4", "Weak headline").with_selector("   "),
        ];
        assert_eq!(evidence_anchoring(&findings), 75);
        assert_eq!(evidence_anchoring(&[]), 100);
    }

    #[test]
    fn test_concrete_reference_patterns() {
        for text in [
            "See https://acme.test/plans for the broken table",
            "Homepage at www.acme.test lacks a hero",
            "The /pricing page has no CTA",
            "Headline reads \"Solutions for everyone\"",
            "LCP is 4.2 s on mobile",
            "Bounce rate of 78% on blog posts",
        ] {
            assert!(has_concrete_reference(&Finding::new("f", text)), "{}", text);
        }

        assert!(!has_concrete_reference(&Finding::new("f", "The site feels dated")));
        assert!(!has_concrete_reference(&Finding::new("f", "and/or something")));
    }

    #[test]
    fn test_specificity_requires_both_conditions() {
        let generic = generic();

        let specific = Finding::new("f1", "The /pricing page hides the annual discount");
        let boilerplate = Finding::new("f2", "Improve SEO on https://acme.test/blog");
        let vague = Finding::new("f3", "Content could be clearer");

        assert!(is_specific(&specific, &generic));
        assert!(!is_specific(&boilerplate, &generic));
        assert!(!is_specific(&vague, &generic));

        assert_eq!(specificity(&[specific, boilerplate, vague], &generic), 33);
        assert_eq!(specificity(&[], &generic), 100);
    }

    #[test]
    fn test_canonical_hash_normalises_text() {
        assert_eq!(
            canonical_hash("  Missing   CTA\non /pricing "),
            canonical_hash("missing cta on /pricing")
        );
        assert_eq!(canonical_hash("x").len(), 64);
    }

    #[test]
    fn test_signal_density_counts_near_duplicates() {
        let findings = vec![
            Finding::new("f1", "Missing CTA on /pricing"),
            Finding::new("f2", "missing  cta on /PRICING"),
            Finding::new("f3", "Slow LCP on /home"),
            Finding::new("f4", "Broken link in footer"),
        ];
        assert_eq!(signal_density(&findings), 75);
    }

    #[test]
    fn test_supplied_hashes_do_not_hide_padding() {
        // Near-duplicates each tagged with a distinct made-up hash
        let padded: Vec<_> = (0..4)
            .map(|i| {
                let mut f = Finding::new(format!("f{}", i), "Missing CTA on /pricing");
                f.canonical_hash = Some(format!("{:064x}", i));
                f
            })
            .collect();
        assert_eq!(signal_density(&padded), 25);
        assert_eq!(mismatched_hashes(&padded), 4);

        let mut honest = Finding::new("f9", "Slow LCP on /home");
        honest.canonical_hash = Some(canonical_hash("slow lcp on /home").to_uppercase());
        let mut blank = Finding::new("f10", "Broken link in footer");
        blank.canonical_hash = Some("  ".to_string());
        assert_eq!(mismatched_hashes(&[honest, blank, Finding::new("f11", "x")]), 0);
    }

    #[test]
    fn test_traceability_orphans_and_dangling_links() {
        let findings = vec![Finding::new("f1", "a"), Finding::new("f2", "b")];
        let recommendations = vec![
            Recommendation::new("r1", "fix a").linked_to("f1"),
            Recommendation::new("r2", "fix b").linked_to("f2"),
            Recommendation::new("r3", "dangling").linked_to("f9"),
            Recommendation::new("r4", "orphan"),
        ];
        assert_eq!(traceability(&findings, &recommendations), 50);
        assert_eq!(traceability(&findings, &[]), 100);
    }

    #[test]
    fn test_persona_quality_needs_goal_and_failure_point() {
        let journey = |goal: Option<&str>, failure: Option<&str>| PersonaJourney {
            persona: "Ops lead".to_string(),
            goal: goal.map(String::from),
            failure_point: failure.map(String::from),
        };

        let journeys = vec![
            journey(Some("Compare plans"), Some("Pricing hidden")),
            journey(Some("Book demo"), None),
            journey(None, Some("Form errors")),
            journey(Some("Sign up"), Some("")),
        ];
        assert_eq!(persona_quality(&journeys), 25);
    }
}
