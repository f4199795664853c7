use super::confusables::{is_mixed_script, similar_glyphs};
use super::{DetectionInput, Detector};
use crate::domain_utils::DomainUtils;
use crate::error::DetectorError;
use crate::verdict::{Outcome, ReportPolicy, Verdict, VerdictDetail};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub const NAME: &str = "Homoglyph Detection";

const MAX_SIMILAR_GLYPHS: usize = 3;

pub fn is_punycode(domain: &str) -> bool {
    domain
        .split('.')
        .any(|label| label.to_ascii_lowercase().starts_with("xn--"))
}

/// Decode an IDNA domain to Unicode, returning the input unchanged when it
/// does not decode cleanly.
pub fn decode_punycode(domain: &str) -> String {
    let (decoded, result) = idna::domain_to_unicode(domain);
    match result {
        Ok(()) => decoded,
        Err(e) => {
            log::debug!("Failed to decode punycode domain {domain}: {e:?}");
            domain.to_string()
        }
    }
}

/// Characters of `domain` that imitate the canonical alphabet, each with
/// up to three reference glyph names.
pub fn confusable_characters(domain: &str) -> Vec<(char, Vec<&'static str>)> {
    let mut seen = BTreeSet::new();
    domain
        .chars()
        .filter(|c| seen.insert(*c))
        .filter_map(|c| {
            similar_glyphs(c).map(|glyphs| {
                (
                    c,
                    glyphs.iter().take(MAX_SIMILAR_GLYPHS).copied().collect(),
                )
            })
        })
        .collect()
}

/// Every finding for one domain; empty when the domain looks clean.
pub fn check_domain(domain: &str) -> Vec<String> {
    let mut findings = Vec::new();

    let decoded = if is_punycode(domain) {
        let decoded = decode_punycode(domain);
        findings.push(format!("Punycode domain: {domain} decodes to {decoded}"));
        decoded
    } else {
        domain.to_string()
    };

    if is_mixed_script(&decoded) {
        findings.push(format!("Mixed script detected in: {decoded}"));
    }

    for (c, glyphs) in confusable_characters(&decoded) {
        findings.push(format!(
            "Confusable character '{c}' in {decoded} (similar to: {})",
            glyphs.join(", ")
        ));
    }

    findings
}

pub fn transform<'a>(
    flagged: impl IntoIterator<Item = (&'a str, Vec<String>)>,
    name: &str,
) -> Verdict {
    let details: Vec<VerdictDetail> = flagged
        .into_iter()
        .map(|(domain, findings)| VerdictDetail::new(domain, findings.join("; ")))
        .collect();

    if details.is_empty() {
        return Verdict::new(
            name,
            false,
            vec![VerdictDetail::new(
                "clean",
                "No homoglyph or punycode domains detected",
            )],
        );
    }

    Verdict::new(name, true, details)
}

pub struct HomoglyphDetector {
    name: String,
}

impl HomoglyphDetector {
    pub fn new() -> Self {
        Self {
            name: NAME.to_string(),
        }
    }
}

impl Default for HomoglyphDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for HomoglyphDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ReportPolicy {
        ReportPolicy::Always
    }

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
        let mut candidates: BTreeSet<String> = input.iocs.domains.clone();
        if let Some(domain) = input.sender().and_then(DomainUtils::extract_domain) {
            candidates.insert(domain);
        }

        let flagged: Vec<(&str, Vec<String>)> = candidates
            .iter()
            .map(|domain| (domain.as_str(), check_domain(domain)))
            .filter(|(_, findings)| !findings.is_empty())
            .collect();

        log::debug!(
            "Homoglyph check: {} of {} domain(s) flagged",
            flagged.len(),
            candidates.len()
        );

        Ok(transform(flagged, &self.name).into())
    }
}
