use serde::{Deserialize, Serialize};

/// One atomic finding inside a verdict.
///
/// `score` is on a 0-100 scale where higher is worse; `None` marks an
/// informational detail that does not contribute to scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictDetail {
    pub key: String,
    #[serde(default)]
    pub score: Option<f64>,
    pub description: String,
    #[serde(default)]
    pub reference_link: Option<String>,
}

impl VerdictDetail {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            score: None,
            description: description.into(),
            reference_link: None,
        }
    }

    pub fn scored(key: impl Into<String>, score: f64, description: impl Into<String>) -> Self {
        Self {
            score: Some(score),
            ..Self::new(key, description)
        }
    }

    pub fn with_reference_link(self, link: impl Into<String>) -> Self {
        Self {
            reference_link: Some(link.into()),
            ..self
        }
    }
}

/// Output of exactly one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub name: String,
    pub malicious: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub details: Vec<VerdictDetail>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Verdict {
    pub fn new(name: impl Into<String>, malicious: bool, details: Vec<VerdictDetail>) -> Self {
        Self {
            name: name.into(),
            malicious,
            score: None,
            details,
            error: None,
        }
    }

    pub fn with_score(self, score: Option<f64>) -> Self {
        Self { score, ..self }
    }

    /// Verdict recorded for a detector that failed but must always report.
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            malicious: false,
            score: None,
            details: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Maximum of the scored details, `None` when every detail is unscored.
    pub fn max_detail_score(details: &[VerdictDetail]) -> Option<f64> {
        details
            .iter()
            .filter_map(|d| d.score)
            .fold(None, |acc, s| match acc {
                Some(max) if max >= s => Some(max),
                _ => Some(s),
            })
    }
}

/// Result of a detector run that did not fail.
///
/// `Absent` means the detector had nothing applicable to report. It is a
/// successful outcome and is silently dropped from the final response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Absent,
    Verdict(Verdict),
}

impl Outcome {
    pub fn into_verdict(self) -> Option<Verdict> {
        match self {
            Outcome::Absent => None,
            Outcome::Verdict(verdict) => Some(verdict),
        }
    }
}

impl From<Verdict> for Outcome {
    fn from(verdict: Verdict) -> Self {
        Outcome::Verdict(verdict)
    }
}

impl From<Option<Verdict>> for Outcome {
    fn from(verdict: Option<Verdict>) -> Self {
        verdict.map_or(Outcome::Absent, Outcome::Verdict)
    }
}

/// What the aggregator does with a detector that errored or panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPolicy {
    /// Record a verdict carrying the error message.
    Always,
    /// Drop the detector from the response.
    OnSignal,
}
