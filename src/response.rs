use crate::email::Eml;
use crate::ioc::Iocs;
use crate::verdict::Verdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use uuid::Uuid;

/// How a response identifier is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// A fresh random identifier for every analysis.
    #[default]
    Random,
    /// Derived from the parsed message, so re-analysing the same message
    /// reuses the same cache key.
    Content,
}

impl IdStrategy {
    pub fn generate(&self, eml: &Eml) -> String {
        match self {
            IdStrategy::Random => Uuid::new_v4().to_string(),
            IdStrategy::Content => match serde_json::to_vec(eml) {
                Ok(bytes) => Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).to_string(),
                Err(e) => {
                    log::warn!("Could not serialize email for content id, using random id: {e}");
                    Uuid::new_v4().to_string()
                }
            },
        }
    }
}

/// Aggregate analysis result.
///
/// The derived IOC sets are computed on first access and kept for the
/// lifetime of the value. They are not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub eml: Eml,
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
    pub id: String,
    #[serde(skip)]
    iocs: OnceLock<Iocs>,
}

impl Response {
    pub fn new(eml: Eml, verdicts: Vec<Verdict>, id: String) -> Self {
        Self {
            eml,
            verdicts,
            id,
            iocs: OnceLock::new(),
        }
    }

    /// Build a response reusing IOC sets the caller already derived.
    pub fn with_iocs(eml: Eml, verdicts: Vec<Verdict>, id: String, iocs: Iocs) -> Self {
        Self {
            eml,
            verdicts,
            id,
            iocs: OnceLock::from(iocs),
        }
    }

    pub fn iocs(&self) -> &Iocs {
        self.iocs.get_or_init(|| Iocs::from_eml(&self.eml))
    }

    pub fn urls(&self) -> &BTreeSet<String> {
        &self.iocs().urls
    }

    pub fn sha256s(&self) -> &BTreeSet<String> {
        &self.iocs().sha256s
    }

    pub fn ip_addresses(&self) -> &BTreeSet<String> {
        &self.iocs().ip_addresses
    }

    pub fn domains(&self) -> &BTreeSet<String> {
        &self.iocs().domains
    }

    pub fn emails(&self) -> &BTreeSet<String> {
        &self.iocs().emails
    }

    pub fn malicious_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.malicious).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.eml == other.eml && self.verdicts == other.verdicts
    }
}
