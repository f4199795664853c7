pub mod confusables;
pub mod email_auth;
pub mod homoglyph;
pub mod reputation;
pub mod unshorten;

use crate::email::Eml;
use crate::error::DetectorError;
use crate::ioc::Iocs;
use crate::verdict::{Outcome, ReportPolicy};
use async_trait::async_trait;

/// Read-only view of one analysis shared by every detector.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub eml: &'a Eml,
    pub iocs: &'a Iocs,
}

impl<'a> DetectionInput<'a> {
    pub fn new(eml: &'a Eml, iocs: &'a Iocs) -> Self {
        Self { eml, iocs }
    }

    pub fn sender(&self) -> Option<&'a str> {
        self.eml.sender()
    }
}

#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// How the aggregator treats an error or panic from this detector.
    fn policy(&self) -> ReportPolicy;

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError>;
}
