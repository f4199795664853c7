//! Runs the enabled detectors over one parsed email and assembles the
//! response.
//!
//! Detectors run concurrently on the calling task. A detector that fails
//! or panics never takes the analysis down with it: depending on its
//! [`ReportPolicy`] the failure is either recorded as an error verdict or
//! dropped.

use crate::config::Config;
use crate::detectors::email_auth::EmailAuthDetector;
use crate::detectors::homoglyph::HomoglyphDetector;
use crate::detectors::reputation::{IpqsEmailDetector, IpqsIpDetector, IpqsUrlDetector};
use crate::detectors::unshorten::UnshortenDetector;
use crate::detectors::{DetectionInput, Detector};
use crate::dns::HickoryTxtResolver;
use crate::email::Eml;
use crate::error::DetectorError;
use crate::fanout::FanOut;
use crate::ioc::Iocs;
use crate::reputation::{IpqsClient, ReputationClient};
use crate::response::{IdStrategy, Response};
use crate::url_resolver::HttpRedirectResolver;
use crate::verdict::{Outcome, ReportPolicy, Verdict};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The detectors taking part in one analysis, in invocation order.
///
/// Built per analysis so that clients holding connections are released
/// when the analysis completes.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorSet {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    pub fn build(config: &Config) -> Result<Self, DetectorError> {
        let enabled = config.enabled_detectors();
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();

        if enabled.email_auth {
            let resolver = HickoryTxtResolver::new(config.dns.timeout_seconds);
            detectors.push(Box::new(EmailAuthDetector::new(Arc::new(resolver))));
        }

        if enabled.homoglyph {
            detectors.push(Box::new(HomoglyphDetector::new()));
        }

        if enabled.unshorten {
            let resolver = HttpRedirectResolver::new(
                config.unshorten.timeout_seconds,
                config.unshorten.max_redirects,
            )?;
            detectors.push(Box::new(UnshortenDetector::new(
                Arc::new(resolver),
                FanOut::new(&config.fanout)?,
            )));
        }

        if let Some(api_key) = &enabled.ipqs_api_key {
            let client: Arc<dyn ReputationClient> = Arc::new(IpqsClient::new(api_key)?);
            // IP and URL lookups share one rate budget against the service.
            let fanout = Arc::new(FanOut::new(&config.fanout)?);
            detectors.push(Box::new(IpqsIpDetector::new(client.clone(), fanout.clone())));
            detectors.push(Box::new(IpqsUrlDetector::new(client.clone(), fanout)));
            detectors.push(Box::new(IpqsEmailDetector::new(client)));
        }

        Ok(Self::new(detectors))
    }

    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector over `eml` and collect the surviving verdicts.
    pub async fn run(&self, eml: Eml, id_strategy: IdStrategy) -> Response {
        let iocs = Iocs::from_eml(&eml);
        let input = DetectionInput::new(&eml, &iocs);

        let results = join_all(
            self.detectors
                .iter()
                .map(|detector| run_guarded(detector.as_ref(), &input)),
        )
        .await;

        let verdicts: Vec<Verdict> = self
            .detectors
            .iter()
            .zip(results)
            .filter_map(|(detector, result)| settle(detector.as_ref(), result))
            .collect();

        let id = id_strategy.generate(&eml);
        log::info!(
            "Analysis {id} complete: {} verdict(s), {} malicious",
            verdicts.len(),
            verdicts.iter().filter(|v| v.malicious).count()
        );
        Response::with_iocs(eml, verdicts, id, iocs)
    }
}

async fn run_guarded(
    detector: &dyn Detector,
    input: &DetectionInput<'_>,
) -> Result<Outcome, DetectorError> {
    match AssertUnwindSafe(detector.detect(input)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(DetectorError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Decide what a single detector run contributes to the response.
fn settle(detector: &dyn Detector, result: Result<Outcome, DetectorError>) -> Option<Verdict> {
    let name = detector.name();
    match result {
        Ok(Outcome::Verdict(verdict)) => {
            log::debug!("{name}: malicious={}", verdict.malicious);
            Some(verdict)
        }
        Ok(Outcome::Absent) => {
            log::debug!("{name}: nothing to report");
            None
        }
        Err(e) => match detector.policy() {
            ReportPolicy::Always => {
                log::warn!("{name} failed: {e}");
                Some(Verdict::failed(name, e.to_string()))
            }
            ReportPolicy::OnSignal => {
                log::debug!("{name} failed, omitting: {e}");
                None
            }
        },
    }
}

/// Entry point for analysing parsed emails with a fixed configuration.
pub struct Analyzer {
    config: Config,
}

impl Analyzer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn analyze(&self, eml: Eml) -> Result<Response, DetectorError> {
        let detectors = DetectorSet::build(&self.config)?;
        log::debug!("Running detectors: {}", detectors.names().join(", "));
        Ok(detectors
            .run(eml, self.config.analysis.id_strategy)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::VerdictDetail;
    use async_trait::async_trait;

    enum Behavior {
        Report(bool),
        Absent,
        Fail,
        Panic,
    }

    struct FixedDetector {
        name: String,
        policy: ReportPolicy,
        behavior: Behavior,
    }

    impl FixedDetector {
        fn boxed(name: &str, policy: ReportPolicy, behavior: Behavior) -> Box<dyn Detector> {
            Box::new(Self {
                name: name.to_string(),
                policy,
                behavior,
            })
        }
    }

    #[async_trait]
    impl Detector for FixedDetector {
        fn name(&self) -> &str {
            &self.name
        }

        fn policy(&self) -> ReportPolicy {
            self.policy
        }

        async fn detect(&self, _input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
            match self.behavior {
                Behavior::Report(malicious) => Ok(Verdict::new(
                    &self.name,
                    malicious,
                    vec![VerdictDetail::new("k", "d")],
                )
                .into()),
                Behavior::Absent => Ok(Outcome::Absent),
                Behavior::Fail => Err(DetectorError::Other("service unavailable".to_string())),
                Behavior::Panic => panic!("detector exploded"),
            }
        }
    }

    fn names(response: &Response) -> Vec<&str> {
        response.verdicts.iter().map(|v| v.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_verdicts_follow_invocation_order() {
        let set = DetectorSet::new(vec![
            FixedDetector::boxed("first", ReportPolicy::Always, Behavior::Report(true)),
            FixedDetector::boxed("skipped", ReportPolicy::Always, Behavior::Absent),
            FixedDetector::boxed("second", ReportPolicy::OnSignal, Behavior::Report(false)),
        ]);
        let response = set.run(Eml::default(), IdStrategy::Random).await;
        assert_eq!(names(&response), vec!["first", "second"]);
        assert_eq!(response.malicious_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_follows_policy() {
        let set = DetectorSet::new(vec![
            FixedDetector::boxed("always", ReportPolicy::Always, Behavior::Fail),
            FixedDetector::boxed("on-signal", ReportPolicy::OnSignal, Behavior::Fail),
        ]);
        let response = set.run(Eml::default(), IdStrategy::Random).await;
        assert_eq!(names(&response), vec!["always"]);
        let verdict = &response.verdicts[0];
        assert!(!verdict.malicious);
        assert_eq!(verdict.error.as_deref(), Some("service unavailable"));
    }

    #[tokio::test]
    async fn test_panicking_detector_is_isolated() {
        let set = DetectorSet::new(vec![
            FixedDetector::boxed("boom", ReportPolicy::Always, Behavior::Panic),
            FixedDetector::boxed("quiet-boom", ReportPolicy::OnSignal, Behavior::Panic),
            FixedDetector::boxed("survivor", ReportPolicy::Always, Behavior::Report(false)),
        ]);
        let response = set.run(Eml::default(), IdStrategy::Random).await;
        assert_eq!(names(&response), vec!["boom", "survivor"]);
        assert_eq!(
            response.verdicts[0].error.as_deref(),
            Some("Detector panicked: detector exploded")
        );
    }

    #[tokio::test]
    async fn test_content_id_is_stable() {
        let set = DetectorSet::new(Vec::new());
        let first = set.run(Eml::default(), IdStrategy::Content).await;
        let second = set.run(Eml::default(), IdStrategy::Content).await;
        assert!(first.verdicts.is_empty());
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_build_respects_toggles() {
        let mut config = Config::default();
        config.ipqs.api_key = Some("test-key".to_string());
        let set = DetectorSet::build(&config).unwrap();
        assert_eq!(
            set.names(),
            vec![
                "Email Authentication",
                "Homoglyph Detection",
                "URL Unshortening",
                "IPQS IP",
                "IPQS URL",
                "IPQS Email",
            ]
        );

        config.detectors.email_auth = false;
        config.detectors.homoglyph = false;
        config.detectors.unshorten = false;
        let set = DetectorSet::build(&config).unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_build_rejects_invalid_fanout() {
        let mut config = Config::default();
        config.fanout.max_at_once = 0;
        assert!(matches!(
            DetectorSet::build(&config),
            Err(DetectorError::FanOut(_))
        ));
    }
}
