//! Email authentication chain verifier.
//!
//! Reads the SPF, DKIM and DMARC outcomes recorded by upstream MTAs in
//! `Authentication-Results` (falling back to `Received-SPF` for SPF) and
//! looks up the sender domain's published DMARC policy.

use super::{DetectionInput, Detector};
use crate::dns::TxtResolver;
use crate::domain_utils::DomainUtils;
use crate::email::HeaderValue;
use crate::error::DetectorError;
use crate::verdict::{Outcome, ReportPolicy, Verdict, VerdictDetail};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

pub const NAME: &str = "Email Authentication";

lazy_static! {
    static ref AUTH_RESULT_RE: Regex = Regex::new(
        r"(?i)\b(spf|dkim|dmarc)\s*=\s*(pass|fail|softfail|neutral|none|temperror|permerror|policy)"
    )
    .unwrap();
    static ref RECEIVED_SPF_RE: Regex =
        Regex::new(r"(?i)^\s*(pass|fail|softfail|neutral|none|temperror|permerror)").unwrap();
    static ref DMARC_POLICY_RE: Regex =
        Regex::new(r"(?i)\bp=(none|quarantine|reject)\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Spf,
    Dkim,
    Dmarc,
}

impl AuthMethod {
    pub const ALL: [AuthMethod; 3] = [AuthMethod::Spf, AuthMethod::Dkim, AuthMethod::Dmarc];

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "spf" => Some(AuthMethod::Spf),
            "dkim" => Some(AuthMethod::Dkim),
            "dmarc" => Some(AuthMethod::Dmarc),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            AuthMethod::Spf => "spf",
            AuthMethod::Dkim => "dkim",
            AuthMethod::Dmarc => "dmarc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
    Policy,
}

impl AuthResult {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pass" => Some(AuthResult::Pass),
            "fail" => Some(AuthResult::Fail),
            "softfail" => Some(AuthResult::SoftFail),
            "neutral" => Some(AuthResult::Neutral),
            "none" => Some(AuthResult::None),
            "temperror" => Some(AuthResult::TempError),
            "permerror" => Some(AuthResult::PermError),
            "policy" => Some(AuthResult::Policy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthResult::Pass => "pass",
            AuthResult::Fail => "fail",
            AuthResult::SoftFail => "softfail",
            AuthResult::Neutral => "neutral",
            AuthResult::None => "none",
            AuthResult::TempError => "temperror",
            AuthResult::PermError => "permerror",
            AuthResult::Policy => "policy",
        }
    }

    /// Severity on the 0-100 scale, 0 being a clean pass.
    pub fn severity(&self) -> f64 {
        match self {
            AuthResult::Pass => 0.0,
            AuthResult::None | AuthResult::Neutral | AuthResult::TempError => 25.0,
            AuthResult::PermError | AuthResult::Policy => 50.0,
            AuthResult::SoftFail => 75.0,
            AuthResult::Fail => 100.0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, AuthResult::Fail | AuthResult::SoftFail)
    }
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthResults {
    pub spf: Option<AuthResult>,
    pub dkim: Option<AuthResult>,
    pub dmarc: Option<AuthResult>,
}

impl AuthResults {
    pub fn get(&self, method: AuthMethod) -> Option<AuthResult> {
        match method {
            AuthMethod::Spf => self.spf,
            AuthMethod::Dkim => self.dkim,
            AuthMethod::Dmarc => self.dmarc,
        }
    }

    fn slot(&mut self, method: AuthMethod) -> &mut Option<AuthResult> {
        match method {
            AuthMethod::Spf => &mut self.spf,
            AuthMethod::Dkim => &mut self.dkim,
            AuthMethod::Dmarc => &mut self.dmarc,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spf.is_none() && self.dkim.is_none() && self.dmarc.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmarcPolicy {
    None,
    Quarantine,
    Reject,
}

impl DmarcPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(DmarcPolicy::None),
            "quarantine" => Some(DmarcPolicy::Quarantine),
            "reject" => Some(DmarcPolicy::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DmarcPolicy::None => "none",
            DmarcPolicy::Quarantine => "quarantine",
            DmarcPolicy::Reject => "reject",
        }
    }
}

/// Outcome of a DMARC policy query. `Failed` is kept apart from `NoPolicy`
/// for logging, but both mean "no policy asserted" to the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmarcLookup {
    Policy(DmarcPolicy),
    NoPolicy,
    Failed,
}

impl DmarcLookup {
    pub fn policy(&self) -> Option<DmarcPolicy> {
        match self {
            DmarcLookup::Policy(policy) => Some(*policy),
            DmarcLookup::NoPolicy | DmarcLookup::Failed => None,
        }
    }
}

/// First result per method wins; non-text header values are skipped.
pub fn parse_authentication_results<'a>(
    values: impl IntoIterator<Item = &'a HeaderValue>,
) -> AuthResults {
    let mut results = AuthResults::default();

    for value in values.into_iter().filter_map(HeaderValue::as_text) {
        for caps in AUTH_RESULT_RE.captures_iter(value) {
            let method = AuthMethod::parse(&caps[1]);
            let result = AuthResult::parse(&caps[2]);
            if let (Some(method), Some(result)) = (method, result) {
                let slot = results.slot(method);
                if slot.is_none() {
                    *slot = Some(result);
                }
            }
        }
    }

    results
}

/// `Received-SPF` values start with the outcome word, e.g.
/// `Fail (protection.outlook.com: domain of example.com does not designate ...)`.
pub fn parse_received_spf<'a>(
    values: impl IntoIterator<Item = &'a HeaderValue>,
) -> Option<AuthResult> {
    values
        .into_iter()
        .filter_map(HeaderValue::as_text)
        .find_map(|value| {
            RECEIVED_SPF_RE
                .captures(value)
                .and_then(|caps| AuthResult::parse(&caps[1]))
        })
}

/// Extract the `p=` tag from the first `v=DMARC1` record that carries one.
pub fn parse_dmarc_records(records: &[String]) -> Option<DmarcPolicy> {
    records
        .iter()
        .filter(|record| record.starts_with("v=DMARC1"))
        .find_map(|record| {
            DMARC_POLICY_RE
                .captures(record)
                .and_then(|caps| DmarcPolicy::parse(&caps[1]))
        })
}

pub async fn lookup_dmarc_policy(resolver: &dyn TxtResolver, domain: &str) -> DmarcLookup {
    let name = format!("_dmarc.{domain}");
    match resolver.txt_lookup(&name).await {
        Ok(records) => match parse_dmarc_records(&records) {
            Some(policy) => {
                log::debug!("DMARC policy for {domain}: p={}", policy.as_str());
                DmarcLookup::Policy(policy)
            }
            None => DmarcLookup::NoPolicy,
        },
        Err(e) => {
            log::debug!("DMARC lookup failed for {domain}: {e}");
            DmarcLookup::Failed
        }
    }
}

pub fn transform(results: &AuthResults, dmarc_policy: Option<DmarcPolicy>, name: &str) -> Verdict {
    let mut details = Vec::new();
    let mut malicious = false;

    for method in AuthMethod::ALL {
        if let Some(result) = results.get(method) {
            // DKIM failing on its own does not make the message malicious
            if result.is_failure() && method != AuthMethod::Dkim {
                malicious = true;
            }
            details.push(VerdictDetail::scored(
                method.key(),
                result.severity(),
                format!("{}: {}", method.key().to_uppercase(), result),
            ));
        }
    }

    if let Some(policy) = dmarc_policy {
        details.push(VerdictDetail::new(
            "dmarc_policy",
            format!("DMARC policy: p={}", policy.as_str()),
        ));
    }

    if details.is_empty() {
        details.push(VerdictDetail::new(
            "no_auth",
            "No SPF/DKIM/DMARC authentication results found",
        ));
    }

    let score = Verdict::max_detail_score(&details);
    Verdict::new(name, malicious, details).with_score(score)
}

pub struct EmailAuthDetector {
    name: String,
    resolver: Arc<dyn TxtResolver>,
}

impl EmailAuthDetector {
    pub fn new(resolver: Arc<dyn TxtResolver>) -> Self {
        Self {
            name: NAME.to_string(),
            resolver,
        }
    }
}

#[async_trait]
impl Detector for EmailAuthDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ReportPolicy {
        ReportPolicy::OnSignal
    }

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
        let header = &input.eml.header;
        let mut results = parse_authentication_results(header.values("authentication-results"));

        if results.spf.is_none() {
            results.spf = parse_received_spf(header.values("received-spf"));
        }

        let dmarc_policy = match input.sender().and_then(DomainUtils::extract_domain) {
            Some(domain) => lookup_dmarc_policy(self.resolver.as_ref(), &domain)
                .await
                .policy(),
            None => None,
        };

        if results.is_empty() && dmarc_policy.is_none() {
            log::debug!("No authentication results or DMARC policy found");
            return Ok(Outcome::Absent);
        }

        Ok(transform(&results, dmarc_policy, &self.name).into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::email::{Eml, Header};
    use crate::error::DnsError;
    use crate::ioc::Iocs;
    use std::collections::HashMap;

    /// Resolver answering from a fixed table; unknown names fail.
    pub(crate) struct StaticResolver {
        records: HashMap<String, Vec<String>>,
    }

    impl StaticResolver {
        pub(crate) fn new(entries: &[(&str, &str)]) -> Self {
            let mut records: HashMap<String, Vec<String>> = HashMap::new();
            for (name, record) in entries {
                records
                    .entry(name.to_string())
                    .or_default()
                    .push(record.to_string());
            }
            Self { records }
        }
    }

    #[async_trait]
    impl TxtResolver for StaticResolver {
        async fn txt_lookup(&self, name: &str) -> Result<Vec<String>, DnsError> {
            self.records
                .get(name)
                .cloned()
                .ok_or_else(|| DnsError::Timeout(name.to_string()))
        }
    }

    fn text(values: &[&str]) -> Vec<HeaderValue> {
        values.iter().map(|v| HeaderValue::from(*v)).collect()
    }

    fn eml_with_headers(headers: &[(&str, &str)], from: Option<&str>) -> Eml {
        let mut header = Header {
            subject: "Test".to_string(),
            to: vec!["test@example.com".to_string()],
            from_: from.map(str::to_string),
            ..Default::default()
        };
        for (name, value) in headers {
            header
                .header
                .entry(name.to_string())
                .or_default()
                .push(HeaderValue::from(*value));
        }
        Eml {
            header,
            ..Default::default()
        }
    }

    async fn run(detector: &EmailAuthDetector, eml: &Eml) -> Outcome {
        let iocs = Iocs::from_eml(eml);
        detector
            .detect(&DetectionInput::new(eml, &iocs))
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_authentication_results_spf() {
        let values = text(&[
            "mx.google.com; spf=neutral (google.com: 203.12.160.161 is neither permitted) smtp.mail=test@example.com",
        ]);
        let results = parse_authentication_results(&values);
        assert_eq!(results.spf, Some(AuthResult::Neutral));
    }

    #[test]
    fn test_parse_authentication_results_first_match_wins() {
        let values = text(&[
            "antispamcloud.com; spf=pass smtp.mailfrom=user@example.com; dkim=pass header.i=example.com; dkim=fail header.i=other.com",
            "second.example; SPF=FAIL; dmarc=none",
        ]);
        let results = parse_authentication_results(&values);
        assert_eq!(results.spf, Some(AuthResult::Pass));
        assert_eq!(results.dkim, Some(AuthResult::Pass));
        assert_eq!(results.dmarc, Some(AuthResult::None));
    }

    #[test]
    fn test_parse_authentication_results_case_insensitive() {
        let values = text(&["mx.example.com; DMARC=Fail (p=reject) header.from=example.com"]);
        assert_eq!(
            parse_authentication_results(&values).dmarc,
            Some(AuthResult::Fail)
        );
    }

    #[test]
    fn test_parse_authentication_results_ignores_numbers() {
        let values = vec![HeaderValue::Number(42), HeaderValue::Number(100)];
        assert!(parse_authentication_results(&values).is_empty());
        assert!(parse_authentication_results(&Vec::<HeaderValue>::new()).is_empty());
    }

    #[test]
    fn test_parse_received_spf() {
        let values = text(&["Fail (protection.outlook.com: domain of example.com does not designate)"]);
        assert_eq!(parse_received_spf(&values), Some(AuthResult::Fail));

        let values = vec![HeaderValue::Number(1), HeaderValue::from("  softfail (x)")];
        assert_eq!(parse_received_spf(&values), Some(AuthResult::SoftFail));

        assert_eq!(parse_received_spf(&text(&["garbage"])), None);
    }

    #[test]
    fn test_parse_dmarc_records() {
        let records = vec![
            "google-site-verification=abc".to_string(),
            "v=DMARC1; sp=none; p=Reject; rua=mailto:d@example.com".to_string(),
        ];
        assert_eq!(parse_dmarc_records(&records), Some(DmarcPolicy::Reject));
        assert_eq!(parse_dmarc_records(&["v=DMARC1; rua=x".to_string()]), None);
        assert_eq!(parse_dmarc_records(&["p=reject".to_string()]), None);
    }

    #[test]
    fn test_severity_table() {
        let table = [
            ("pass", 0.0),
            ("none", 25.0),
            ("neutral", 25.0),
            ("temperror", 25.0),
            ("permerror", 50.0),
            ("policy", 50.0),
            ("softfail", 75.0),
            ("fail", 100.0),
        ];
        for (result, severity) in table {
            assert_eq!(AuthResult::parse(result).unwrap().severity(), severity);
        }
    }

    #[test]
    fn test_transform_detail_scores() {
        let results = AuthResults {
            spf: Some(AuthResult::Pass),
            dkim: Some(AuthResult::SoftFail),
            dmarc: Some(AuthResult::None),
        };
        let verdict = transform(&results, None, "test");
        let scores: Vec<_> = verdict
            .details
            .iter()
            .map(|d| (d.key.as_str(), d.score))
            .collect();
        assert_eq!(
            scores,
            vec![("spf", Some(0.0)), ("dkim", Some(75.0)), ("dmarc", Some(25.0))]
        );
        // DKIM softfail alone is not malicious
        assert!(!verdict.malicious);
    }

    #[test]
    fn test_transform_verdict_score_is_max() {
        let results = AuthResults {
            spf: Some(AuthResult::Neutral),
            dkim: Some(AuthResult::Pass),
            dmarc: Some(AuthResult::PermError),
        };
        assert_eq!(transform(&results, None, "test").score, Some(50.0));
    }

    #[test]
    fn test_transform_malicious_rules() {
        let dkim_fail = AuthResults {
            dkim: Some(AuthResult::Fail),
            ..Default::default()
        };
        let verdict = transform(&dkim_fail, None, "test");
        assert!(!verdict.malicious);
        assert_eq!(verdict.score, Some(100.0));

        let spf_softfail = AuthResults {
            spf: Some(AuthResult::SoftFail),
            ..Default::default()
        };
        assert!(transform(&spf_softfail, None, "test").malicious);

        let dmarc_fail = AuthResults {
            spf: Some(AuthResult::Pass),
            dmarc: Some(AuthResult::Fail),
            ..Default::default()
        };
        assert!(transform(&dmarc_fail, None, "test").malicious);
    }

    #[test]
    fn test_transform_dmarc_policy_only_has_no_score() {
        let verdict = transform(&AuthResults::default(), Some(DmarcPolicy::Reject), "test");
        assert_eq!(verdict.score, None);
        assert_eq!(verdict.details.len(), 1);
        assert_eq!(verdict.details[0].key, "dmarc_policy");
        assert_eq!(verdict.details[0].score, None);
        assert_eq!(verdict.details[0].description, "DMARC policy: p=reject");
    }

    #[tokio::test]
    async fn test_spf_fail_end_to_end() {
        let detector = EmailAuthDetector::new(Arc::new(StaticResolver::new(&[])));
        let eml = eml_with_headers(
            &[(
                "authentication-results",
                "mx.example.com; spf=fail smtp.mailfrom=evil@spoofed.com",
            )],
            Some("test@invalid.test"),
        );

        let Outcome::Verdict(verdict) = run(&detector, &eml).await else {
            panic!("expected a verdict");
        };
        assert_eq!(verdict.name, NAME);
        assert!(verdict.malicious);
        assert_eq!(verdict.score, Some(100.0));
        assert_eq!(verdict.details.len(), 1);
        assert_eq!(verdict.details[0].key, "spf");
        assert_eq!(verdict.details[0].score, Some(100.0));
    }

    #[tokio::test]
    async fn test_received_spf_fallback() {
        let detector = EmailAuthDetector::new(Arc::new(StaticResolver::new(&[])));
        let eml = eml_with_headers(
            &[(
                "Received-SPF",
                "Fail (protection.outlook.com: domain of example.com does not designate)",
            )],
            Some("test@invalid.test"),
        );

        let verdict = run(&detector, &eml).await.into_verdict().unwrap();
        let spf = verdict.details.iter().find(|d| d.key == "spf").unwrap();
        assert_eq!(spf.score, Some(100.0));
    }

    #[tokio::test]
    async fn test_dmarc_policy_from_dns() {
        let resolver = StaticResolver::new(&[("_dmarc.example.com", "v=DMARC1; p=quarantine")]);
        let detector = EmailAuthDetector::new(Arc::new(resolver));
        let eml = eml_with_headers(&[], Some("User@Example.com"));

        let verdict = run(&detector, &eml).await.into_verdict().unwrap();
        assert!(!verdict.malicious);
        assert_eq!(verdict.score, None);
        assert_eq!(verdict.details[0].description, "DMARC policy: p=quarantine");
    }

    #[tokio::test]
    async fn test_no_signal_is_absent() {
        let detector = EmailAuthDetector::new(Arc::new(StaticResolver::new(&[])));
        let eml = eml_with_headers(&[("subject", "hello")], Some("test@invalid.test"));
        assert_eq!(run(&detector, &eml).await, Outcome::Absent);

        let no_sender = eml_with_headers(&[], None);
        assert_eq!(run(&detector, &no_sender).await, Outcome::Absent);
    }
}
