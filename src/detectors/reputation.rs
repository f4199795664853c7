use super::{DetectionInput, Detector};
use crate::error::DetectorError;
use crate::fanout::{pair_results, FanOut};
use crate::reputation::{IpqsEmailLookup, IpqsIpLookup, IpqsUrlLookup, ReputationClient};
use crate::verdict::{Outcome, ReportPolicy, Verdict, VerdictDetail};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

pub const IP_NAME: &str = "IPQS IP";
pub const URL_NAME: &str = "IPQS URL";
pub const EMAIL_NAME: &str = "IPQS Email";

/// Scores strictly above this mark an item as malicious.
pub const FRAUD_SCORE_THRESHOLD: f64 = 75.0;

const MALICIOUS_SCORE: f64 = 100.0;

fn is_global_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, d] = ip.octets();
    !(a == 0
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_documentation()
        || ip.is_multicast()
        // shared address space, 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
        // benchmarking, 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
        // reserved 240.0.0.0/4, including broadcast
        || a >= 240
        // IETF protocol assignments, except the two globally routable relays
        || (a == 192 && b == 0 && c == 0 && d != 9 && d != 10))
}

fn is_global_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_global_v4(&v4);
    }

    let segments = ip.segments();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // unique local, fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // link local, fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
        // documentation, 2001:db8::/32
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        // discard-only, 100::/64
        || (segments[0] == 0x0100 && segments[1..4] == [0, 0, 0])
        // IETF protocol assignments, 2001::/23
        || (segments[0] == 0x2001
            && segments[1] < 0x0200
            && !is_global_protocol_assignment(&segments)))
}

/// Globally reachable carve-outs inside 2001::/23: the PCP and TURN
/// anycast addresses, AMT, AS112-v6 and ORCHIDv2.
fn is_global_protocol_assignment(segments: &[u16; 8]) -> bool {
    let anycast =
        segments[1] == 1 && segments[2..7] == [0, 0, 0, 0, 0] && matches!(segments[7], 1 | 2);
    let amt = segments[1] == 3;
    let as112 = segments[1] == 4 && segments[2] == 0x0112;
    let orchid = (segments[1] & 0xfff0) == 0x0020;
    anycast || amt || as112 || orchid
}

pub fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => is_global_v6(v6),
    }
}

/// Parse, deduplicate and keep only the globally routable addresses.
pub fn filter_global_ips<'a>(ips: impl IntoIterator<Item = &'a String>) -> BTreeSet<IpAddr> {
    ips.into_iter()
        .filter_map(|ip| match ip.trim().parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                log::debug!("Ignoring unparseable IP address: {ip}");
                None
            }
        })
        .filter(is_global)
        .collect()
}

fn flag_suffix(flags: &[(bool, &str)]) -> String {
    let set: Vec<&str> = flags
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, label)| *label)
        .collect();
    if set.is_empty() {
        String::new()
    } else {
        format!(" ({})", set.join(", "))
    }
}

fn benign(name: &str, description: impl Into<String>) -> Verdict {
    Verdict::new(name, false, vec![VerdictDetail::new("benign", description)])
}

fn flagged(name: &str, details: Vec<VerdictDetail>) -> Verdict {
    Verdict::new(name, true, details).with_score(Some(MALICIOUS_SCORE))
}

pub fn transform_ip(lookups: &[(IpAddr, IpqsIpLookup)], name: &str) -> Verdict {
    let details: Vec<VerdictDetail> = lookups
        .iter()
        .filter(|(_, result)| result.fraud_score > FRAUD_SCORE_THRESHOLD)
        .map(|(ip, result)| {
            let flags = flag_suffix(&[
                (result.proxy, "proxy"),
                (result.vpn, "VPN"),
                (result.tor, "Tor"),
                (result.bot_status, "bot"),
                (result.recent_abuse, "recent abuse"),
            ]);
            VerdictDetail::scored(
                ip.to_string(),
                result.fraud_score,
                format!("{ip} has fraud score {}{flags}.", result.fraud_score),
            )
            .with_reference_link(format!(
                "https://ipqualityscore.com/free-ip-lookup-proxy-vpn-test/lookup/{ip}"
            ))
        })
        .collect();

    if details.is_empty() {
        return benign(name, "No suspicious IPs detected by IPQS.");
    }
    flagged(name, details)
}

pub fn transform_url(lookups: &[(String, IpqsUrlLookup)], name: &str) -> Verdict {
    let details: Vec<VerdictDetail> = lookups
        .iter()
        .filter(|(_, result)| result.unsafe_ || result.risk_score > FRAUD_SCORE_THRESHOLD)
        .map(|(url, result)| {
            let flags = flag_suffix(&[
                (result.phishing, "phishing"),
                (result.malware, "malware"),
                (result.spamming, "spamming"),
                (result.suspicious, "suspicious"),
            ]);
            VerdictDetail::scored(
                url.clone(),
                result.risk_score,
                format!("{url} has risk score {}{flags}.", result.risk_score),
            )
            .with_reference_link(format!(
                "https://ipqualityscore.com/threat-intelligence/malicious-url-scanner/lookup/{url}"
            ))
        })
        .collect();

    if details.is_empty() {
        return benign(name, "No malicious URLs or domains detected by IPQS.");
    }
    flagged(name, details)
}

pub fn transform_email(email: &str, result: &IpqsEmailLookup, name: &str) -> Verdict {
    if result.fraud_score <= FRAUD_SCORE_THRESHOLD {
        return benign(name, format!("{email} is not suspicious according to IPQS."));
    }

    let flags = flag_suffix(&[
        (result.disposable, "disposable"),
        (result.honeypot, "honeypot"),
        (result.recent_abuse, "recent abuse"),
        (result.suspect, "suspect"),
        (result.leaked, "leaked"),
    ]);
    flagged(
        name,
        vec![VerdictDetail::scored(
            email,
            result.fraud_score,
            format!("{email} has fraud score {}{flags}.", result.fraud_score),
        )
        .with_reference_link(format!(
            "https://ipqualityscore.com/free-email-verifier/lookup/{email}"
        ))],
    )
}

/// Look up every global IP; failed lookups are dropped.
pub async fn bulk_lookup_ips(
    fanout: &FanOut,
    client: &dyn ReputationClient,
    ips: BTreeSet<IpAddr>,
) -> Vec<(IpAddr, IpqsIpLookup)> {
    let keys: Vec<IpAddr> = ips.into_iter().collect();
    let addresses: Vec<String> = keys.iter().map(IpAddr::to_string).collect();
    let units = addresses
        .iter()
        .map(|ip| move || client.lookup_ip(ip))
        .collect::<Vec<_>>();
    let results = fanout.run_all(units).await;
    pair_results(keys, results)
}

pub async fn bulk_lookup_urls(
    fanout: &FanOut,
    client: &dyn ReputationClient,
    urls: Vec<String>,
) -> Vec<(String, IpqsUrlLookup)> {
    let units = urls
        .iter()
        .map(|url| move || client.lookup_url(url))
        .collect::<Vec<_>>();
    let results = fanout.run_all(units).await;
    pair_results(urls, results)
}

pub struct IpqsIpDetector {
    name: String,
    client: Arc<dyn ReputationClient>,
    fanout: Arc<FanOut>,
}

impl IpqsIpDetector {
    pub fn new(client: Arc<dyn ReputationClient>, fanout: Arc<FanOut>) -> Self {
        Self {
            name: IP_NAME.to_string(),
            client,
            fanout,
        }
    }
}

#[async_trait]
impl Detector for IpqsIpDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ReportPolicy {
        ReportPolicy::Always
    }

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
        let ips = filter_global_ips(&input.iocs.ip_addresses);
        log::debug!(
            "IPQS: {} of {} IP address(es) are global",
            ips.len(),
            input.iocs.ip_addresses.len()
        );

        let lookups = if ips.is_empty() {
            Vec::new()
        } else {
            bulk_lookup_ips(&self.fanout, self.client.as_ref(), ips).await
        };
        Ok(transform_ip(&lookups, &self.name).into())
    }
}

pub struct IpqsUrlDetector {
    name: String,
    client: Arc<dyn ReputationClient>,
    fanout: Arc<FanOut>,
}

impl IpqsUrlDetector {
    pub fn new(client: Arc<dyn ReputationClient>, fanout: Arc<FanOut>) -> Self {
        Self {
            name: URL_NAME.to_string(),
            client,
            fanout,
        }
    }
}

#[async_trait]
impl Detector for IpqsUrlDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ReportPolicy {
        ReportPolicy::Always
    }

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
        let urls: Vec<String> = input.iocs.urls.iter().cloned().collect();
        let lookups = if urls.is_empty() {
            Vec::new()
        } else {
            bulk_lookup_urls(&self.fanout, self.client.as_ref(), urls).await
        };
        Ok(transform_url(&lookups, &self.name).into())
    }
}

pub struct IpqsEmailDetector {
    name: String,
    client: Arc<dyn ReputationClient>,
}

impl IpqsEmailDetector {
    pub fn new(client: Arc<dyn ReputationClient>) -> Self {
        Self {
            name: EMAIL_NAME.to_string(),
            client,
        }
    }
}

#[async_trait]
impl Detector for IpqsEmailDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ReportPolicy {
        ReportPolicy::Always
    }

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
        let Some(email) = input.sender() else {
            return Ok(Outcome::Absent);
        };

        let result = self.client.lookup_email(email).await?;
        Ok(transform_email(email, &result, &self.name).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{Body, Eml, Header};
    use crate::error::ReputationError;
    use crate::fanout::FanOutConfig;
    use crate::ioc::Iocs;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reputation client answering from fixed tables; unknown values fail.
    #[derive(Default)]
    struct MockReputation {
        ips: HashMap<String, IpqsIpLookup>,
        urls: HashMap<String, IpqsUrlLookup>,
        emails: HashMap<String, IpqsEmailLookup>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReputationClient for MockReputation {
        async fn lookup_ip(&self, ip: &str) -> Result<IpqsIpLookup, ReputationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ips
                .get(ip)
                .cloned()
                .ok_or_else(|| ReputationError::Service(format!("no data for {ip}")))
        }

        async fn lookup_url(&self, url: &str) -> Result<IpqsUrlLookup, ReputationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls
                .get(url)
                .cloned()
                .ok_or_else(|| ReputationError::Service(format!("no data for {url}")))
        }

        async fn lookup_email(&self, email: &str) -> Result<IpqsEmailLookup, ReputationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.emails
                .get(email)
                .cloned()
                .ok_or_else(|| ReputationError::Service("quota exceeded".to_string()))
        }
    }

    fn fanout() -> Arc<FanOut> {
        Arc::new(FanOut::new(&FanOutConfig::default()).unwrap())
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn eml(ips: &[&str], urls: &[&str], from: Option<&str>) -> Eml {
        Eml {
            bodies: vec![Body {
                ip_addresses: strings(ips),
                urls: strings(urls),
                ..Default::default()
            }],
            header: Header {
                from_: from.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn run(detector: &dyn Detector, eml: &Eml) -> Result<Outcome, DetectorError> {
        let iocs = Iocs::from_eml(eml);
        detector.detect(&DetectionInput::new(eml, &iocs)).await
    }

    #[test]
    fn test_filter_global_ips() {
        let input = strings(&[
            "8.8.8.8",
            "8.8.8.8",
            "192.168.1.1",
            "10.0.0.1",
            "172.16.5.4",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "192.0.2.1",
            "198.18.0.1",
            "240.0.0.1",
            "255.255.255.255",
            "224.0.0.1",
            "0.0.0.0",
            "::1",
            "fe80::1",
            "fd00::1",
            "2001:db8::1",
            "::ffff:192.168.0.1",
            "::ffff:1.1.1.1",
            "2606:4700:4700::1111",
            "not-an-ip",
        ]);
        let global: Vec<String> = filter_global_ips(&input)
            .iter()
            .map(IpAddr::to_string)
            .collect();
        assert_eq!(
            global,
            vec!["8.8.8.8", "::ffff:1.1.1.1", "2606:4700:4700::1111"]
        );
    }

    #[test]
    fn test_protocol_assignment_carve_outs_are_global() {
        for ip in [
            "2001:1::1",
            "2001:1::2",
            "2001:3::1",
            "2001:4:112::1",
            "2001:20::1",
            "2001:2f::1",
        ] {
            assert!(is_global(&ip.parse().unwrap()), "{ip}");
        }
        for ip in ["2001::1", "2001:1::3", "2001:2::1", "2001:4::1", "2001:30::1"] {
            assert!(!is_global(&ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn test_transform_ip_threshold_is_strict() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let at_threshold = IpqsIpLookup {
            fraud_score: 75.0,
            ..Default::default()
        };
        let verdict = transform_ip(&[(ip, at_threshold)], IP_NAME);
        assert!(!verdict.malicious);
        assert_eq!(verdict.details[0].key, "benign");
        assert_eq!(verdict.details[0].description, "No suspicious IPs detected by IPQS.");
    }

    #[test]
    fn test_transform_ip_malicious_detail() {
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let result = IpqsIpLookup {
            fraud_score: 90.0,
            proxy: true,
            tor: true,
            ..Default::default()
        };
        let verdict = transform_ip(&[(ip, result)], IP_NAME);
        assert!(verdict.malicious);
        assert_eq!(verdict.score, Some(100.0));
        let detail = &verdict.details[0];
        assert_eq!(detail.key, "1.2.3.4");
        assert_eq!(detail.score, Some(90.0));
        assert_eq!(detail.description, "1.2.3.4 has fraud score 90 (proxy, Tor).");
        assert_eq!(
            detail.reference_link.as_deref(),
            Some("https://ipqualityscore.com/free-ip-lookup-proxy-vpn-test/lookup/1.2.3.4")
        );
    }

    #[test]
    fn test_transform_url_unsafe_flag_alone_is_malicious() {
        let result = IpqsUrlLookup {
            unsafe_: true,
            risk_score: 10.0,
            phishing: true,
            ..Default::default()
        };
        let verdict = transform_url(&[("https://bad.example/".to_string(), result)], URL_NAME);
        assert!(verdict.malicious);
        assert_eq!(
            verdict.details[0].description,
            "https://bad.example/ has risk score 10 (phishing)."
        );
    }

    #[test]
    fn test_transform_email() {
        let clean = transform_email("a@example.com", &IpqsEmailLookup::default(), EMAIL_NAME);
        assert!(!clean.malicious);
        assert_eq!(
            clean.details[0].description,
            "a@example.com is not suspicious according to IPQS."
        );

        let bad = IpqsEmailLookup {
            fraud_score: 99.0,
            disposable: true,
            leaked: true,
            ..Default::default()
        };
        let verdict = transform_email("a@example.com", &bad, EMAIL_NAME);
        assert!(verdict.malicious);
        assert_eq!(
            verdict.details[0].description,
            "a@example.com has fraud score 99 (disposable, leaked)."
        );
    }

    #[tokio::test]
    async fn test_private_ips_make_no_calls() {
        let client = Arc::new(MockReputation::default());
        let detector = IpqsIpDetector::new(client.clone(), fanout());
        let outcome = run(&detector, &eml(&["192.168.1.1", "10.0.0.1"], &[], None))
            .await
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let verdict = outcome.into_verdict().unwrap();
        assert_eq!(verdict.name, IP_NAME);
        assert!(!verdict.malicious);
        assert_eq!(verdict.details[0].key, "benign");
    }

    #[tokio::test]
    async fn test_failed_ip_lookup_is_dropped() {
        let mut client = MockReputation::default();
        client.ips.insert(
            "8.8.4.4".to_string(),
            IpqsIpLookup {
                fraud_score: 80.0,
                ..Default::default()
            },
        );
        let client = Arc::new(client);
        let detector = IpqsIpDetector::new(client.clone(), fanout());
        let verdict = run(&detector, &eml(&["8.8.4.4", "1.1.1.1"], &[], None))
            .await
            .unwrap()
            .into_verdict()
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert!(verdict.malicious);
        assert_eq!(verdict.details.len(), 1);
        assert_eq!(verdict.details[0].key, "8.8.4.4");
    }

    #[tokio::test]
    async fn test_url_detector() {
        let mut client = MockReputation::default();
        client.urls.insert(
            "https://bad.example/login".to_string(),
            IpqsUrlLookup {
                risk_score: 85.0,
                malware: true,
                ..Default::default()
            },
        );
        let detector = IpqsUrlDetector::new(Arc::new(client), fanout());
        let verdict = run(
            &detector,
            &eml(&[], &["https://bad.example/login", "https://ok.example/"], None),
        )
        .await
        .unwrap()
        .into_verdict()
        .unwrap();

        assert!(verdict.malicious);
        assert_eq!(verdict.details.len(), 1);
        assert_eq!(verdict.details[0].score, Some(85.0));
    }

    #[tokio::test]
    async fn test_email_detector_without_sender_is_absent() {
        let client = Arc::new(MockReputation::default());
        let detector = IpqsEmailDetector::new(client.clone());
        let outcome = run(&detector, &eml(&[], &[], None)).await.unwrap();
        assert_eq!(outcome, Outcome::Absent);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_email_detector_propagates_lookup_failure() {
        let detector = IpqsEmailDetector::new(Arc::new(MockReputation::default()));
        let result = run(&detector, &eml(&[], &[], Some("a@example.com"))).await;
        assert!(matches!(
            result,
            Err(DetectorError::Reputation(ReputationError::Service(_)))
        ));
    }
}
