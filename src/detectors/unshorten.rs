use super::{DetectionInput, Detector};
use crate::domain_utils::DomainUtils;
use crate::error::DetectorError;
use crate::fanout::{pair_results, FanOut};
use crate::url_resolver::RedirectResolver;
use crate::verdict::{Outcome, ReportPolicy, Verdict, VerdictDetail};
use async_trait::async_trait;
use std::sync::Arc;

pub const NAME: &str = "URL Unshortening";

pub const SHORTENER_DOMAINS: [&str; 30] = [
    "bit.ly",
    "t.co",
    "tinyurl.com",
    "goo.gl",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "adf.ly",
    "bl.ink",
    "lnkd.in",
    "db.tt",
    "qr.ae",
    "cur.lv",
    "ity.im",
    "q.gs",
    "po.st",
    "bc.vc",
    "twitthis.com",
    "su.pr",
    "short.to",
    "v.gd",
    "tr.im",
    "clck.ru",
    "rb.gy",
    "shorturl.at",
    "tiny.cc",
    "x.co",
    "yourls.org",
    "soo.gd",
    "s2r.co",
];

/// True when the URL's hostname is exactly one of the known shorteners.
pub fn is_shortened_url(url: &str) -> bool {
    DomainUtils::extract_hostname(url)
        .map(|host| SHORTENER_DOMAINS.contains(&host.as_str()))
        .unwrap_or(false)
}

pub fn filter_shortened_urls<'a>(urls: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    urls.into_iter()
        .filter(|url| is_shortened_url(url))
        .cloned()
        .collect()
}

/// Resolve every URL concurrently, keeping only those that led somewhere
/// else. Order follows the input.
pub async fn resolve_all(
    fanout: &FanOut,
    resolver: &dyn RedirectResolver,
    urls: Vec<String>,
) -> Vec<(String, String)> {
    let units = urls
        .iter()
        .map(|url| move || resolver.resolve(url))
        .collect::<Vec<_>>();
    let results = fanout.run_all(units).await;

    pair_results(urls, results)
        .into_iter()
        .filter(|(original, resolved)| original != resolved)
        .collect()
}

pub fn transform(resolved: &[(String, String)], name: &str) -> Verdict {
    let details = if resolved.is_empty() {
        vec![VerdictDetail::new(
            "no_resolve",
            "No shortened URLs could be resolved",
        )]
    } else {
        resolved
            .iter()
            .map(|(original, target)| {
                VerdictDetail::new(original.clone(), format!("{original} -> {target}"))
            })
            .collect()
    };

    Verdict::new(name, false, details)
}

pub struct UnshortenDetector {
    name: String,
    resolver: Arc<dyn RedirectResolver>,
    fanout: FanOut,
}

impl UnshortenDetector {
    pub fn new(resolver: Arc<dyn RedirectResolver>, fanout: FanOut) -> Self {
        Self {
            name: NAME.to_string(),
            resolver,
            fanout,
        }
    }
}

#[async_trait]
impl Detector for UnshortenDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ReportPolicy {
        ReportPolicy::OnSignal
    }

    async fn detect(&self, input: &DetectionInput<'_>) -> Result<Outcome, DetectorError> {
        let shortened = filter_shortened_urls(&input.iocs.urls);
        if shortened.is_empty() {
            return Ok(Outcome::Absent);
        }

        log::debug!("Resolving {} shortened URL(s)", shortened.len());
        let resolved = resolve_all(&self.fanout, self.resolver.as_ref(), shortened).await;
        Ok(transform(&resolved, &self.name).into())
    }
}
