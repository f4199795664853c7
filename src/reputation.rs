//! Client for the IPQualityScore reputation API.

use crate::error::ReputationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const IPQS_BASE_URL: &str = "https://ipqualityscore.com";

const REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IpqsIpLookup {
    pub fraud_score: f64,
    pub proxy: bool,
    pub vpn: bool,
    pub tor: bool,
    pub bot_status: bool,
    pub recent_abuse: bool,
    pub country_code: Option<String>,
    #[serde(alias = "ISP")]
    pub isp: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IpqsUrlLookup {
    #[serde(rename = "unsafe")]
    pub unsafe_: bool,
    pub risk_score: f64,
    pub phishing: bool,
    pub malware: bool,
    pub spamming: bool,
    pub suspicious: bool,
    pub domain: Option<String>,
    pub parking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IpqsEmailLookup {
    pub valid: bool,
    pub fraud_score: f64,
    pub disposable: bool,
    pub honeypot: bool,
    pub recent_abuse: bool,
    pub suspect: bool,
    pub leaked: bool,
}

#[async_trait]
pub trait ReputationClient: Send + Sync {
    async fn lookup_ip(&self, ip: &str) -> Result<IpqsIpLookup, ReputationError>;
    async fn lookup_url(&self, url: &str) -> Result<IpqsUrlLookup, ReputationError>;
    async fn lookup_email(&self, email: &str) -> Result<IpqsEmailLookup, ReputationError>;
}

pub struct IpqsClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl IpqsClient {
    pub fn new(api_key: &str) -> Result<Self, ReputationError> {
        Self::with_base_url(api_key, IPQS_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, ReputationError> {
        if api_key.trim().is_empty() {
            return Err(ReputationError::NotConfigured);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .user_agent(concat!("eml-verdict/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, kind: &str, value: &str) -> String {
        format!("{}/api/json/{kind}/{}/{value}", self.base_url, self.api_key)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        kind: &str,
        value: &str,
        strictness: Option<u8>,
    ) -> Result<T, ReputationError> {
        let mut request = self.client.get(self.endpoint(kind, value));
        if let Some(strictness) = strictness {
            request = request.query(&[("strictness", strictness)]);
        }

        let body: Value = request.send().await?.error_for_status()?.json().await?;
        check_success(&body)?;
        Ok(serde_json::from_value(body)?)
    }
}

/// IPQS reports failures with HTTP 200 and `success: false`.
fn check_success(body: &Value) -> Result<(), ReputationError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request was not successful");
        return Err(ReputationError::Service(message.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ReputationClient for IpqsClient {
    async fn lookup_ip(&self, ip: &str) -> Result<IpqsIpLookup, ReputationError> {
        log::debug!("IPQS IP lookup: {ip}");
        self.get("ip", ip, Some(1)).await
    }

    async fn lookup_url(&self, url: &str) -> Result<IpqsUrlLookup, ReputationError> {
        log::debug!("IPQS URL lookup: {url}");
        self.get("url", &urlencoding::encode(url), Some(0)).await
    }

    async fn lookup_email(&self, email: &str) -> Result<IpqsEmailLookup, ReputationError> {
        log::debug!("IPQS email lookup: {email}");
        self.get("email", email, None).await
    }
}
