use crate::error::DnsError;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::time::Duration;

pub const DEFAULT_DNS_TIMEOUT_SECONDS: u64 = 5;

/// TXT record lookups, the only DNS query the analyzer issues.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn txt_lookup(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// System-configured resolver backed by hickory.
#[derive(Debug, Clone)]
pub struct HickoryTxtResolver {
    timeout: Duration,
}

impl HickoryTxtResolver {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

impl Default for HickoryTxtResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DNS_TIMEOUT_SECONDS)
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn txt_lookup(&self, name: &str) -> Result<Vec<String>, DnsError> {
        log::debug!("TXT lookup for {name} (timeout: {}s)", self.timeout.as_secs());

        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        let lookup = tokio::time::timeout(self.timeout, resolver.txt_lookup(name))
            .await
            .map_err(|_| DnsError::Timeout(name.to_string()))??;

        // A TXT record may be split into several character-strings; they
        // form one logical value.
        let records = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect::<Vec<_>>();

        log::debug!("TXT lookup for {name} returned {} record(s)", records.len());
        Ok(records)
    }
}
