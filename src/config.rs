use crate::dns::DEFAULT_DNS_TIMEOUT_SECONDS;
use crate::error::ConfigError;
use crate::fanout::FanOutConfig;
use crate::response::IdStrategy;
use crate::url_resolver::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_SECONDS};
use serde::{Deserialize, Serialize};

pub const IPQS_API_KEY_ENV: &str = "IPQUALITYSCORE_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub fanout: FanOutConfig,
    pub ipqs: IpqsConfig,
    pub unshorten: UnshortenConfig,
    pub dns: DnsConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub detectors: DetectorToggles,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub id_strategy: IdStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpqsConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnshortenConfig {
    pub timeout_seconds: u64,
    pub max_redirects: u8,
}

impl Default for UnshortenConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub timeout_seconds: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_DNS_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// Entry lifetime; 0 keeps entries forever.
    pub expire_seconds: u64,
    pub list_available: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            key_prefix: "analysis".to_string(),
            expire_seconds: 3600,
            list_available: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorToggles {
    pub email_auth: bool,
    pub homoglyph: bool,
    pub unshorten: bool,
}

impl Default for DetectorToggles {
    fn default() -> Self {
        Self {
            email_auth: true,
            homoglyph: true,
            unshorten: true,
        }
    }
}

/// Detectors that will run, resolved once from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledDetectors {
    pub email_auth: bool,
    pub homoglyph: bool,
    pub unshorten: bool,
    pub ipqs_api_key: Option<String>,
}

impl EnabledDetectors {
    pub fn ipqs(&self) -> bool {
        self.ipqs_api_key.is_some()
    }
}

/// Which optional integrations are configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub cache: bool,
    pub ipqs: bool,
    pub email_auth: bool,
    pub homoglyph: bool,
    pub unshorten: bool,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fanout.max_at_once == 0 {
            return Err(ConfigError::Invalid(
                "fanout.max_at_once must be at least 1".to_string(),
            ));
        }
        if let Some(rate) = self.fanout.max_per_second {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "fanout.max_per_second must be positive, got {rate}"
                )));
            }
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "cache.redis_url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }

    /// The IPQS key from the config file, or from the environment when the
    /// file does not set one. Blank keys count as unset.
    pub fn ipqs_api_key(&self) -> Option<String> {
        self.ipqs
            .api_key
            .clone()
            .or_else(|| std::env::var(IPQS_API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn enabled_detectors(&self) -> EnabledDetectors {
        EnabledDetectors {
            email_auth: self.detectors.email_auth,
            homoglyph: self.detectors.homoglyph,
            unshorten: self.detectors.unshorten,
            ipqs_api_key: self.ipqs_api_key(),
        }
    }

    pub fn status(&self) -> Status {
        Status {
            cache: self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_some(),
            ipqs: self.ipqs_api_key().is_some(),
            email_auth: self.detectors.email_auth,
            homoglyph: self.detectors.homoglyph,
            unshorten: self.detectors.unshorten,
        }
    }
}
