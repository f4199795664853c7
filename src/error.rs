use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("max_at_once must be at least 1")]
    InvalidConcurrency,
    #[error("max_per_second must be a positive finite number, got {0}")]
    InvalidRate(f64),
}

#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Service error: {0}")]
    Service(String),
    #[error("Unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Reputation service is not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Resolver error: {0}")]
    Resolve(#[from] hickory_resolver::error::ResolveError),
    #[error("Lookup timed out for {0}")]
    Timeout(String),
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Reputation lookup failed: {0}")]
    Reputation(#[from] ReputationError),
    #[error("Fan-out misconfigured: {0}")]
    FanOut(#[from] FanOutError),
    #[error("Redirect resolver unavailable: {0}")]
    Redirect(#[from] RedirectError),
    #[error("Detector panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache listing is disabled")]
    ListingDisabled,
    #[error("Cache is not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid redirect location: {0}")]
    InvalidLocation(String),
    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(u8),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}
