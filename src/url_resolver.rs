use crate::error::RedirectError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_REDIRECTS: u8 = 10;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

/// Follows a URL's redirect chain to its final destination.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String, RedirectError>;
}

pub struct HttpRedirectResolver {
    client: Client,
    max_redirects: u8,
}

impl HttpRedirectResolver {
    pub fn new(timeout_seconds: u64, max_redirects: u8) -> Result<Self, RedirectError> {
        // Shortener targets are frequently served with broken certificates;
        // only the Location chain is of interest here.
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("eml-verdict/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            max_redirects,
        })
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve(&self, url: &str) -> Result<String, RedirectError> {
        let mut current_url = url.to_string();
        let mut redirect_count = 0;

        loop {
            let response = self.client.head(&current_url).send().await?;
            if !response.status().is_redirection() {
                break;
            }

            let Some(location) = response.headers().get(reqwest::header::LOCATION) else {
                break;
            };
            let location = location
                .to_str()
                .map_err(|_| RedirectError::InvalidLocation(current_url.clone()))?;

            if redirect_count >= self.max_redirects {
                return Err(RedirectError::TooManyRedirects(self.max_redirects));
            }

            current_url = next_location(&current_url, location)?;
            redirect_count += 1;
            log::debug!("Redirect {redirect_count} for {url}: {current_url}");
        }

        Ok(current_url)
    }
}

/// Resolve a `Location` header value against the URL that returned it.
pub fn next_location(current: &str, location: &str) -> Result<String, RedirectError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }

    Url::parse(current)
        .and_then(|base| base.join(location))
        .map(|joined| joined.to_string())
        .map_err(|_| RedirectError::InvalidLocation(location.to_string()))
}
