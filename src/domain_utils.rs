use url::Url;

/// Minimal address and URL helpers shared by the detectors
pub struct DomainUtils;

impl DomainUtils {
    /// Extract the lower-cased domain from an email address
    pub fn extract_domain(email: &str) -> Option<String> {
        if !email.contains('@') {
            return None;
        }

        let domain = email.rsplit('@').next()?.trim().to_lowercase();
        if domain.is_empty() {
            None
        } else {
            Some(domain)
        }
    }

    /// Extract the lower-cased hostname from a URL
    pub fn extract_hostname(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()?
            .host_str()
            .map(|h| h.to_lowercase())
    }
}
