//! Connection settings shared by all adapters.

use std::time::Duration;

/// Endpoint and credentials for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Base HTTP URL without a trailing slash, e.g. `https://relay.example.com`.
    pub api_url: String,
    /// Credential sent with outbound requests.
    pub api_key: String,
    /// Secret used to authenticate pushed notifications.
    pub webhook_secret: String,
    /// Where the provider should push completion notifications, if it can.
    pub callback_url: Option<String>,
    /// Upper bound for any single outbound request.
    pub request_timeout: Duration,
}

impl ProviderSettings {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_secret: webhook_secret.into(),
            callback_url: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Join `path` onto the base URL.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let settings = ProviderSettings::new("http://relay.local/", "k", "s");
        assert_eq!(settings.url("/v1/x"), "http://relay.local/v1/x");
    }
}
