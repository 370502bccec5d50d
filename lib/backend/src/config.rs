//! Connection settings for the hosted backend.

use crate::error::BackendError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Where the hosted backend lives and how to authenticate to it.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://abc.example.co`.
    pub api_url: String,

    /// Public (anon) API key sent as `apikey` on every request.
    pub anon_key: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_url", &self.api_url)
            .field("anon_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    /// Creates a config with the default timeout.
    #[must_use]
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            anon_key: anon_key.into(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the project URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Checks that the values can be used to build a client.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> Result<(), BackendError> {
        let url = self.api_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(BackendError::InvalidConfig {
                key: "api_url".to_string(),
                reason: format!("'{url}' must start with http:// or https://"),
            });
        }
        if self.anon_key.trim().is_empty() {
            return Err(BackendError::InvalidConfig {
                key: "anon_key".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(BackendError::InvalidConfig {
                key: "request_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
