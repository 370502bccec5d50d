//! Monitor configuration.
//!
//! Composed from the library configs and loaded from `PORTAL_`-prefixed
//! environment variables:
//!
//! ```text
//! PORTAL_BACKEND__API_URL=https://abc.example.co
//! PORTAL_BACKEND__ANON_KEY=...
//! PORTAL_ACCESS__PATHS__LOGIN=/signin
//! PORTAL_LOGIN__EMAIL=ops@studio.test
//! PORTAL_LOGIN__PASSWORD=...
//! PORTAL_TOKEN_REFRESH_INTERVAL_SECS=900
//! ```

use agency_portal_access::config::{ConfigError, ENV_PREFIX};
use agency_portal_access::AccessConfig;
use agency_portal_backend::BackendConfig;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Monitor configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// State machine and guard settings.
    #[serde(default)]
    pub access: AccessConfig,

    /// Hosted backend connection.
    pub backend: BackendConfig,

    /// Account to sign in with at startup. Without it the monitor only
    /// observes a session established elsewhere.
    #[serde(default)]
    pub login: Option<LoginConfig>,

    /// Seconds between proactive token refreshes.
    #[serde(default = "default_token_refresh_interval_secs")]
    pub token_refresh_interval_secs: u64,

    /// Paths whose guard decision is logged on every state change.
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<String>,
}

/// Startup sign-in credentials.
#[derive(Clone, Deserialize)]
pub struct LoginConfig {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginConfig")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_token_refresh_interval_secs() -> u64 {
    900
}

fn default_watch_paths() -> Vec<String> {
    vec![
        "/admin".to_string(),
        "/employee".to_string(),
        "/client".to_string(),
    ]
}

impl MonitorConfig {
    /// Returns the token refresh interval.
    #[must_use]
    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs)
    }

    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, Report<ConfigError>> {
        let source = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("watch_paths"),
            )
            .build()
            .map_err(|e| ConfigError::Load {
                details: e.to_string(),
            })?;

        Self::from_config(source)
    }

    /// Deserializes and validates configuration from an assembled source.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization or validation fails.
    pub fn from_config(source: config::Config) -> Result<Self, Report<ConfigError>> {
        let config: Self = source.try_deserialize().map_err(|e| ConfigError::Load {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.access.validate()?;
        self.backend
            .validate()
            .map_err(|e| ConfigError::Invalid {
                key: "backend".to_string(),
                reason: e.to_string(),
            })?;
        if self.token_refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "token_refresh_interval_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
