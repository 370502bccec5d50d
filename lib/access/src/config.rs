//! Access-layer configuration.
//!
//! Loaded via the `config` crate from `PORTAL_`-prefixed environment
//! variables, with `__` separating nested keys:
//!
//! ```text
//! PORTAL_PROFILE_FETCH_TIMEOUT_MS=5000
//! PORTAL_PATHS__LOGIN=/signin
//! PORTAL_PATHS__EMPLOYEE_HOME=/staff
//! ```

use crate::role::Role;
use agency_portal_core::Result;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Environment variable prefix for all portal settings.
pub const ENV_PREFIX: &str = "PORTAL";

/// Errors from loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The sources could not be read or deserialized.
    Load { details: String },
    /// A value was read but is not usable.
    Invalid { key: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { details } => write!(f, "failed to load configuration: {details}"),
            Self::Invalid { key, reason } => write!(f, "invalid configuration '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Route paths the guards redirect to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortalPaths {
    /// Sign-in page.
    #[serde(default = "default_login")]
    pub login: String,
    /// Page shown to clients awaiting approval.
    #[serde(default = "default_pending_approval")]
    pub pending_approval: String,
    /// Landing page of the admin portal. Unset means no home for admins.
    #[serde(default = "default_admin_home")]
    pub admin_home: Option<String>,
    /// Landing page for employees.
    #[serde(default = "default_employee_home")]
    pub employee_home: Option<String>,
    /// Landing page of the client portal.
    #[serde(default = "default_client_home")]
    pub client_home: Option<String>,
}

fn default_login() -> String {
    "/login".to_string()
}

fn default_pending_approval() -> String {
    "/client/pending".to_string()
}

fn default_admin_home() -> Option<String> {
    Some("/admin".to_string())
}

fn default_employee_home() -> Option<String> {
    Some("/employee".to_string())
}

fn default_client_home() -> Option<String> {
    Some("/client".to_string())
}

impl Default for PortalPaths {
    fn default() -> Self {
        Self {
            login: default_login(),
            pending_approval: default_pending_approval(),
            admin_home: default_admin_home(),
            employee_home: default_employee_home(),
            client_home: default_client_home(),
        }
    }
}

impl PortalPaths {
    /// Returns the landing page for `role`, if one is configured.
    #[must_use]
    pub fn home_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Admin => self.admin_home.as_deref(),
            Role::Employee => self.employee_home.as_deref(),
            Role::Client => self.client_home.as_deref(),
        }
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        let required = [
            ("paths.login", Some(self.login.as_str())),
            ("paths.pending_approval", Some(self.pending_approval.as_str())),
            ("paths.admin_home", self.admin_home.as_deref()),
            ("paths.employee_home", self.employee_home.as_deref()),
            ("paths.client_home", self.client_home.as_deref()),
        ];

        for (key, path) in required {
            if let Some(path) = path
                && !path.starts_with('/')
            {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("'{path}' must be an absolute path"),
                });
            }
        }
        Ok(())
    }
}

/// Settings for the auth state machine and its guards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessConfig {
    /// Redirect targets.
    #[serde(default)]
    pub paths: PortalPaths,

    /// Upper bound on a single profile fetch, in milliseconds.
    #[serde(default = "default_profile_fetch_timeout_ms")]
    pub profile_fetch_timeout_ms: u64,

    /// Session events buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_profile_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    crate::events::DEFAULT_EVENT_CAPACITY
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            paths: PortalPaths::default(),
            profile_fetch_timeout_ms: default_profile_fetch_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl AccessConfig {
    /// Returns the profile fetch timeout.
    #[must_use]
    pub fn profile_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.profile_fetch_timeout_ms)
    }

    /// Loads configuration from `PORTAL_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
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
    pub fn from_config(source: config::Config) -> Result<Self, ConfigError> {
        let config: Self = source.try_deserialize().map_err(|e| ConfigError::Load {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.profile_fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "profile_fetch_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "event_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        self.paths.validate()
    }
}
