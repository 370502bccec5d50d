//! Error types for the backend adapters.
//!
//! Request-level failures are reported through the access crate's
//! `ProviderError` and `StoreError`; `BackendError` covers building the
//! client itself.

use std::fmt;

/// Errors from setting up a backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A configuration value cannot be used.
    InvalidConfig { key: String, reason: String },
    /// The HTTP client could not be constructed.
    ClientBuild { details: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { key, reason } => {
                write!(f, "invalid backend configuration '{key}': {reason}")
            }
            Self::ClientBuild { details } => write!(f, "failed to build HTTP client: {details}"),
        }
    }
}

impl std::error::Error for BackendError {}
