//! Error types for the access crate.
//!
//! Errors are layered:
//! - `ProviderError`: failures reported by the identity provider adapter
//! - `StoreError`: failures reported by the profile data store
//! - `AuthError`: what the auth state machine records for display
//!
//! Adapters return their own layer's error. The state machine converts them
//! into an `AuthError` at its boundary and never lets them escape further.

use agency_portal_core::PrincipalId;
use std::fmt;

/// Errors from the identity provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the email/password pair.
    InvalidCredentials,
    /// Transport failure talking to the provider.
    Network { details: String },
    /// The provider refused a sign-up (e.g. email already registered).
    SignUpRejected { reason: String },
    /// The provider answered with something the adapter could not use.
    UnexpectedResponse { status: u16, details: String },
    /// No session is held, so the operation has nothing to act on.
    NoSession,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid login credentials"),
            Self::Network { details } => write!(f, "identity provider unreachable: {details}"),
            Self::SignUpRejected { reason } => write!(f, "sign-up rejected: {reason}"),
            Self::UnexpectedResponse { status, details } => {
                write!(f, "unexpected identity provider response ({status}): {details}")
            }
            Self::NoSession => write!(f, "no active session"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors from the profile data store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport failure talking to the store.
    Network { details: String },
    /// The store answered but the query failed (RLS denial, bad column, ...).
    Query { details: String },
    /// A row came back that could not be decoded.
    Decode { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { details } => write!(f, "profile store unreachable: {details}"),
            Self::Query { details } => write!(f, "profile query failed: {details}"),
            Self::Decode { details } => write!(f, "profile row could not be decoded: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The last auth error, as recorded by the state machine for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong email or password.
    InvalidCredentials,
    /// Transport failure talking to the identity provider or data store.
    NetworkError { details: String },
    /// Signed in, but there is no authorization record for the principal.
    ProfileNotFound { principal_id: PrincipalId },
    /// The authorization record exists but its role is unusable.
    InvalidRoleConfiguration {
        principal_id: PrincipalId,
        value: Option<String>,
    },
    /// The store was reachable but rejected the profile query.
    ProfileLookupFailed { details: String },
    /// A self-service profile change could not be saved.
    ProfileUpdateFailed { details: String },
    /// Remote sign-out failed; the local session was cleared anyway.
    SignOutFailed { details: String },
    /// The provider refused a sign-up.
    SignUpRejected { reason: String },
    /// Sign-up metadata did not match the accepted fields.
    InvalidMetadata { details: String },
    /// Caller input failed validation before any remote call.
    InvalidInput { details: String },
}

impl AuthError {
    /// Returns the dismissible message shown to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Incorrect email or password.".to_string(),
            Self::NetworkError { .. } => {
                "We couldn't reach the server. Check your connection and try again.".to_string()
            }
            Self::ProfileNotFound { .. } => {
                "Your account is not fully set up yet. Please contact support.".to_string()
            }
            Self::InvalidRoleConfiguration { .. } => {
                "Your account has an invalid access configuration. Please contact support."
                    .to_string()
            }
            Self::ProfileLookupFailed { .. } => {
                "We couldn't load your account details. Please try again.".to_string()
            }
            Self::ProfileUpdateFailed { .. } => {
                "We couldn't save your changes. Please try again.".to_string()
            }
            Self::SignOutFailed { .. } => {
                "You have been signed out on this device, but the server could not confirm it. \
                 Your session may remain active elsewhere until it expires."
                    .to_string()
            }
            Self::SignUpRejected { reason } => format!("Sign-up failed: {reason}"),
            Self::InvalidMetadata { details } => format!("Invalid sign-up details: {details}"),
            Self::InvalidInput { details } => details.clone(),
        }
    }

    /// Returns true if a manual retry may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. }
                | Self::ProfileLookupFailed { .. }
                | Self::ProfileUpdateFailed { .. }
        )
    }

    /// Returns true if the error means the account needs administrator help.
    #[must_use]
    pub fn needs_support(&self) -> bool {
        matches!(
            self,
            Self::ProfileNotFound { .. } | Self::InvalidRoleConfiguration { .. }
        )
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::NetworkError { details } => write!(f, "network error: {details}"),
            Self::ProfileNotFound { principal_id } => {
                write!(f, "no profile found for principal {principal_id}")
            }
            Self::InvalidRoleConfiguration {
                principal_id,
                value: Some(value),
            } => write!(f, "principal {principal_id} has unrecognized role '{value}'"),
            Self::InvalidRoleConfiguration {
                principal_id,
                value: None,
            } => write!(f, "principal {principal_id} has no usable role"),
            Self::ProfileLookupFailed { details } => write!(f, "profile lookup failed: {details}"),
            Self::ProfileUpdateFailed { details } => write!(f, "profile update failed: {details}"),
            Self::SignOutFailed { details } => write!(f, "remote sign-out failed: {details}"),
            Self::SignUpRejected { reason } => write!(f, "sign-up rejected: {reason}"),
            Self::InvalidMetadata { details } => write!(f, "invalid sign-up metadata: {details}"),
            Self::InvalidInput { details } => write!(f, "invalid input: {details}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials => Self::InvalidCredentials,
            ProviderError::Network { details } => Self::NetworkError { details },
            ProviderError::SignUpRejected { reason } => Self::SignUpRejected { reason },
            ProviderError::UnexpectedResponse { status, details } => Self::NetworkError {
                details: format!("status {status}: {details}"),
            },
            ProviderError::NoSession => Self::InvalidInput {
                details: "You are not signed in.".to_string(),
            },
        }
    }
}
