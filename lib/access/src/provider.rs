//! The identity provider seam.
//!
//! [`IdentityProvider`] wraps the hosted identity service: current-session
//! lookup, the session event stream, and password sign-in/sign-up/sign-out.
//! Implementations must emit a [`SessionEvent`](crate::events::SessionEvent)
//! for every session change they cause, and `sign_out` must clear local state
//! even when the remote call fails.

use crate::error::{AuthError, ProviderError};
use crate::events::SessionSubscription;
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Email/password pair for password authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    /// Creates credentials, rejecting blank fields before any network call.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidInput`] if the email or password is empty,
    /// or the email has no `@`.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Result<Self, AuthError> {
        let email = email.into().trim().to_string();
        let password = password.into();

        if email.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput {
                details: "Email and password are required.".to_string(),
            });
        }
        if !email.contains('@') {
            return Err(AuthError::InvalidInput {
                details: "Enter a valid email address.".to_string(),
            });
        }

        Ok(Self { email, password })
    }

    /// Returns the email address.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Profile details collected at sign-up and forwarded to the provider.
///
/// Only these keys are accepted; the provider copies them into the new
/// account's profile row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_reason: Option<String>,
}

impl SignupMetadata {
    /// Parses metadata from an untyped JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidMetadata`] for unknown keys or non-string
    /// values.
    pub fn from_json(value: serde_json::Value) -> Result<Self, AuthError> {
        serde_json::from_value(value).map_err(|e| AuthError::InvalidMetadata {
            details: e.to_string(),
        })
    }

    /// Returns a copy with blank strings collapsed to `None`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            full_name: clean(&self.full_name),
            company: clean(&self.company),
            phone: clean(&self.phone),
            access_reason: clean(&self.access_reason),
        }
    }
}

/// Identity provider operations the auth state machine depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the session currently held by the client library, if any.
    async fn current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Opens a subscription to session-change events.
    fn subscribe(&self) -> SessionSubscription;

    /// Signs in with a password.
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ProviderError>;

    /// Ends the current session.
    ///
    /// Local state is cleared and a sign-out event emitted even if the remote
    /// call fails; the remote error is still returned.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Registers a new account.
    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: &SignupMetadata,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for Arc<T> {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        (**self).current_session().await
    }

    fn subscribe(&self) -> SessionSubscription {
        (**self).subscribe()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ProviderError> {
        (**self).sign_in(credentials).await
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        (**self).sign_out().await
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: &SignupMetadata,
    ) -> Result<(), ProviderError> {
        (**self).sign_up(credentials, metadata).await
    }
}
