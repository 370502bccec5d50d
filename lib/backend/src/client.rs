//! Shared HTTP plumbing for the hosted backend.

use crate::config::BackendConfig;
use crate::error::BackendError;
use agency_portal_access::Session;
use agency_portal_core::Result;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use std::sync::{Arc, RwLock};

/// An HTTP client bound to one backend project.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Arc<str>,
    anon_key: Arc<str>,
}

impl BackendClient {
    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::ClientBuild {
                details: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: Arc::from(config.base_url()),
            anon_key: Arc::from(config.anon_key.trim()),
        })
    }

    /// Returns the URL of an identity endpoint, e.g. `auth_url("logout")`.
    #[must_use]
    pub fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }

    /// Returns the URL of a REST table endpoint.
    #[must_use]
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub(crate) fn auth_request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.http
            .request(method, self.auth_url(endpoint))
            .header("apikey", &*self.anon_key)
    }

    /// Builds a table request. Without a session token the anon key is used
    /// as the bearer, which row-level security treats as anonymous.
    pub(crate) fn rest_request(
        &self,
        method: Method,
        table: &str,
        access_token: Option<&str>,
    ) -> RequestBuilder {
        let bearer = access_token.unwrap_or(&*self.anon_key);
        self.http
            .request(method, self.rest_url(table))
            .header("apikey", &*self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }
}

/// The session currently held by the identity adapter.
///
/// Shared with the profile store so table requests carry the signed-in
/// principal's access token.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SharedSession {
    /// Returns a copy of the held session.
    #[must_use]
    pub fn get(&self) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the held session's access token.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.get().map(|session| session.access_token().to_string())
    }

    /// Replaces the held session.
    pub fn set(&self, session: Session) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session);
    }

    /// Replaces the held session only if it is still the one with `session`'s
    /// id. Returns false if it was signed out or replaced meanwhile.
    pub fn replace_same(&self, session: Session) -> bool {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(current) if current.id() == session.id() => {
                *guard = Some(session);
                true
            }
            _ => false,
        }
    }

    /// Removes and returns the held session.
    pub fn take(&self) -> Option<Session> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Error payloads the identity and REST services return.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Extracts the most specific human-readable message from an error body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    [
        parsed.error_description,
        parsed.msg,
        parsed.message,
        parsed.error,
    ]
    .into_iter()
    .flatten()
    .find(|m| !m.trim().is_empty())
    .unwrap_or_else(|| {
        let raw = body.trim();
        if raw.is_empty() {
            "no details".to_string()
        } else {
            raw.to_string()
        }
    })
}
