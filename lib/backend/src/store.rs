//! Profile store backed by the hosted REST API.
//!
//! Reads `GET {api_url}/rest/v1/profiles?id=eq.{id}&select=*`; writes use
//! `PATCH` on the same filter. Requests carry the signed-in principal's
//! access token so row-level security applies.

use crate::client::{BackendClient, SharedSession, error_message};
use agency_portal_access::{PrincipalId, ProfileRecord, ProfileStore, StoreError};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::json;
use tracing::{debug, instrument, warn};

const PROFILES: &str = "profiles";

fn network_error(err: reqwest::Error) -> StoreError {
    warn!(error = %err, "profile request failed");
    StoreError::Network {
        details: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
    }
}

/// Interprets a profile query response as its rows.
fn rows_outcome(status: StatusCode, body: &str) -> Result<Vec<ProfileRecord>, StoreError> {
    if !status.is_success() {
        return Err(StoreError::Query {
            details: format!("HTTP {}: {}", status.as_u16(), error_message(body)),
        });
    }
    serde_json::from_str(body).map_err(|e| StoreError::Decode {
        details: e.to_string(),
    })
}

/// Reduces a lookup by id to at most one row. Duplicates are a broken
/// table, not a choice to make here.
fn single_row(
    principal_id: &PrincipalId,
    mut rows: Vec<ProfileRecord>,
) -> Result<Option<ProfileRecord>, StoreError> {
    match rows.len() {
        0 | 1 => Ok(rows.pop()),
        n => {
            warn!(
                principal_id = %principal_id,
                rows = n,
                "multiple profile rows for one principal"
            );
            Err(StoreError::Query {
                details: format!("{n} profile rows for {principal_id}"),
            })
        }
    }
}

/// Profile store talking to the hosted REST API.
#[derive(Debug, Clone)]
pub struct HostedProfileStore {
    client: BackendClient,
    session: SharedSession,
}

impl HostedProfileStore {
    /// Creates a store that authenticates as whoever holds `session`.
    #[must_use]
    pub fn new(client: BackendClient, session: SharedSession) -> Self {
        Self { client, session }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<ProfileRecord>, StoreError> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        let body = response.text().await.map_err(network_error)?;
        rows_outcome(status, &body)
    }
}

#[async_trait]
impl ProfileStore for HostedProfileStore {
    #[instrument(skip(self), fields(principal_id = %principal_id))]
    async fn fetch_profile(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        let token = self.session.access_token();
        let request = self
            .client
            .rest_request(Method::GET, PROFILES, token.as_deref())
            .query(&[
                ("id", format!("eq.{principal_id}")),
                ("select", "*".to_string()),
            ]);

        let row = single_row(principal_id, self.send(request).await?)?;
        debug!(found = row.is_some(), "profile query answered");
        Ok(row)
    }

    #[instrument(skip(self, reason), fields(principal_id = %principal_id))]
    async fn update_access_reason(
        &self,
        principal_id: &PrincipalId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let token = self.session.access_token();
        let request = self
            .client
            .rest_request(Method::PATCH, PROFILES, token.as_deref())
            .query(&[("id", format!("eq.{principal_id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "access_reason": reason }));

        // Row-level security filters silently, so an empty result means the
        // row was not writable.
        if self.send(request).await?.is_empty() {
            return Err(StoreError::Query {
                details: format!("no writable profile row for {principal_id}"),
            });
        }
        Ok(())
    }
}
