//! Identity provider backed by the hosted auth API.
//!
//! Endpoints used, all under `{api_url}/auth/v1` with the `apikey` header:
//!
//! | Operation        | Request                                   |
//! |------------------|-------------------------------------------|
//! | sign in          | `POST token?grant_type=password`          |
//! | refresh          | `POST token?grant_type=refresh_token`     |
//! | sign out         | `POST logout` (bearer = access token)     |
//! | sign up          | `POST signup`                             |
//!
//! The session lives in memory in a [`SharedSession`]; share it with
//! [`HostedProfileStore`](crate::store::HostedProfileStore) so table requests
//! run as the signed-in principal.

use crate::client::{BackendClient, SharedSession, error_message};
use agency_portal_access::{
    Credentials, IdentityProvider, PrincipalId, ProviderError, Session, SessionChannel,
    SessionEvent, SessionEventKind, SessionId, SessionSubscription, SignupMetadata,
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

/// Access token lifetime assumed when the response omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserPayload,
}

impl TokenResponse {
    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS))
    }

    fn into_session(self) -> Result<Session, ProviderError> {
        let ttl = self.ttl();
        let principal_id =
            PrincipalId::parse(self.user.id).map_err(|e| ProviderError::UnexpectedResponse {
                status: StatusCode::OK.as_u16(),
                details: e.to_string(),
            })?;

        Ok(Session::new(
            SessionId::new(format!("sess_{}", Ulid::new())),
            principal_id,
            self.access_token,
            self.refresh_token,
            ttl,
        )
        .with_email(self.user.email))
    }
}

/// Sign-up answers with a session when email confirmation is off and with
/// the bare user when a confirmation mail was sent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignupResponse {
    Session(TokenResponse),
    User(UserPayload),
}

fn unexpected(status: StatusCode, body: &str) -> ProviderError {
    ProviderError::UnexpectedResponse {
        status: status.as_u16(),
        details: error_message(body),
    }
}

fn decode<T>(status: StatusCode, body: &str) -> Result<T, ProviderError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_str(body).map_err(|e| ProviderError::UnexpectedResponse {
        status: status.as_u16(),
        details: format!("malformed response: {e}"),
    })
}

/// Interprets a `token` grant response.
fn token_outcome(status: StatusCode, body: &str) -> Result<TokenResponse, ProviderError> {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
            debug!(reason = %error_message(body), "token grant rejected");
            Err(ProviderError::InvalidCredentials)
        }
        s if s.is_success() => decode(status, body),
        _ => Err(unexpected(status, body)),
    }
}

/// Interprets a `signup` response. `Ok(None)` means confirmation is pending.
fn signup_outcome(status: StatusCode, body: &str) -> Result<Option<Session>, ProviderError> {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(ProviderError::SignUpRejected {
                reason: error_message(body),
            })
        }
        s if s.is_success() => match decode(status, body)? {
            SignupResponse::Session(token) => token.into_session().map(Some),
            SignupResponse::User(user) => {
                debug!(user_id = %user.id, "sign-up awaiting email confirmation");
                Ok(None)
            }
        },
        _ => Err(unexpected(status, body)),
    }
}

/// Interprets a `logout` response. A token the server no longer knows is
/// already signed out.
fn logout_outcome(status: StatusCode, body: &str) -> Result<(), ProviderError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
            debug!("server had already ended the session");
            Ok(())
        }
        _ => Err(unexpected(status, body)),
    }
}

fn network_error(err: reqwest::Error) -> ProviderError {
    warn!(error = %err, "identity request failed");
    ProviderError::Network {
        details: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
    }
}

async fn read(response: reqwest::Response) -> Result<(StatusCode, String), ProviderError> {
    let status = response.status();
    let body = response.text().await.map_err(network_error)?;
    Ok((status, body))
}

/// Identity provider talking to the hosted auth API.
pub struct HostedIdentityProvider {
    client: BackendClient,
    session: SharedSession,
    channel: SessionChannel,
}

impl HostedIdentityProvider {
    /// Creates a provider with no session.
    #[must_use]
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            session: SharedSession::default(),
            channel: SessionChannel::default(),
        }
    }

    /// Sets how many session events each subscriber buffers.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.channel = SessionChannel::new(capacity);
        self
    }

    /// Returns the handle to the held session.
    #[must_use]
    pub fn shared_session(&self) -> SharedSession {
        self.session.clone()
    }

    /// Returns the event channel.
    #[must_use]
    pub fn channel(&self) -> &SessionChannel {
        &self.channel
    }

    /// Puts a previously persisted session in place. No event is emitted;
    /// the next `current_session` call reports it.
    pub fn restore_session(&self, session: Session) {
        self.session.set(session);
    }

    /// Exchanges the refresh token for new tokens and emits `TokenRefreshed`.
    ///
    /// A rejected refresh token ends the session: local state is cleared and
    /// `SignedOut` is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NoSession`] without a refreshable session,
    /// [`ProviderError::InvalidCredentials`] if the refresh token was
    /// rejected, or a transport error.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<Session, ProviderError> {
        let mut session = self.session.get().ok_or(ProviderError::NoSession)?;
        let refresh_token = session
            .refresh_token()
            .ok_or(ProviderError::NoSession)?
            .to_string();

        let response = self
            .client
            .auth_request(Method::POST, "token")
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = read(response).await?;

        let token = match token_outcome(status, &body) {
            Ok(token) => token,
            Err(ProviderError::InvalidCredentials) => {
                warn!("refresh token rejected; ending session");
                if self.session.take().is_some() {
                    self.channel.emit(SessionEvent::signed_out());
                }
                return Err(ProviderError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };

        let ttl = token.ttl();
        session.refresh(token.access_token, token.refresh_token, ttl);
        if !self.session.replace_same(session.clone()) {
            debug!("session changed during refresh; discarding new tokens");
            return Err(ProviderError::NoSession);
        }

        info!(expires_at = %session.expires_at(), "session refreshed");
        self.channel.emit(SessionEvent::active(
            SessionEventKind::TokenRefreshed,
            session.clone(),
        ));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for HostedIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        match self.session.get() {
            None => Ok(None),
            Some(session) if session.is_valid() => Ok(Some(session)),
            Some(_) => {
                debug!("held session expired; refreshing");
                match self.refresh_session().await {
                    Ok(session) => Ok(Some(session)),
                    Err(ProviderError::InvalidCredentials | ProviderError::NoSession) => {
                        self.session.take();
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn subscribe(&self) -> SessionSubscription {
        self.channel.subscribe()
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email()))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ProviderError> {
        let response = self
            .client
            .auth_request(Method::POST, "token")
            .query(&[("grant_type", "password")])
            .json(&json!({
                "email": credentials.email(),
                "password": credentials.password(),
            }))
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = read(response).await?;

        let session = token_outcome(status, &body)?.into_session()?;
        self.session.set(session.clone());
        info!(principal_id = %session.principal_id(), "signed in");
        self.channel.emit(SessionEvent::active(
            SessionEventKind::SignedIn,
            session.clone(),
        ));
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(session) = self.session.take() else {
            self.channel.emit(SessionEvent::signed_out());
            return Ok(());
        };

        let remote = match self
            .client
            .auth_request(Method::POST, "logout")
            .header("Authorization", format!("Bearer {}", session.access_token()))
            .send()
            .await
        {
            Ok(response) => match read(response).await {
                Ok((status, body)) => logout_outcome(status, &body),
                Err(e) => Err(e),
            },
            Err(e) => Err(network_error(e)),
        };

        info!(principal_id = %session.principal_id(), "signed out");
        self.channel.emit(SessionEvent::signed_out());
        remote
    }

    #[instrument(skip(self, credentials, metadata), fields(email = %credentials.email()))]
    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: &SignupMetadata,
    ) -> Result<(), ProviderError> {
        let response = self
            .client
            .auth_request(Method::POST, "signup")
            .json(&json!({
                "email": credentials.email(),
                "password": credentials.password(),
                "data": metadata.normalized(),
            }))
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = read(response).await?;

        if let Some(session) = signup_outcome(status, &body)? {
            self.session.set(session.clone());
            self.channel.emit(SessionEvent::active(
                SessionEventKind::SignedIn,
                session,
            ));
        }
        info!("sign-up accepted");
        Ok(())
    }
}
