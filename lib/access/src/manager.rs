//! The auth state machine.
//!
//! [`AuthManager`] owns the only writable [`AuthSnapshot`] and publishes it
//! through a `tokio::sync::watch` channel. Every profile resolution takes a
//! request token from a monotonically increasing counter; a result is
//! committed only if no newer token has been issued in the meantime. Session
//! absent events take a token too, so a late fetch for a superseded session
//! is discarded instead of resurrecting it.
//!
//! A manual [`AuthManager::refresh_profile`] never issues a token. It reuses
//! the latest one and commits only onto the session it resolved for, so it
//! cannot outrank a session-change event that is still resolving.

use crate::config::AccessConfig;
use crate::error::{AuthError, StoreError};
use crate::events::SessionEvent;
use crate::profile::Profile;
use crate::provider::{Credentials, IdentityProvider, SignupMetadata};
use crate::resolver::{ProfileResolver, ProfileStore, ResolveError};
use crate::role::Role;
use crate::session::{Session, SessionId};
use crate::state::{AuthSnapshot, AuthState};
use agency_portal_core::PrincipalId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Result of [`AuthManager::login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOutcome {
    /// The identity provider accepted the credentials.
    pub success: bool,
    /// The resolved role, when the profile could be resolved.
    pub role: Option<Role>,
}

impl LoginOutcome {
    fn failed() -> Self {
        Self {
            success: false,
            role: None,
        }
    }
}

enum ErrorUpdate {
    Keep,
    Clear,
    Set(AuthError),
}

impl ErrorUpdate {
    fn apply(self, slot: &mut Option<AuthError>) {
        match self {
            Self::Keep => {}
            Self::Clear => *slot = None,
            Self::Set(error) => *slot = Some(error),
        }
    }
}

/// Derives [`AuthState`] from the identity provider and the profile store.
pub struct AuthManager<P, S> {
    provider: P,
    resolver: ProfileResolver<S>,
    config: AccessConfig,
    state: watch::Sender<AuthSnapshot>,
    issued: AtomicU64,
    listening: AtomicBool,
}

impl<P, S> AuthManager<P, S>
where
    P: IdentityProvider,
    S: ProfileStore,
{
    /// Creates a manager in the `Loading` state.
    #[must_use]
    pub fn new(provider: P, store: S, config: AccessConfig) -> Self {
        let resolver = ProfileResolver::new(store, config.profile_fetch_timeout());
        let (state, _) = watch::channel(AuthSnapshot::loading());
        Self {
            provider,
            resolver,
            config,
            state,
            issued: AtomicU64::new(0),
            listening: AtomicBool::new(false),
        }
    }

    /// Returns the identity provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the profile store.
    #[must_use]
    pub fn store(&self) -> &S {
        self.resolver.store()
    }

    /// Returns the configuration the manager was built with.
    #[must_use]
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().state.clone()
    }

    /// Subscribes to snapshot changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Returns true while a [`SessionListener`](crate::SessionListener) holds
    /// this manager's listener slot.
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Returns the last recorded error.
    #[must_use]
    pub fn error(&self) -> Option<AuthError> {
        self.state.borrow().error.clone()
    }

    /// Dismisses the recorded error.
    pub fn clear_error(&self) {
        self.state.send_if_modified(|snapshot| snapshot.error.take().is_some());
    }

    /// Performs the first session check.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        let token = self.issue_token();
        match self.provider.current_session().await {
            Ok(Some(session)) => {
                debug!(principal_id = %session.principal_id(), "found stored session");
                self.resolve_and_commit(token, session).await;
            }
            Ok(None) => {
                self.commit(token, AuthState::Unauthenticated, ErrorUpdate::Keep);
            }
            Err(e) => {
                warn!(error = %e, "session check failed");
                self.commit(
                    token,
                    AuthState::Unauthenticated,
                    ErrorUpdate::Set(AuthError::from(e)),
                );
            }
        }
    }

    /// Re-derives state from a session-change event.
    ///
    /// The event kind does not matter: a present session is re-resolved, an
    /// absent one moves the machine to `Unauthenticated`.
    pub async fn handle_event(&self, event: SessionEvent) {
        let token = self.issue_token();
        self.apply_event(token, event).await;
    }

    #[instrument(skip(self, event), fields(kind = ?event.kind))]
    pub(crate) async fn apply_event(&self, token: u64, event: SessionEvent) {
        match event.session {
            Some(session) => self.resolve_and_commit(token, session).await,
            None => {
                self.commit(token, AuthState::Unauthenticated, ErrorUpdate::Keep);
            }
        }
    }

    /// Signs in and resolves the principal's role.
    ///
    /// On failure the error is recorded, `Loading` becomes `Unauthenticated`
    /// and any other state is left alone. The profile store is not queried.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        let credentials = match Credentials::new(email, password) {
            Ok(credentials) => credentials,
            Err(e) => {
                self.fail_login(e);
                return LoginOutcome::failed();
            }
        };

        let session = match self.provider.sign_in(&credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.fail_login(AuthError::from(e));
                return LoginOutcome::failed();
            }
        };

        info!(principal_id = %session.principal_id(), "signed in");
        let token = self.issue_token();
        let role = self
            .resolve_and_commit(token, session)
            .await
            .map(|profile| profile.role());
        LoginOutcome {
            success: true,
            role,
        }
    }

    /// Signs out.
    ///
    /// State follows the `SignedOut` event, so a running listener is needed
    /// for the transition. A failed remote call is recorded as
    /// [`AuthError::SignOutFailed`]; the local session is gone either way.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "remote sign-out failed");
            self.record_error(AuthError::SignOutFailed {
                details: e.to_string(),
            });
        }
    }

    /// Registers a new client account. Returns `true` on success.
    #[instrument(skip(self, password, metadata))]
    pub async fn signup(&self, email: &str, password: &str, metadata: SignupMetadata) -> bool {
        let credentials = match Credentials::new(email, password) {
            Ok(credentials) => credentials,
            Err(e) => {
                self.record_error(e);
                return false;
            }
        };

        match self.provider.sign_up(&credentials, &metadata).await {
            Ok(()) => {
                info!("sign-up accepted");
                true
            }
            Err(e) => {
                warn!(error = %e, "sign-up failed");
                self.record_error(AuthError::from(e));
                false
            }
        }
    }

    /// Resolves the current principal's profile again.
    ///
    /// Returns the role on success, or `None` if there is no session, the
    /// resolution failed (the error is recorded), or a session change
    /// arrived while the profile was being fetched.
    #[instrument(skip(self))]
    pub async fn refresh_profile(&self) -> Option<Role> {
        let token = self.issued.load(Ordering::SeqCst);
        let session = self.current_session()?;
        let principal_id = session.principal_id();
        let (profile, error) = match self.resolver.resolve(principal_id).await {
            Ok(profile) => (Some(profile), ErrorUpdate::Clear),
            Err(e) => (None, ErrorUpdate::Set(self.resolution_error(e, principal_id))),
        };
        let role = profile.as_ref().map(Profile::role);
        if self.commit_refresh(token, session.id(), profile, error) {
            role
        } else {
            None
        }
    }

    /// Saves a client's stated reason for requesting access, then refreshes
    /// the profile. Returns `true` if the change was saved.
    #[instrument(skip(self, reason))]
    pub async fn update_access_reason(&self, reason: &str) -> bool {
        let reason = reason.trim();
        if reason.is_empty() {
            self.record_error(AuthError::InvalidInput {
                details: "Please tell us why you are requesting access.".to_string(),
            });
            return false;
        }

        let Some(principal) = self.state().principal().cloned() else {
            self.record_error(AuthError::InvalidInput {
                details: "You are not signed in.".to_string(),
            });
            return false;
        };
        if principal.role() != Some(Role::Client) {
            self.record_error(AuthError::InvalidInput {
                details: "Only client accounts have an access request.".to_string(),
            });
            return false;
        }

        let principal_id = principal.session().principal_id();
        if let Err(e) = self
            .resolver
            .store()
            .update_access_reason(principal_id, reason)
            .await
        {
            warn!(error = %e, "access reason update failed");
            self.record_error(match e {
                StoreError::Network { details } => AuthError::NetworkError { details },
                other => AuthError::ProfileUpdateFailed {
                    details: other.to_string(),
                },
            });
            return false;
        }

        self.refresh_profile().await;
        true
    }

    pub(crate) fn issue_token(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn claim_listener(&self) -> bool {
        self.listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_listener(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    fn current_session(&self) -> Option<Session> {
        self.state
            .borrow()
            .state
            .principal()
            .map(|principal| principal.session().clone())
    }

    async fn resolve_and_commit(&self, token: u64, session: Session) -> Option<Profile> {
        let principal_id = session.principal_id().clone();
        match self.resolver.resolve(&principal_id).await {
            Ok(profile) => {
                self.commit(
                    token,
                    AuthState::authenticated(session, Some(profile.clone())),
                    ErrorUpdate::Clear,
                );
                Some(profile)
            }
            Err(e) => {
                let error = self.resolution_error(e, &principal_id);
                self.commit(
                    token,
                    AuthState::authenticated(session, None),
                    ErrorUpdate::Set(error),
                );
                None
            }
        }
    }

    fn resolution_error(&self, err: ResolveError, principal_id: &PrincipalId) -> AuthError {
        warn!(principal_id = %principal_id, error = %err, "profile resolution failed");
        err.into_auth_error(principal_id)
    }

    fn commit(&self, token: u64, next: AuthState, error: ErrorUpdate) -> bool {
        let mut transition = None;
        self.state.send_if_modified(|snapshot| {
            if self.issued.load(Ordering::SeqCst) != token {
                return false;
            }
            transition = Some((snapshot.state.label(), next.label()));
            snapshot.state = next;
            error.apply(&mut snapshot.error);
            true
        });

        match transition {
            Some((from, to)) => {
                info!(token, from, to, "auth state committed");
                true
            }
            None => {
                debug!(token, "discarding stale resolution");
                false
            }
        }
    }

    /// Replaces the profile of the displayed principal, keeping its session.
    /// Fails if a token was issued since `token` or the displayed session is
    /// no longer `session_id`.
    fn commit_refresh(
        &self,
        token: u64,
        session_id: &SessionId,
        profile: Option<Profile>,
        error: ErrorUpdate,
    ) -> bool {
        let committed = self.state.send_if_modified(|snapshot| {
            if self.issued.load(Ordering::SeqCst) != token {
                return false;
            }
            let session = match snapshot.state.principal() {
                Some(principal) if principal.session().id() == session_id => {
                    principal.session().clone()
                }
                _ => return false,
            };
            snapshot.state = AuthState::authenticated(session, profile);
            error.apply(&mut snapshot.error);
            true
        });

        if committed {
            info!(token, "profile refreshed");
        } else {
            debug!(token, "discarding profile refresh for superseded session");
        }
        committed
    }

    fn fail_login(&self, error: AuthError) {
        self.state.send_modify(|snapshot| {
            if snapshot.state.is_loading() {
                snapshot.state = AuthState::Unauthenticated;
            }
            snapshot.error = Some(error);
        });
    }

    fn record_error(&self, error: AuthError) {
        self.state.send_modify(|snapshot| snapshot.error = Some(error));
    }
}
