//! Derived authentication state.
//!
//! Nothing here is persisted. The state machine owns the only writable copy
//! and publishes [`AuthSnapshot`]s; everything else reads them.

use crate::error::AuthError;
use crate::profile::Profile;
use crate::role::{ApprovalStatus, Role};
use crate::session::Session;

/// A signed-in principal and, when resolution succeeded, their profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    session: Session,
    profile: Option<Profile>,
}

impl AuthenticatedPrincipal {
    /// Creates an authenticated principal.
    ///
    /// `profile` is `None` when the session is valid but the authorization
    /// record could not be resolved.
    #[must_use]
    pub fn new(session: Session, profile: Option<Profile>) -> Self {
        Self { session, profile }
    }

    /// Returns the session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the resolved profile, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Returns the role, or `None` when the profile is unresolved.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(Profile::role)
    }

    /// Returns the approval status, if the profile carries one.
    #[must_use]
    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        self.profile.as_ref().and_then(Profile::approval_status)
    }
}

/// Where authentication stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// The first session check has not completed.
    Loading,
    /// No session.
    Unauthenticated,
    /// A session exists. The role may still be unknown.
    Authenticated(Box<AuthenticatedPrincipal>),
}

impl AuthState {
    /// Creates the authenticated state.
    #[must_use]
    pub fn authenticated(session: Session, profile: Option<Profile>) -> Self {
        Self::Authenticated(Box::new(AuthenticatedPrincipal::new(session, profile)))
    }

    /// Returns true while the first session check is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if a session exists, whether or not the role is known.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Returns the authenticated principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&AuthenticatedPrincipal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            _ => None,
        }
    }

    /// Returns the resolved role, if any.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.principal().and_then(AuthenticatedPrincipal::role)
    }

    /// Returns the resolved approval status, if any.
    #[must_use]
    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        self.principal().and_then(AuthenticatedPrincipal::approval_status)
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated(principal) if principal.profile.is_none() => {
                "authenticated_without_role"
            }
            Self::Authenticated(_) => "authenticated",
        }
    }
}

/// What readers observe: the state plus the last auth error, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub error: Option<AuthError>,
}

impl AuthSnapshot {
    /// The snapshot before the first session check.
    #[must_use]
    pub fn loading() -> Self {
        Self {
            state: AuthState::Loading,
            error: None,
        }
    }

    /// Returns the human-readable error message, if an error is recorded.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(AuthError::user_message)
    }
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self::loading()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use agency_portal_core::PrincipalId;
    use chrono::Duration;

    fn session() -> Session {
        Session::new(
            SessionId::from("sess_1"),
            PrincipalId::parse("p-1").expect("valid id"),
            "token".to_string(),
            None,
            Duration::hours(1),
        )
    }

    #[test]
    fn loading_is_the_initial_snapshot() {
        let snapshot = AuthSnapshot::default();
        assert!(snapshot.state.is_loading());
        assert!(snapshot.error_message().is_none());
    }

    #[test]
    fn degraded_authenticated_has_no_role() {
        let state = AuthState::authenticated(session(), None);

        assert!(state.is_authenticated());
        assert_eq!(state.role(), None);
        assert_eq!(state.approval_status(), None);
        assert_eq!(state.label(), "authenticated_without_role");
    }

    #[test]
    fn authenticated_exposes_profile_fields() {
        let profile = Profile::new(
            PrincipalId::parse("p-1").expect("valid id"),
            Role::Client,
            Some(ApprovalStatus::Approved),
        );
        let state = AuthState::authenticated(session(), Some(profile));

        assert_eq!(state.role(), Some(Role::Client));
        assert_eq!(state.approval_status(), Some(ApprovalStatus::Approved));
        assert_eq!(state.label(), "authenticated");
        assert_eq!(
            state.principal().map(|p| p.session().id().as_str()),
            Some("sess_1")
        );
    }

    #[test]
    fn unauthenticated_has_no_principal() {
        let state = AuthState::Unauthenticated;
        assert!(!state.is_authenticated());
        assert!(state.principal().is_none());
        assert_eq!(state.role(), None);
    }
}
