//! Profile resolution for an authenticated principal.
//!
//! The resolver performs exactly one store fetch per call, bounded by a
//! timeout. It never retries on its own; callers re-trigger resolution on the
//! next session event or an explicit refresh.

use crate::error::{AuthError, StoreError};
use crate::profile::{Profile, ProfileRecord, ProfileValidationError};
use agency_portal_core::PrincipalId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Row-level access to the `profiles` table.
///
/// Row-level security on the backing store decides which rows a principal may
/// read or write; implementations do not re-check it.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetches the single profile row keyed by `principal_id`.
    async fn fetch_profile(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<ProfileRecord>, StoreError>;

    /// Stores the client's stated reason for requesting access.
    async fn update_access_reason(
        &self,
        principal_id: &PrincipalId,
        reason: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for Arc<T> {
    async fn fetch_profile(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        (**self).fetch_profile(principal_id).await
    }

    async fn update_access_reason(
        &self,
        principal_id: &PrincipalId,
        reason: &str,
    ) -> Result<(), StoreError> {
        (**self).update_access_reason(principal_id, reason).await
    }
}

/// Why a profile could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The principal has no profile row.
    NotFound,
    /// The row exists but its role (or a client's approval status) is unusable.
    InvalidRole { value: Option<String> },
    /// The store call failed.
    Store(StoreError),
    /// The store did not answer within the configured timeout.
    Timeout { after: Duration },
}

impl ResolveError {
    /// Converts into the error the state machine records for `principal_id`.
    #[must_use]
    pub fn into_auth_error(self, principal_id: &PrincipalId) -> AuthError {
        match self {
            Self::NotFound => AuthError::ProfileNotFound {
                principal_id: principal_id.clone(),
            },
            Self::InvalidRole { value } => AuthError::InvalidRoleConfiguration {
                principal_id: principal_id.clone(),
                value,
            },
            Self::Store(StoreError::Network { details }) => AuthError::NetworkError { details },
            Self::Store(other) => AuthError::ProfileLookupFailed {
                details: other.to_string(),
            },
            Self::Timeout { after } => AuthError::NetworkError {
                details: format!("profile lookup timed out after {}ms", after.as_millis()),
            },
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "profile not found"),
            Self::InvalidRole { value: Some(value) } => {
                write!(f, "invalid role configuration '{value}'")
            }
            Self::InvalidRole { value: None } => write!(f, "invalid role configuration"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Timeout { after } => {
                write!(f, "profile lookup timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<ProfileValidationError> for ResolveError {
    fn from(err: ProfileValidationError) -> Self {
        match err {
            ProfileValidationError::InvalidRole { value } => Self::InvalidRole { value },
            ProfileValidationError::InvalidApprovalStatus { value } => {
                Self::InvalidRole { value: Some(value) }
            }
        }
    }
}

/// Resolves principals to validated profiles.
pub struct ProfileResolver<S> {
    store: S,
    timeout: Duration,
}

impl<S: ProfileStore> ProfileResolver<S> {
    /// Creates a resolver over `store` with the given per-fetch timeout.
    #[must_use]
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the per-fetch timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches and validates the profile for `principal_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if the row is missing, invalid, the store
    /// fails, or the fetch exceeds the timeout.
    #[instrument(skip(self), fields(principal_id = %principal_id))]
    pub async fn resolve(&self, principal_id: &PrincipalId) -> Result<Profile, ResolveError> {
        let fetched = tokio::time::timeout(self.timeout, self.store.fetch_profile(principal_id))
            .await
            .map_err(|_| {
                warn!(timeout = ?self.timeout, "profile fetch timed out");
                ResolveError::Timeout {
                    after: self.timeout,
                }
            })?
            .map_err(ResolveError::Store)?;

        let record = fetched.ok_or_else(|| {
            warn!("principal has no profile row");
            ResolveError::NotFound
        })?;

        let profile = record.into_profile(principal_id).map_err(|e| {
            warn!(error = %e, "profile row failed validation");
            ResolveError::from(e)
        })?;

        debug!(role = %profile.role(), "profile resolved");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryProfileStore;
    use crate::role::{ApprovalStatus, Role};

    fn principal(id: &str) -> PrincipalId {
        PrincipalId::parse(id).expect("valid id")
    }

    fn resolver(store: Arc<InMemoryProfileStore>) -> ProfileResolver<Arc<InMemoryProfileStore>> {
        ProfileResolver::new(store, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn resolves_existing_profile() {
        let store = Arc::new(InMemoryProfileStore::new());
        let id = principal("client-1");
        store.insert(ProfileRecord::new(&id, Some("client"), Some("pending")));

        let profile = resolver(store.clone()).resolve(&id).await.expect("resolved");

        assert_eq!(profile.role(), Role::Client);
        assert_eq!(profile.approval_status(), Some(ApprovalStatus::Pending));
        assert_eq!(store.fetch_count(&id), 1);
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let store = Arc::new(InMemoryProfileStore::new());
        let id = principal("ghost");

        let err = resolver(store).resolve(&id).await.unwrap_err();

        assert_eq!(err, ResolveError::NotFound);
        assert!(matches!(
            err.into_auth_error(&id),
            AuthError::ProfileNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_role_is_invalid_role() {
        let store = Arc::new(InMemoryProfileStore::new());
        let id = principal("odd");
        store.insert(ProfileRecord::new(&id, Some("superadmin"), None));

        let err = resolver(store).resolve(&id).await.unwrap_err();

        assert_eq!(
            err,
            ResolveError::InvalidRole {
                value: Some("superadmin".to_string())
            }
        );
    }

    #[tokio::test]
    async fn store_failure_is_reported_once_without_retry() {
        let store = Arc::new(InMemoryProfileStore::new());
        let id = principal("client-2");
        store.insert(ProfileRecord::new(&id, Some("client"), Some("approved")));
        store.fail_next_fetch(StoreError::Network {
            details: "connection refused".to_string(),
        });

        let err = resolver(store.clone()).resolve(&id).await.unwrap_err();

        assert!(matches!(err, ResolveError::Store(StoreError::Network { .. })));
        assert_eq!(store.fetch_count(&id), 1);
        assert!(matches!(
            err.into_auth_error(&id),
            AuthError::NetworkError { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let store = Arc::new(InMemoryProfileStore::new());
        let id = principal("slow");
        store.insert(ProfileRecord::new(&id, Some("admin"), None));
        store.set_delay(&id, Duration::from_secs(60));

        let err = resolver(store).resolve(&id).await.unwrap_err();

        assert!(matches!(err, ResolveError::Timeout { .. }));
        assert!(err.into_auth_error(&id).is_retryable());
    }

    #[test]
    fn query_failures_map_to_lookup_failed() {
        let id = principal("p");
        let err = ResolveError::Store(StoreError::Query {
            details: "rls".to_string(),
        })
        .into_auth_error(&id);
        assert!(matches!(err, AuthError::ProfileLookupFailed { .. }));
    }
}
