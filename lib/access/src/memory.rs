//! In-memory identity provider and profile store.
//!
//! These implement the provider and store seams without a hosted backend.
//! They behave like the real services where the state machine can observe
//! it: events are emitted on every session change, sign-out clears local
//! state even when told to fail, and sign-up can populate a profile row the
//! way the backend's signup trigger does. Failure and latency injection make
//! error paths and response reordering reproducible in tests.

use crate::error::{ProviderError, StoreError};
use crate::events::{SessionChannel, SessionEvent, SessionEventKind, SessionSubscription};
use crate::profile::ProfileRecord;
use crate::provider::{Credentials, IdentityProvider, SignupMetadata};
use crate::resolver::ProfileStore;
use crate::session::{Session, SessionId};
use agency_portal_core::PrincipalId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use ulid::Ulid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory `profiles` table.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    rows: Mutex<HashMap<PrincipalId, ProfileRecord>>,
    delays: Mutex<HashMap<PrincipalId, Duration>>,
    queued_delays: Mutex<VecDeque<Duration>>,
    next_failure: Mutex<Option<StoreError>>,
    fetches: Mutex<HashMap<PrincipalId, usize>>,
}

impl InMemoryProfileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row, keyed by its id.
    ///
    /// Rows whose id is not a valid principal id are ignored.
    pub fn insert(&self, record: ProfileRecord) {
        if let Ok(id) = PrincipalId::parse(record.id.clone()) {
            lock(&self.rows).insert(id, record);
        }
    }

    /// Removes a row.
    pub fn remove(&self, principal_id: &PrincipalId) -> Option<ProfileRecord> {
        lock(&self.rows).remove(principal_id)
    }

    /// Returns a copy of a row.
    #[must_use]
    pub fn get(&self, principal_id: &PrincipalId) -> Option<ProfileRecord> {
        lock(&self.rows).get(principal_id).cloned()
    }

    /// Applies an administrator-style change to a row in place.
    pub fn update(&self, principal_id: &PrincipalId, change: impl FnOnce(&mut ProfileRecord)) {
        if let Some(row) = lock(&self.rows).get_mut(principal_id) {
            change(row);
        }
    }

    /// Delays every fetch for `principal_id` by `delay`.
    pub fn set_delay(&self, principal_id: &PrincipalId, delay: Duration) {
        lock(&self.delays).insert(principal_id.clone(), delay);
    }

    /// Queues a one-shot delay consumed by the next fetch, in FIFO order.
    ///
    /// Queued delays take precedence over per-principal delays.
    pub fn push_fetch_delay(&self, delay: Duration) {
        lock(&self.queued_delays).push_back(delay);
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: StoreError) {
        *lock(&self.next_failure) = Some(error);
    }

    /// Returns how many fetches were issued for `principal_id`.
    #[must_use]
    pub fn fetch_count(&self, principal_id: &PrincipalId) -> usize {
        lock(&self.fetches).get(principal_id).copied().unwrap_or(0)
    }

    /// Returns how many fetches were issued in total.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        lock(&self.fetches).values().sum()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn fetch_profile(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        *lock(&self.fetches).entry(principal_id.clone()).or_insert(0) += 1;

        // The row is read when the request is issued; the delay models the
        // response travelling back.
        let failure = lock(&self.next_failure).take();
        let snapshot = lock(&self.rows).get(principal_id).cloned();
        let delay = lock(&self.queued_delays)
            .pop_front()
            .or_else(|| lock(&self.delays).get(principal_id).copied());

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(snapshot),
        }
    }

    async fn update_access_reason(
        &self,
        principal_id: &PrincipalId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut rows = lock(&self.rows);
        let row = rows.get_mut(principal_id).ok_or_else(|| StoreError::Query {
            details: format!("no profile row for {principal_id}"),
        })?;
        row.access_reason = Some(reason.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Account {
    principal_id: PrincipalId,
    password: String,
}

/// In-memory identity provider.
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    current: Mutex<Option<Session>>,
    channel: SessionChannel,
    session_ttl: chrono::Duration,
    signup_profiles: Option<Arc<InMemoryProfileStore>>,
    next_sign_out_failure: Mutex<Option<ProviderError>>,
    offline: AtomicBool,
    sign_in_calls: AtomicUsize,
}

impl InMemoryIdentityProvider {
    /// Creates a provider with no accounts and one-hour sessions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            channel: SessionChannel::default(),
            session_ttl: chrono::Duration::hours(1),
            signup_profiles: None,
            next_sign_out_failure: Mutex::new(None),
            offline: AtomicBool::new(false),
            sign_in_calls: AtomicUsize::new(0),
        }
    }

    /// Writes a `client`/`pending` profile row into `store` on every sign-up.
    #[must_use]
    pub fn with_signup_profiles(mut self, store: Arc<InMemoryProfileStore>) -> Self {
        self.signup_profiles = Some(store);
        self
    }

    /// Sets the lifetime of issued sessions.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Registers an account directly and returns its principal id.
    pub fn register_account(&self, email: &str, password: &str) -> PrincipalId {
        let principal_id = Self::new_principal_id();
        lock(&self.accounts).insert(
            email.trim().to_lowercase(),
            Account {
                principal_id: principal_id.clone(),
                password: password.to_string(),
            },
        );
        principal_id
    }

    /// Puts a session in place as if the client library had restored it from
    /// storage. No event is emitted.
    pub fn restore_session(&self, email: &str) -> Option<Session> {
        let account = lock(&self.accounts).get(&email.trim().to_lowercase()).cloned()?;
        let session = self.issue_session(&account, email);
        *lock(&self.current) = Some(session.clone());
        Some(session)
    }

    /// Rotates the current session's tokens and emits `TokenRefreshed`.
    pub fn refresh_tokens(&self) -> Option<Session> {
        let refreshed = {
            let mut current = lock(&self.current);
            let session = current.as_mut()?;
            session.refresh(
                format!("at_{}", Ulid::new()),
                Some(format!("rt_{}", Ulid::new())),
                self.session_ttl,
            );
            session.clone()
        };
        self.channel.emit(SessionEvent::active(
            SessionEventKind::TokenRefreshed,
            refreshed.clone(),
        ));
        Some(refreshed)
    }

    /// Ends the session from outside this process (another tab, revocation).
    pub fn revoke_session(&self) {
        lock(&self.current).take();
        self.channel.emit(SessionEvent::signed_out());
    }

    /// Makes the next remote sign-out fail with `error`.
    pub fn fail_next_sign_out(&self, error: ProviderError) {
        *lock(&self.next_sign_out_failure) = Some(error);
    }

    /// Simulates losing (or regaining) connectivity to the provider.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns how many sign-in attempts reached the provider.
    #[must_use]
    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    /// Returns the event channel, e.g. to inspect the subscriber count.
    #[must_use]
    pub fn channel(&self) -> &SessionChannel {
        &self.channel
    }

    fn new_principal_id() -> PrincipalId {
        PrincipalId::parse(Ulid::new().to_string().to_lowercase())
            .unwrap_or_else(|_| unreachable!("ULIDs are never empty"))
    }

    fn issue_session(&self, account: &Account, email: &str) -> Session {
        Session::new(
            SessionId::new(format!("sess_{}", Ulid::new())),
            account.principal_id.clone(),
            format!("at_{}", Ulid::new()),
            Some(format!("rt_{}", Ulid::new())),
            self.session_ttl,
        )
        .with_email(Some(email.trim().to_lowercase()))
    }

    fn check_online(&self) -> Result<(), ProviderError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Network {
                details: "identity provider unreachable".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(Session::is_expired) {
            debug!("dropping expired stored session");
            current.take();
        }
        Ok(current.clone())
    }

    fn subscribe(&self) -> SessionSubscription {
        self.channel.subscribe()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ProviderError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let account = lock(&self.accounts)
            .get(&credentials.email().to_lowercase())
            .cloned()
            .filter(|account| account.password == credentials.password())
            .ok_or(ProviderError::InvalidCredentials)?;

        let session = self.issue_session(&account, credentials.email());
        *lock(&self.current) = Some(session.clone());
        self.channel.emit(SessionEvent::active(
            SessionEventKind::SignedIn,
            session.clone(),
        ));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let remote = match lock(&self.next_sign_out_failure).take() {
            Some(error) => Err(error),
            None => self.check_online(),
        };

        lock(&self.current).take();
        self.channel.emit(SessionEvent::signed_out());
        remote
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        metadata: &SignupMetadata,
    ) -> Result<(), ProviderError> {
        self.check_online()?;

        let email = credentials.email().to_lowercase();
        if lock(&self.accounts).contains_key(&email) {
            return Err(ProviderError::SignUpRejected {
                reason: "User already registered".to_string(),
            });
        }

        let principal_id = self.register_account(&email, credentials.password());
        if let Some(store) = &self.signup_profiles {
            let metadata = metadata.normalized();
            store.insert(ProfileRecord {
                full_name: metadata.full_name,
                email: Some(email),
                company: metadata.company,
                phone: metadata.phone,
                access_reason: metadata.access_reason,
                ..ProfileRecord::new(&principal_id, Some("client"), Some("pending"))
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials::new(email, password).expect("valid credentials")
    }

    #[tokio::test]
    async fn sign_in_emits_signed_in_and_stores_session() {
        let provider = InMemoryIdentityProvider::new();
        let principal_id = provider.register_account("ana@studio.test", "pw");
        let mut events = provider.subscribe();

        let session = provider
            .sign_in(&creds("ANA@studio.test", "pw"))
            .await
            .expect("signed in");

        assert_eq!(session.principal_id(), &principal_id);
        assert_eq!(session.email(), Some("ana@studio.test"));
        let event = events.recv().await.expect("event");
        assert_eq!(event.kind, SessionEventKind::SignedIn);
        assert_eq!(
            provider.current_session().await.expect("ok"),
            Some(session)
        );
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let provider = InMemoryIdentityProvider::new();
        provider.register_account("ana@studio.test", "pw");

        let err = provider
            .sign_in(&creds("ana@studio.test", "nope"))
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::InvalidCredentials);
        assert_eq!(provider.current_session().await.expect("ok"), None);
        assert_eq!(provider.sign_in_calls(), 1);
    }

    #[tokio::test]
    async fn offline_sign_in_is_network_error() {
        let provider = InMemoryIdentityProvider::new();
        provider.register_account("ana@studio.test", "pw");
        provider.set_offline(true);

        let err = provider
            .sign_in(&creds("ana@studio.test", "pw"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Network { .. }));
    }

    #[tokio::test]
    async fn failed_sign_out_still_clears_local_session() {
        let provider = InMemoryIdentityProvider::new();
        provider.register_account("ana@studio.test", "pw");
        provider
            .sign_in(&creds("ana@studio.test", "pw"))
            .await
            .expect("signed in");
        let mut events = provider.subscribe();
        provider.fail_next_sign_out(ProviderError::Network {
            details: "timeout".to_string(),
        });

        let result = provider.sign_out().await;

        assert!(matches!(result, Err(ProviderError::Network { .. })));
        assert_eq!(provider.current_session().await.expect("ok"), None);
        assert_eq!(events.recv().await, Some(SessionEvent::signed_out()));
    }

    #[tokio::test]
    async fn sign_up_creates_pending_client_profile() {
        let store = Arc::new(InMemoryProfileStore::new());
        let provider = InMemoryIdentityProvider::new().with_signup_profiles(store.clone());
        let metadata = SignupMetadata {
            full_name: Some("Dana Reyes".to_string()),
            access_reason: Some("Rental quotes".to_string()),
            ..SignupMetadata::default()
        };

        provider
            .sign_up(&creds("dana@pier.test", "pw"), &metadata)
            .await
            .expect("signed up");
        let session = provider
            .sign_in(&creds("dana@pier.test", "pw"))
            .await
            .expect("signed in");

        let row = store.get(session.principal_id()).expect("profile row");
        assert_eq!(row.role.as_deref(), Some("client"));
        assert_eq!(row.approval_status.as_deref(), Some("pending"));
        assert_eq!(row.full_name.as_deref(), Some("Dana Reyes"));
        assert_eq!(row.email.as_deref(), Some("dana@pier.test"));
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let provider = InMemoryIdentityProvider::new();
        provider.register_account("dana@pier.test", "pw");

        let err = provider
            .sign_up(&creds("dana@pier.test", "pw2"), &SignupMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::SignUpRejected { .. }));
    }

    #[tokio::test]
    async fn expired_restored_session_is_dropped() {
        let provider =
            InMemoryIdentityProvider::new().with_session_ttl(chrono::Duration::seconds(-1));
        provider.register_account("ana@studio.test", "pw");
        provider.restore_session("ana@studio.test").expect("account exists");

        assert_eq!(provider.current_session().await.expect("ok"), None);
    }

    #[tokio::test]
    async fn refresh_tokens_emits_token_refreshed() {
        let provider = InMemoryIdentityProvider::new();
        provider.register_account("ana@studio.test", "pw");
        let original = provider.restore_session("ana@studio.test").expect("restored");
        let mut events = provider.subscribe();

        let refreshed = provider.refresh_tokens().expect("session present");

        assert_eq!(refreshed.id(), original.id());
        assert_ne!(refreshed.access_token(), original.access_token());
        let event = events.recv().await.expect("event");
        assert_eq!(event.kind, SessionEventKind::TokenRefreshed);
    }

    #[tokio::test]
    async fn store_counts_fetches_and_injects_failures() {
        let store = InMemoryProfileStore::new();
        let id = PrincipalId::parse("p-1").expect("valid id");
        store.insert(ProfileRecord::new(&id, Some("admin"), None));
        store.fail_next_fetch(StoreError::Query {
            details: "denied".to_string(),
        });

        assert!(store.fetch_profile(&id).await.is_err());
        assert!(store.fetch_profile(&id).await.expect("ok").is_some());
        assert_eq!(store.fetch_count(&id), 2);
        assert_eq!(store.total_fetches(), 2);
    }

    #[tokio::test]
    async fn update_access_reason_requires_existing_row() {
        let store = InMemoryProfileStore::new();
        let id = PrincipalId::parse("p-2").expect("valid id");

        assert!(store.update_access_reason(&id, "why").await.is_err());

        store.insert(ProfileRecord::new(&id, Some("client"), Some("pending")));
        store
            .update_access_reason(&id, "Need quotes")
            .await
            .expect("updated");
        assert_eq!(
            store.get(&id).and_then(|row| row.access_reason).as_deref(),
            Some("Need quotes")
        );
    }
}
