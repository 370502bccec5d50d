//! Forwards identity provider session events to the auth state machine.
//!
//! One listener may run per [`AuthManager`]. Each event is handed to its own
//! resolution task so a new event never waits behind a slow profile fetch;
//! the previous task is aborted, and token ordering in the manager discards
//! anything that still completes late.
//!
//! The listener slot is held by the forwarding task itself and released only
//! after its subscription is gone, so a replacement listener never overlaps
//! with a task that is still being torn down.

use crate::events::{SessionEvent, SessionSubscription};
use crate::manager::AuthManager;
use crate::provider::IdentityProvider;
use crate::resolver::ProfileStore;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Errors from starting a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerError {
    /// The manager already has an active listener.
    AlreadyRunning,
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "a session listener is already running"),
        }
    }
}

impl std::error::Error for ListenerError {}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owned by the forwarding task. Unsubscribes, then frees the manager's
/// listener slot, however the task ends.
struct ActiveListener<P, S>
where
    P: IdentityProvider + 'static,
    S: ProfileStore + 'static,
{
    manager: Arc<AuthManager<P, S>>,
    subscription: Option<SessionSubscription>,
}

impl<P, S> ActiveListener<P, S>
where
    P: IdentityProvider + 'static,
    S: ProfileStore + 'static,
{
    async fn recv(&mut self) -> Option<SessionEvent> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl<P, S> Drop for ActiveListener<P, S>
where
    P: IdentityProvider + 'static,
    S: ProfileStore + 'static,
{
    fn drop(&mut self) {
        self.unsubscribe();
        self.manager.release_listener();
    }
}

/// Handle to a running session listener.
///
/// Dropping the handle aborts the listener and any in-flight resolution. The
/// manager accepts a new listener once the aborted task has been torn down.
/// [`SessionListener::shutdown`] stops it gracefully.
pub struct SessionListener {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionListener {
    /// Subscribes to the manager's provider and starts forwarding events.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::AlreadyRunning`] if the manager already has a
    /// listener.
    pub fn spawn<P, S>(manager: Arc<AuthManager<P, S>>) -> Result<Self, ListenerError>
    where
        P: IdentityProvider + 'static,
        S: ProfileStore + 'static,
    {
        if !manager.claim_listener() {
            return Err(ListenerError::AlreadyRunning);
        }

        let active = ActiveListener {
            subscription: Some(manager.provider().subscribe()),
            manager,
        };
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(run(active, stopped));
        info!("session listener started");

        Ok(Self {
            stop: Some(stop),
            task: Some(task),
        })
    }

    /// Returns true while the forwarding task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Unsubscribes, lets the in-flight resolution finish, and waits for the
    /// task to exit. The manager accepts a new listener afterwards.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("session listener stopped");
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<P, S>(mut active: ActiveListener<P, S>, mut stopped: oneshot::Receiver<()>)
where
    P: IdentityProvider + 'static,
    S: ProfileStore + 'static,
{
    let mut in_flight: Option<AbortOnDrop> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            event = active.recv() => {
                let Some(event) = event else {
                    debug!("session event channel closed");
                    break;
                };

                let token = active.manager.issue_token();
                debug!(token, kind = ?event.kind, "session event received");
                let manager = active.manager.clone();
                in_flight = Some(AbortOnDrop(tokio::spawn(async move {
                    manager.apply_event(token, event).await;
                })));
            }
        }
    }

    active.unsubscribe();
    if let Some(mut last) = in_flight {
        let _ = (&mut last.0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessConfig;
    use crate::events::{SessionEvent, SessionEventKind};
    use crate::memory::{InMemoryIdentityProvider, InMemoryProfileStore};
    use crate::profile::ProfileRecord;
    use crate::role::Role;
    use crate::state::{AuthSnapshot, AuthState};
    use std::time::Duration;

    type TestManager = AuthManager<Arc<InMemoryIdentityProvider>, Arc<InMemoryProfileStore>>;

    fn setup() -> (
        Arc<InMemoryIdentityProvider>,
        Arc<InMemoryProfileStore>,
        Arc<TestManager>,
    ) {
        let store = Arc::new(InMemoryProfileStore::new());
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let id = provider.register_account("root@studio.test", "secret");
        store.insert(ProfileRecord::new(&id, Some("admin"), None));
        let manager = Arc::new(AuthManager::new(
            provider.clone(),
            store.clone(),
            AccessConfig::default(),
        ));
        (provider, store, manager)
    }

    async fn wait_until(
        manager: &TestManager,
        predicate: impl FnMut(&AuthSnapshot) -> bool,
    ) -> AuthSnapshot {
        let mut rx = manager.watch();
        let reached = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("state reached in time")
            .expect("manager alive");
        let snapshot = AuthSnapshot::clone(&reached);
        drop(reached);
        snapshot
    }

    #[tokio::test]
    async fn second_listener_is_rejected_until_first_stops() {
        let (_, _, manager) = setup();

        let first = SessionListener::spawn(manager.clone()).expect("first listener");
        assert!(first.is_running());
        assert_eq!(
            SessionListener::spawn(manager.clone()).err(),
            Some(ListenerError::AlreadyRunning)
        );

        first.shutdown().await;
        let second = SessionListener::spawn(manager.clone()).expect("slot released");
        second.shutdown().await;
        assert!(SessionListener::spawn(manager).is_ok());
    }

    #[tokio::test]
    async fn dropped_listener_unsubscribes_before_freeing_its_slot() {
        let (provider, _, manager) = setup();
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        assert_eq!(provider.channel().subscriber_count(), 1);

        drop(listener);
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.has_listener() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("aborted task torn down");

        assert_eq!(provider.channel().subscriber_count(), 0);
        let replacement = SessionListener::spawn(manager).expect("slot released");
        assert_eq!(provider.channel().subscriber_count(), 1);
        replacement.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_the_subscription() {
        let (provider, _, manager) = setup();

        let listener = SessionListener::spawn(manager).expect("listener");
        assert_eq!(provider.channel().subscriber_count(), 1);

        listener.shutdown().await;
        assert_eq!(provider.channel().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn logout_twice_converges_on_unauthenticated() {
        let (_, _, manager) = setup();
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        manager.login("root@studio.test", "secret").await;

        manager.logout().await;
        manager.logout().await;

        let snapshot = wait_until(&manager, |s| s.state == AuthState::Unauthenticated).await;
        assert_eq!(snapshot.error, None);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_logouts_converge_on_unauthenticated() {
        let (_, _, manager) = setup();
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        manager.login("root@studio.test", "secret").await;

        tokio::join!(manager.logout(), manager.logout());

        let snapshot = wait_until(&manager, |s| s.state == AuthState::Unauthenticated).await;
        assert_eq!(snapshot.error, None);
        listener.shutdown().await;
        assert_eq!(manager.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn external_revocation_signs_the_manager_out() {
        let (provider, _, manager) = setup();
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        manager.login("root@studio.test", "secret").await;
        assert_eq!(manager.state().role(), Some(Role::Admin));

        provider.revoke_session();

        wait_until(&manager, |s| s.state == AuthState::Unauthenticated).await;
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn sign_in_elsewhere_is_picked_up_from_events() {
        let (provider, _, manager) = setup();
        manager.initialize().await;
        let listener = SessionListener::spawn(manager.clone()).expect("listener");

        let session = provider.restore_session("root@studio.test").expect("restored");
        provider
            .channel()
            .emit(SessionEvent::active(SessionEventKind::SignedIn, session));

        let snapshot = wait_until(&manager, |s| s.state.role().is_some()).await;
        assert_eq!(snapshot.state.role(), Some(Role::Admin));
        listener.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn newer_event_is_not_queued_behind_a_slow_fetch() {
        let (provider, store, manager) = setup();
        manager.initialize().await;
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        let session = provider.restore_session("root@studio.test").expect("restored");
        store.push_fetch_delay(Duration::from_secs(3));

        provider.channel().emit(SessionEvent::active(
            SessionEventKind::SignedIn,
            session.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let started = tokio::time::Instant::now();
        provider.channel().emit(SessionEvent::active(
            SessionEventKind::TokenRefreshed,
            session.clone(),
        ));

        wait_until(&manager, |s| s.state.role() == Some(Role::Admin)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.fetch_count(session.principal_id()), 2);
        listener.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_resolution_cannot_resurrect_a_signed_out_session() {
        let (provider, store, manager) = setup();
        manager.initialize().await;
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        let session = provider.restore_session("root@studio.test").expect("restored");
        store.push_fetch_delay(Duration::from_secs(3));

        provider
            .channel()
            .emit(SessionEvent::active(SessionEventKind::SignedIn, session));
        tokio::time::sleep(Duration::from_millis(10)).await;
        provider.revoke_session();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(manager.state(), AuthState::Unauthenticated);
        listener.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn profile_refresh_does_not_outrank_a_newer_sign_in() {
        let (provider, store, manager) = setup();
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        manager.login("root@studio.test", "secret").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state().role(), Some(Role::Admin));

        let other = provider.register_account("lee@studio.test", "secret");
        store.insert(ProfileRecord::new(&other, Some("employee"), None));
        store.set_delay(&other, Duration::from_millis(100));
        let session = provider.restore_session("lee@studio.test").expect("restored");
        provider
            .channel()
            .emit(SessionEvent::active(SessionEventKind::SignedIn, session));
        tokio::time::sleep(Duration::from_millis(10)).await;

        manager.refresh_profile().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let state = manager.state();
        let principal = state.principal().expect("signed in");
        assert_eq!(principal.session().principal_id(), &other);
        assert_eq!(principal.role(), Some(Role::Employee));
        listener.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn profile_refresh_cannot_resurrect_a_signed_out_session() {
        let (provider, store, manager) = setup();
        let listener = SessionListener::spawn(manager.clone()).expect("listener");
        manager.login("root@studio.test", "secret").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let principal_id = manager
            .state()
            .principal()
            .map(|p| p.session().principal_id().clone())
            .expect("signed in");
        store.set_delay(&principal_id, Duration::from_millis(100));

        let refreshing = manager.clone();
        let refresh = tokio::spawn(async move { refreshing.refresh_profile().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        provider.revoke_session();

        assert_eq!(refresh.await.expect("refresh finished"), None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        listener.shutdown().await;
    }
}
