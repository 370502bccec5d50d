//! Session-change events and the channel that carries them.
//!
//! Identity provider adapters own a [`SessionChannel`] and emit on it whenever
//! the session changes. Consumers hold a [`SessionSubscription`]; dropping it
//! (or calling [`SessionSubscription::unsubscribe`]) detaches immediately.

use crate::session::Session;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of undelivered events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// What happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// The provider restored a session at startup.
    InitialSession,
    /// A principal signed in.
    SignedIn,
    /// The session ended (explicit sign-out, revocation, or expiry).
    SignedOut,
    /// Tokens were rotated for the same principal.
    TokenRefreshed,
    /// Principal attributes changed at the provider.
    UserUpdated,
}

/// A session change together with the session snapshot it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

impl SessionEvent {
    /// Creates an event for a session that is now active.
    #[must_use]
    pub fn active(kind: SessionEventKind, session: Session) -> Self {
        Self {
            kind,
            session: Some(session),
        }
    }

    /// Creates a sign-out event.
    #[must_use]
    pub fn signed_out() -> Self {
        Self {
            kind: SessionEventKind::SignedOut,
            session: None,
        }
    }
}

/// Emitting side of the session event stream.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionChannel {
    /// Creates a channel buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Delivers an event to every current subscriber.
    ///
    /// Returns how many subscribers received it. Having none is not an error.
    pub fn emit(&self, event: SessionEvent) -> usize {
        let kind = event.kind;
        match self.sender.send(event) {
            Ok(delivered) => {
                debug!(?kind, delivered, "session event emitted");
                delivered
            }
            Err(_) => {
                debug!(?kind, "session event dropped: no subscribers");
                0
            }
        }
    }

    /// Opens a new subscription. Events emitted before this call are not seen.
    #[must_use]
    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A live subscription to session events.
#[derive(Debug)]
pub struct SessionSubscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl SessionSubscription {
    /// Waits for the next event.
    ///
    /// Returns `None` once the emitting side is gone. If this subscriber fell
    /// behind, the skipped events are dropped and the oldest retained one is
    /// returned; only the newest snapshot matters to consumers.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session subscriber lagged; skipping stale events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Detaches from the channel.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
