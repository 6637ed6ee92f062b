//! Observable authentication state.

use tokio::sync::watch;
use tracing::debug;

/// The session's authentication state. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Authentication is being established (initial state, and the state
    /// while a login or refresh exchange is in flight).
    Pending,
    /// No usable credentials.
    Unauthenticated,
    /// A valid access token is in place.
    Authenticated,
}

/// Publisher for [`AuthState`] built on a watch channel.
///
/// Carries the watch channel's contract, which is exactly the one the
/// session needs: subscribers see the latest value immediately on attach
/// (never historical ones), and consecutive duplicate states are suppressed
/// before delivery.
pub(crate) struct StateCell {
    tx: watch::Sender<AuthState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthState::Pending);
        Self { tx }
    }

    /// Current state snapshot.
    pub fn current(&self) -> AuthState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes; the receiver starts at the latest value.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    /// Publish a state, skipping notification when it equals the current
    /// one. Returns whether subscribers were notified.
    pub fn publish(&self, next: AuthState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = ?next, "Auth state changed");
        }
        changed
    }
}
