//! Per-connection client state.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relay_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::envelope::Envelope;

/// Authentication state of a connection.
///
/// `Pending` is reserved for a future two-phase handshake; no current path
/// enters it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// Connected, challenge outstanding.
    Unauthenticated,
    /// Reserved intermediate handshake state.
    Pending,
    /// Token verified; eligible for channel traffic.
    Authenticated,
    /// Terminal. The connection is closing or closed.
    Closed,
}

/// A connected client: identity, auth state, and the bounded outbound
/// mailbox drained by its write loop.
pub struct Client {
    /// Process-local connection id.
    pub id: ConnectionId,
    user_id: Mutex<Option<UserId>>,
    status: Mutex<AuthStatus>,
    mailbox: mpsc::Sender<Envelope>,
    dropped: AtomicU64,
    closed: CancellationToken,
}

impl Client {
    /// Create a client around the sending half of its mailbox.
    #[must_use]
    pub fn new(id: ConnectionId, mailbox: mpsc::Sender<Envelope>) -> Self {
        Self {
            id,
            user_id: Mutex::new(None),
            status: Mutex::new(AuthStatus::Unauthenticated),
            mailbox,
            dropped: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Current authentication status.
    #[must_use]
    pub fn status(&self) -> AuthStatus {
        *self.status.lock()
    }

    /// Set the authentication status.
    pub fn set_status(&self, status: AuthStatus) {
        *self.status.lock() = status;
    }

    /// Mark the handshake as complete, binding the resolved user.
    pub fn promote(&self, user_id: UserId) {
        *self.user_id.lock() = Some(user_id);
        *self.status.lock() = AuthStatus::Authenticated;
    }

    /// The resolved user id, absent until authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id.lock().clone()
    }

    /// Whether the client may receive channel traffic.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status() == AuthStatus::Authenticated
    }

    /// Queue an envelope for the write loop without blocking.
    ///
    /// Returns `false` when the mailbox is full or the write loop is gone;
    /// the message is dropped and the drop counter advances.
    pub fn try_send(&self, envelope: Envelope) -> bool {
        if self.mailbox.try_send(envelope).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped on a full or closed mailbox.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Initiate close. Either loop may call this; repeat calls are no-ops.
    pub fn close(&self) {
        *self.status.lock() = AuthStatus::Closed;
        self.closed.cancel();
    }

    /// Token the read and write loops select on to observe close.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether close has been initiated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> (Client, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(8);
        (Client::new(ConnectionId::from("c-1"), tx), rx)
    }

    #[test]
    fn starts_unauthenticated() {
        let (client, _rx) = make_client();
        assert_eq!(client.status(), AuthStatus::Unauthenticated);
        assert!(client.user_id().is_none());
        assert!(!client.is_authenticated());
        assert!(!client.is_closed());
    }

    #[test]
    fn promote_binds_user_and_status() {
        let (client, _rx) = make_client();
        client.promote(UserId::from("u-1"));
        assert!(client.is_authenticated());
        assert_eq!(client.user_id(), Some(UserId::from("u-1")));
    }

    #[tokio::test]
    async fn try_send_delivers_to_mailbox() {
        let (client, mut rx) = make_client();
        assert!(client.try_send(Envelope::auth_request()));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, super::super::envelope::MessageType::AuthRequest);
    }

    #[tokio::test]
    async fn full_mailbox_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(ConnectionId::from("c-2"), tx);

        assert!(client.try_send(Envelope::auth_request()));
        assert!(!client.try_send(Envelope::auth_request()));
        assert_eq!(client.dropped_count(), 1);
    }

    #[tokio::test]
    async fn closed_mailbox_drops() {
        let (tx, rx) = mpsc::channel(8);
        let client = Client::new(ConnectionId::from("c-3"), tx);
        drop(rx);
        assert!(!client.try_send(Envelope::auth_request()));
        assert_eq!(client.dropped_count(), 1);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let (client, _rx) = make_client();
        client.close();
        client.close();
        assert!(client.is_closed());
        assert_eq!(client.status(), AuthStatus::Closed);
    }

    #[tokio::test]
    async fn close_signal_observes_close() {
        let (client, _rx) = make_client();
        let signal = client.close_signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        client.close();
        waiter.await.unwrap();
    }

    #[test]
    fn pending_state_exists_but_is_not_authenticated() {
        let (client, _rx) = make_client();
        client.set_status(AuthStatus::Pending);
        assert_eq!(client.status(), AuthStatus::Pending);
        assert!(!client.is_authenticated());
    }
}
