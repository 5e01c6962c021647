//! Connection registry and its processing loops.
//!
//! The registry map is owned by a single task that drains three bounded
//! intakes (register, unregister, broadcast). Client tasks never touch the
//! map; all mutation is serialized through the intakes, so no lock is
//! needed.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::Client;
use super::envelope::Envelope;

/// Capacity of the register and unregister intakes.
const CONTROL_INTAKE_CAPACITY: usize = 64;

/// Handles for feeding the hub's intakes.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<Envelope>,
}

impl HubHandle {
    /// Enqueue a client for registration.
    pub async fn register(&self, client: Arc<Client>) {
        if self.register_tx.send(client).await.is_err() {
            warn!("hub is gone, registration dropped");
        }
    }

    /// Enqueue a client for removal.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.unregister_tx.send(id).await.is_err() {
            warn!("hub is gone, unregistration dropped");
        }
    }

    /// Enqueue a broadcast without blocking.
    ///
    /// Returns `false` when the intake is full or the hub is gone; the
    /// caller logs and drops. One slow consumer must never stall producers.
    #[must_use]
    pub fn try_broadcast(&self, envelope: Envelope) -> bool {
        self.broadcast_tx.try_send(envelope).is_ok()
    }
}

/// The registry of live connections.
pub struct Hub {
    clients: HashMap<ConnectionId, Arc<Client>>,
}

impl Hub {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Spawn the hub task and return the intake handles.
    ///
    /// The task runs until `cancel` fires, then closes every remaining
    /// client.
    #[must_use]
    pub fn spawn(
        broadcast_capacity: usize,
        cancel: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_INTAKE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_INTAKE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(broadcast_capacity.max(1));

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
        };
        let task = tokio::spawn(Self::new().run(register_rx, unregister_rx, broadcast_rx, cancel));
        (handle, task)
    }

    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<Arc<Client>>,
        mut unregister_rx: mpsc::Receiver<ConnectionId>,
        mut broadcast_rx: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) {
        debug!("hub started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(client) = register_rx.recv() => self.handle_register(client),
                Some(id) = unregister_rx.recv() => self.handle_unregister(&id),
                Some(envelope) = broadcast_rx.recv() => self.handle_broadcast(&envelope),
            }
        }

        for client in self.clients.values() {
            client.close();
        }
        debug!(remaining = self.clients.len(), "hub stopped");
    }

    /// Add a client to the registry, whatever its auth state.
    pub(crate) fn handle_register(&mut self, client: Arc<Client>) {
        debug!(client_id = %client.id, "client registered");
        let _ = self.clients.insert(client.id.clone(), client);
    }

    /// Remove and close a client.
    pub(crate) fn handle_unregister(&mut self, id: &ConnectionId) {
        if let Some(client) = self.clients.remove(id) {
            client.close();
            debug!(client_id = %id, "client unregistered");
        }
    }

    /// Fan an envelope out to every authenticated client.
    ///
    /// Unauthenticated and closing clients are skipped. A full mailbox drops
    /// that client's copy; the broadcaster is never blocked.
    pub(crate) fn handle_broadcast(&mut self, envelope: &Envelope) {
        let mut delivered = 0usize;
        for client in self.clients.values() {
            if !client.is_authenticated() {
                continue;
            }
            if client.try_send(envelope.clone()) {
                delivered += 1;
            } else {
                warn!(client_id = %client.id, message_id = %envelope.id, "client mailbox full, dropping message");
            }
        }
        debug!(message_id = %envelope.id, delivered, "broadcast dispatched");
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::client::AuthStatus;
    use relay_core::UserId;
    use std::time::Duration;

    fn make_client(id: &str, capacity: usize) -> (Arc<Client>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Client::new(ConnectionId::from(id), tx)), rx)
    }

    #[test]
    fn register_and_unregister() {
        let mut hub = Hub::new();
        let (client, _rx) = make_client("c1", 8);
        hub.handle_register(client.clone());
        assert_eq!(hub.len(), 1);

        hub.handle_unregister(&ConnectionId::from("c1"));
        assert_eq!(hub.len(), 0);
        assert!(client.is_closed());
    }

    #[test]
    fn unregister_unknown_id_is_noop() {
        let mut hub = Hub::new();
        hub.handle_unregister(&ConnectionId::from("ghost"));
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn register_same_id_replaces() {
        let mut hub = Hub::new();
        let (a, _rx_a) = make_client("same", 8);
        let (b, _rx_b) = make_client("same", 8);
        hub.handle_register(a);
        hub.handle_register(b);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn broadcast_reaches_only_authenticated_clients() {
        let mut hub = Hub::new();
        let (authed_1, mut rx1) = make_client("c1", 8);
        let (authed_2, mut rx2) = make_client("c2", 8);
        let (fresh, mut rx3) = make_client("c3", 8);
        let (pending, mut rx4) = make_client("c4", 8);

        authed_1.promote(UserId::from("u-1"));
        authed_2.promote(UserId::from("u-2"));
        pending.set_status(AuthStatus::Pending);

        for client in [&authed_1, &authed_2, &fresh, &pending] {
            hub.handle_register(client.clone());
        }

        hub.handle_broadcast(&Envelope::broadcast(serde_json::Map::new()));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
        assert!(rx4.try_recv().is_err());
    }

    #[test]
    fn full_mailbox_never_blocks_the_broadcaster() {
        let mut hub = Hub::new();
        let (client, mut rx) = make_client("slow", 1);
        client.promote(UserId::from("u-1"));
        hub.handle_register(client.clone());

        // Fill the mailbox to capacity
        assert!(client.try_send(Envelope::auth_request()));

        let started = std::time::Instant::now();
        hub.handle_broadcast(&Envelope::broadcast(serde_json::Map::new()));
        assert!(started.elapsed() < Duration::from_millis(100));

        // Only the pre-filled message is in the mailbox
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(client.dropped_count(), 1);
    }

    #[tokio::test]
    async fn spawned_hub_processes_intakes() {
        let cancel = CancellationToken::new();
        let (handle, task) = Hub::spawn(16, cancel.clone());

        let (client, mut rx) = make_client("c1", 8);
        client.promote(UserId::from("u-1"));
        handle.register(client.clone()).await;

        assert!(handle.try_broadcast(Envelope::broadcast(serde_json::Map::new())));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, crate::websocket::envelope::MessageType::Broadcast);

        cancel.cancel();
        task.await.unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn full_broadcast_intake_reports_without_blocking() {
        // No hub task drains this handle, so the intake fills immediately.
        let (broadcast_tx, _broadcast_rx) = mpsc::channel(1);
        let (register_tx, _r) = mpsc::channel(1);
        let (unregister_tx, _u) = mpsc::channel(1);
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
        };

        assert!(handle.try_broadcast(Envelope::broadcast(serde_json::Map::new())));
        let started = std::time::Instant::now();
        assert!(!handle.try_broadcast(Envelope::broadcast(serde_json::Map::new())));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancelled_hub_closes_remaining_clients() {
        let cancel = CancellationToken::new();
        let (handle, task) = Hub::spawn(16, cancel.clone());

        let (client, _rx) = make_client("c1", 8);
        handle.register(client.clone()).await;

        // Give the hub a moment to process the registration
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();
        assert!(client.is_closed());
    }
}
