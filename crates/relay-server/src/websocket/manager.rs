//! Public entry point around the hub: wraps upgraded sockets, runs the
//! per-connection loops and the authentication handshake, and bridges
//! event-bus notifications into hub broadcasts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::config::ServerConfig;
use relay_core::{ConnectionId, UserId};
use relay_events::{BROADCAST_TOPIC, BusEvent, EventBus};
use relay_session::Authenticator;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::AUTH_FAILURE_GRACE;
use super::client::{AuthStatus, Client};
use super::envelope::{CHANNEL_SYSTEM, CHANNEL_USER, Envelope, MessageType};
use super::hub::{Hub, HubHandle};

/// Capability for pushing a login notice to connected clients.
///
/// Controllers that complete a login depend on this named interface rather
/// than on the manager type itself.
pub trait LoginNotifier: Send + Sync {
    /// Fan a `user_join` notice out to authenticated clients.
    fn notify_user_login(&self, user_id: &UserId, attributes: Map<String, Value>);
}

/// Owns the hub and the event-bus bridge; the only producer-facing surface.
pub struct Manager {
    hub: HubHandle,
    authenticator: Arc<dyn Authenticator>,
    config: ServerConfig,
    connections: AtomicUsize,
}

impl Manager {
    /// Spawn the hub and the event-bus bridge, returning the shared manager.
    ///
    /// Both background tasks exit when `cancel` fires.
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        bus: &EventBus,
        config: ServerConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (hub, _hub_task) = Hub::spawn(config.broadcast_capacity, cancel.clone());

        let bridge_rx = bus.subscribe(BROADCAST_TOPIC);
        drop(tokio::spawn(run_bridge(bridge_rx, hub.clone(), cancel)));

        Arc::new(Self {
            hub,
            authenticator,
            config,
            connections: AtomicUsize::new(0),
        })
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Drive one upgraded connection from challenge to disconnect.
    #[instrument(skip_all, fields(client_id))]
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (ws_tx, ws_rx) = socket.split();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let client = Arc::new(Client::new(ConnectionId::new(), mailbox_tx));
        let _ = tracing::Span::current().record("client_id", client.id.as_str());

        info!("client connected");
        let _ = self.connections.fetch_add(1, Ordering::Relaxed);

        // Challenge first so it is the first frame the peer observes, then
        // hand the client to the registry.
        let _ = client.try_send(Envelope::auth_request());
        self.hub.register(client.clone()).await;

        let writer = tokio::spawn(write_loop(
            client.clone(),
            ws_tx,
            mailbox_rx,
            self.config.ping_interval(),
            self.config.write_timeout(),
        ));

        self.read_loop(&client, ws_rx).await;

        client.close();
        self.hub.unregister(client.id.clone()).await;
        let _ = writer.await;
        let _ = self.connections.fetch_sub(1, Ordering::Relaxed);
        info!("client disconnected");
    }

    /// Non-blocking broadcast to all authenticated clients.
    ///
    /// A full intake drops the message with a warning; the caller is never
    /// blocked.
    pub fn broadcast(&self, envelope: Envelope) {
        if !self.hub.try_broadcast(envelope) {
            warn!("broadcast intake full, dropping message");
        }
    }

    /// Build and broadcast the well-known login notice.
    pub fn notify_user_login(&self, user_id: &UserId, attributes: Map<String, Value>) {
        let envelope = Envelope::user_join(user_id, attributes);
        info!(user_id = %user_id, message_id = %envelope.id, "broadcasting user login");
        self.broadcast(envelope);
    }

    /// Deserialize inbound frames one at a time and route them until the
    /// peer disconnects, errors, goes silent past the liveness deadline, or
    /// the connection is closed from elsewhere.
    async fn read_loop(&self, client: &Arc<Client>, mut ws_rx: SplitStream<WebSocket>) {
        let closed = client.close_signal();
        let pong_timeout = self.config.pong_timeout();

        loop {
            // Any inbound frame, pongs included, resets the liveness window.
            let frame = tokio::select! {
                () = closed.cancelled() => break,
                next = tokio::time::timeout(pong_timeout, ws_rx.next()) => match next {
                    Err(_) => {
                        warn!("liveness deadline expired");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(err))) => {
                        warn!(error = %err, "read error");
                        break;
                    }
                    Ok(Some(Ok(frame))) => frame,
                },
            };

            let text = match &frame {
                Message::Text(text) => text.as_str(),
                Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!(len = bytes.len(), "ignoring non-UTF8 binary frame");
                        continue;
                    }
                },
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    debug!("peer sent close frame");
                    break;
                }
            };

            let envelope: Envelope = match serde_json::from_str(text) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "malformed envelope, dropping connection");
                    break;
                }
            };

            self.route(client, &envelope).await;
        }
    }

    /// Route one inbound envelope.
    ///
    /// Auth responses feed the handshake. Anything else from a client that
    /// has not authenticated triggers the failure path; authenticated
    /// traffic is dispatched by channel tag.
    async fn route(&self, client: &Arc<Client>, envelope: &Envelope) {
        if envelope.kind == MessageType::AuthResponse {
            self.handle_auth_response(client, envelope).await;
            return;
        }

        match client.status() {
            AuthStatus::Authenticated => dispatch(client, envelope),
            AuthStatus::Unauthenticated | AuthStatus::Pending => {
                warn!(message_type = ?envelope.kind, "blocking message from unauthenticated client");
                self.reject(client, "Authentication required");
            }
            AuthStatus::Closed => {}
        }
    }

    /// Run the handshake for one `auth_response`.
    ///
    /// The payload type check precedes verification; verification failures
    /// and session-store outages are treated alike and fail closed.
    async fn handle_auth_response(&self, client: &Arc<Client>, envelope: &Envelope) {
        if client.status() != AuthStatus::Unauthenticated {
            warn!("auth response from already authenticated client");
            return;
        }

        let token = match envelope.auth_token() {
            Ok(token) => token.to_owned(),
            Err(err) => {
                warn!(error = %err, "auth response payload rejected");
                self.reject(client, "Invalid token format");
                return;
            }
        };

        match self.authenticator.authenticate(&token).await {
            Ok(identity) => {
                client.promote(identity.user_id.clone());
                info!(user_id = %identity.user_id, "client authenticated");
                let _ = client.try_send(Envelope::auth_success(&identity.user_id));
            }
            Err(err) => {
                warn!(error = %err, "token verification failed");
                self.reject(client, "Invalid token");
            }
        }
    }

    /// Queue exactly one failure notice, then close after the grace delay
    /// so the write loop can flush it.
    fn reject(&self, client: &Arc<Client>, reason: &str) {
        if client.status() == AuthStatus::Closed {
            return;
        }
        client.set_status(AuthStatus::Closed);
        let _ = client.try_send(Envelope::auth_failure(reason));

        let client = client.clone();
        drop(tokio::spawn(async move {
            tokio::time::sleep(AUTH_FAILURE_GRACE).await;
            client.close();
        }));
    }
}

impl LoginNotifier for Manager {
    fn notify_user_login(&self, user_id: &UserId, attributes: Map<String, Value>) {
        Manager::notify_user_login(self, user_id, attributes);
    }
}

/// Dispatch an authenticated message by channel tag.
fn dispatch(client: &Arc<Client>, envelope: &Envelope) {
    match envelope.channel.as_deref() {
        Some(CHANNEL_SYSTEM) => {
            debug!(message_id = %envelope.id, user_id = ?client.user_id(), "system message");
        }
        Some(CHANNEL_USER) => {
            debug!(message_id = %envelope.id, user_id = ?client.user_id(), "user message");
        }
        other => {
            debug!(message_id = %envelope.id, channel = ?other, "message on unrecognized channel");
        }
    }
}

/// Drain the client's mailbox to the socket and keep the peer alive with
/// periodic pings. Every write is bounded by the write deadline; a failed
/// or overdue write terminates the connection.
async fn write_loop(
    client: Arc<Client>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut mailbox_rx: mpsc::Receiver<Envelope>,
    ping_interval: Duration,
    write_timeout: Duration,
) {
    let closed = client.close_signal();
    let mut ticker = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            maybe = mailbox_rx.recv() => {
                let Some(envelope) = maybe else { break };
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(message_id = %envelope.id, error = %err, "failed to serialize envelope");
                        continue;
                    }
                };
                if !bounded_write(&mut ws_tx, Message::Text(json.into()), write_timeout).await {
                    warn!(message_id = %envelope.id, "socket write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                debug!("sending ping");
                if !bounded_write(&mut ws_tx, Message::Ping(Vec::new().into()), write_timeout).await {
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(write_timeout, ws_tx.send(Message::Close(None))).await;
    client.close();
}

async fn bounded_write(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_timeout: Duration,
) -> bool {
    matches!(
        tokio::time::timeout(write_timeout, ws_tx.send(message)).await,
        Ok(Ok(()))
    )
}

/// Forward event-bus broadcast notifications into the hub.
async fn run_bridge(
    mut rx: broadcast::Receiver<BusEvent>,
    hub: HubHandle,
    cancel: CancellationToken,
) {
    debug!("event bridge started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = rx.recv() => match result {
                Ok(event) => {
                    debug!(event_id = %event.id, event_type = %event.event_type, "bridging bus event");
                    if !hub.try_broadcast(Envelope::broadcast(event.data)) {
                        warn!(event_id = %event.id, "broadcast intake full, dropping bus event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "event bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("event bus closed, bridge exiting");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::SessionId;
    use relay_session::errors::AuthError;
    use relay_session::store::AuthIdentity;

    struct StaticAuth {
        identity: Option<AuthIdentity>,
    }

    impl StaticAuth {
        fn accepting(user: &str) -> Arc<Self> {
            Arc::new(Self {
                identity: Some(AuthIdentity {
                    user_id: UserId::from(user),
                    session_id: SessionId::from("s-1"),
                }),
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self { identity: None })
        }
    }

    #[async_trait]
    impl Authenticator for StaticAuth {
        async fn authenticate(&self, _token: &str) -> Result<AuthIdentity, AuthError> {
            self.identity.clone().ok_or(AuthError::SessionNotFound)
        }
    }

    fn make_manager(authenticator: Arc<dyn Authenticator>) -> (Arc<Manager>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let manager = Manager::new(
            authenticator,
            &bus,
            ServerConfig::default(),
            CancellationToken::new(),
        );
        (manager, bus)
    }

    fn make_client(capacity: usize) -> (Arc<Client>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Client::new(ConnectionId::new(), tx)), rx)
    }

    fn auth_response(token: &str) -> Envelope {
        serde_json::from_str(&format!(
            r#"{{"type":"auth_response","data":{{"token":{token}}}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn message_before_auth_gets_one_failure_then_close() {
        let (manager, _bus) = make_manager(StaticAuth::rejecting());
        let (client, mut rx) = make_client(8);

        let message: Envelope = serde_json::from_str(r#"{"type":"message"}"#).unwrap();
        manager.route(&client, &message).await;

        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.kind, MessageType::AuthFailure);
        assert!(
            failure
                .failure_reason()
                .unwrap()
                .contains("Authentication required")
        );

        // A second blocked message produces no further notice
        manager.route(&client, &message).await;
        assert!(rx.try_recv().is_err());

        // The connection closes within the grace delay
        tokio::time::sleep(AUTH_FAILURE_GRACE * 3).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn non_string_token_is_rejected_before_verification() {
        // An accepting authenticator proves the type check comes first.
        let (manager, _bus) = make_manager(StaticAuth::accepting("u-1"));
        let (client, mut rx) = make_client(8);

        manager.route(&client, &auth_response("12345")).await;

        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.kind, MessageType::AuthFailure);
        assert!(
            failure
                .failure_reason()
                .unwrap()
                .contains("Invalid token format")
        );
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn valid_token_promotes_and_acknowledges() {
        let (manager, _bus) = make_manager(StaticAuth::accepting("u-1"));
        let (client, mut rx) = make_client(8);

        manager.route(&client, &auth_response("\"good\"")).await;

        assert!(client.is_authenticated());
        assert_eq!(client.user_id(), Some(UserId::from("u-1")));

        let success = rx.recv().await.unwrap();
        assert_eq!(success.kind, MessageType::AuthSuccess);
        assert_eq!(success.data.unwrap()["userId"], "u-1");
    }

    #[tokio::test]
    async fn failed_verification_rejects_with_invalid_token() {
        let (manager, _bus) = make_manager(StaticAuth::rejecting());
        let (client, mut rx) = make_client(8);

        manager.route(&client, &auth_response("\"bad\"")).await;

        let failure = rx.recv().await.unwrap();
        assert!(failure.failure_reason().unwrap().contains("Invalid token"));
        tokio::time::sleep(AUTH_FAILURE_GRACE * 3).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn duplicate_auth_response_is_ignored() {
        let (manager, _bus) = make_manager(StaticAuth::accepting("u-1"));
        let (client, mut rx) = make_client(8);

        manager.route(&client, &auth_response("\"good\"")).await;
        manager.route(&client, &auth_response("\"good\"")).await;

        assert_eq!(rx.recv().await.unwrap().kind, MessageType::AuthSuccess);
        assert!(rx.try_recv().is_err());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn authenticated_message_is_dispatched_not_rejected() {
        let (manager, _bus) = make_manager(StaticAuth::accepting("u-1"));
        let (client, mut rx) = make_client(8);
        client.promote(UserId::from("u-1"));

        let message: Envelope =
            serde_json::from_str(r#"{"type":"message","channel":"user"}"#).unwrap();
        manager.route(&client, &message).await;

        assert!(rx.try_recv().is_err());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn notify_user_login_reaches_authenticated_clients() {
        let (manager, _bus) = make_manager(StaticAuth::accepting("u-1"));
        let (client, mut rx) = make_client(8);
        client.promote(UserId::from("u-1"));
        manager.hub.register(client.clone()).await;

        let mut attrs = Map::new();
        let _ = attrs.insert("login".into(), Value::from("alice"));
        LoginNotifier::notify_user_login(manager.as_ref(), &UserId::from("u-9"), attrs);

        let notice = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.kind, MessageType::UserJoin);
        assert_eq!(notice.user_id, Some(UserId::from("u-9")));
        assert_eq!(notice.data.unwrap()["login"], "alice");
    }

    #[tokio::test]
    async fn bus_events_are_bridged_to_clients() {
        let (manager, bus) = make_manager(StaticAuth::accepting("u-1"));
        let (client, mut rx) = make_client(8);
        client.promote(UserId::from("u-1"));
        manager.hub.register(client.clone()).await;
        // Let the hub process the registration
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut data = Map::new();
        let _ = data.insert("note".into(), Value::from("deploy finished"));
        let _ = bus.publish(BROADCAST_TOPIC, BusEvent::new("announcement", data));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, MessageType::Broadcast);
        assert_eq!(received.data.unwrap()["note"], "deploy finished");
    }

    #[tokio::test]
    async fn connection_count_starts_at_zero() {
        let (manager, _bus) = make_manager(StaticAuth::rejecting());
        assert_eq!(manager.connection_count(), 0);
    }
}
