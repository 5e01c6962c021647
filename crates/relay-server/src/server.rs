//! `RelayServer`: the axum application around the manager.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use relay_core::config::ServerConfig;
use relay_events::EventBus;
use relay_session::Authenticator;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::manager::Manager;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast manager owning the hub.
    pub manager: Arc<Manager>,
    /// Server settings.
    pub config: ServerConfig,
    /// When the server started.
    pub start_time: Instant,
}

/// The relay HTTP + WebSocket server.
pub struct RelayServer {
    config: ServerConfig,
    manager: Arc<Manager>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RelayServer {
    /// Build the server, spawning the hub and event-bus bridge.
    #[must_use]
    pub fn new(config: ServerConfig, authenticator: Arc<dyn Authenticator>, bus: &EventBus) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let manager = Manager::new(authenticator, bus, config.clone(), shutdown.token());

        Self {
            config,
            manager,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Build the axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .layer(cors_layer(&self.config.cors_allow_origins))
            .with_state(state)
    }

    /// The broadcast manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server settings.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until the shutdown coordinator fires.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        let token = self.shutdown.token();
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }
}

fn cors_layer(origins: &str) -> CorsLayer {
    if origins.trim() == "*" {
        return CorsLayer::new().allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new().allow_origin(list)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.manager.connection_count();
    Json(health::health_check(state.start_time, connections))
}

/// GET /ws
///
/// Negotiates the socket upgrade and hands the connection to the manager.
/// A request that is not an upgrade receives 426 Upgrade Required.
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(upgrade) => {
            let manager = state.manager.clone();
            upgrade
                .max_message_size(state.config.max_message_size)
                .on_upgrade(move |socket| manager.handle_socket(socket))
                .into_response()
        }
        Err(rejection) => {
            debug!(?rejection, "non-upgrade request on /ws");
            StatusCode::UPGRADE_REQUIRED.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use relay_cache::CacheStore;
    use relay_core::config::SecurityConfig;
    use relay_session::SessionStore;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        let cache = Arc::new(CacheStore::connect("redis://127.0.0.1:1/").unwrap());
        let security = SecurityConfig {
            jwt_secret: "test-secret".into(),
            token_issuer: "relay_api".into(),
        };
        let store = Arc::new(SessionStore::new(cache, &security));
        let bus = EventBus::new();
        RelayServer::new(ServerConfig::default(), store, &bus)
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_gets_426() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn accessors_expose_components() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.manager().connection_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[test]
    fn cors_layer_accepts_origin_lists() {
        // Wildcard and explicit lists both construct without panicking
        let _ = cors_layer("*");
        let _ = cors_layer("https://a.example, https://b.example");
        let _ = cors_layer("");
    }
}
