//! # relay-server
//!
//! Axum HTTP + `WebSocket` server around the authenticated broadcast hub:
//!
//! - `GET /ws`: socket upgrade (non-upgrade requests get 426), handing the
//!   connection to the [`websocket::Manager`]
//! - `GET /health`: liveness probe with the current connection count
//! - Hub, per-connection client loops, and the event-bus bridge under
//!   [`websocket`]
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
pub use websocket::manager::{LoginNotifier, Manager};
