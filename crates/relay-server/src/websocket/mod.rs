//! WebSocket hub: connection registry, per-client loops, authentication
//! handshake, and broadcast fan-out.

pub mod client;
pub mod envelope;
pub mod hub;
pub mod manager;

use std::time::Duration;

/// Grace delay between queueing an `auth_failure` notice and closing the
/// socket, so the client can observe the reason.
pub const AUTH_FAILURE_GRACE: Duration = Duration::from_millis(100);
