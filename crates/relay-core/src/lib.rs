//! # relay-core
//!
//! Shared foundations for the relay workspace:
//!
//! - Branded ID newtypes (UUID v7, time-ordered)
//! - Explicit configuration threaded through constructors (no global state)

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod ids;

pub use config::RelayConfig;
pub use errors::ConfigError;
pub use ids::{ConnectionId, EventId, SessionId, UserId};
