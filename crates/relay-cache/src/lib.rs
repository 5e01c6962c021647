//! # relay-cache
//!
//! Generic typed key/value access to an external in-memory cache service
//! (Redis-compatible). Every operation takes an immutable [`CacheOptions`]
//! value describing key namespacing, time-to-live, and the deadline bound
//! derived for the network call.
//!
//! This layer performs no retries; backend errors surface verbatim to the
//! caller.

#![deny(unsafe_code)]

pub mod errors;
pub mod options;
pub mod store;

pub use errors::{CacheError, Result};
pub use options::CacheOptions;
pub use store::CacheStore;
