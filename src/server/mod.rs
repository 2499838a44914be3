//! Read-only HTTP retrieval of detached payloads.

pub mod date;
pub mod handler;
pub mod http;

pub use http::{router, serve, ServerState};
