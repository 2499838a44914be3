//! `mimestash`: detach large MIME parts into a content-addressed store.
//!
//! The detach path parses a message into an owned part tree, stores every
//! oversized leaf under its keyed digest and replaces it with a short text
//! part carrying a download URL. The retrieval path serves those payloads
//! back over HTTP with conditional-GET support.

pub mod config;
pub mod detach;
pub mod error;
pub mod export;
pub mod hash;
pub mod model;
pub mod parser;
pub mod server;
pub mod store;
