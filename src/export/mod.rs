//! Serialization of rewritten messages.

pub mod eml;
