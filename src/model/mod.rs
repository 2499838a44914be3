//! Core data model types: the MIME part tree and detached-object records.

pub mod attachment;
pub mod part;
