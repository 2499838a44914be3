//! Email parsing: header splitting, MIME structure, and transfer decoding.

pub mod encoding;
pub mod header;
pub mod mime;
