//! Content-addressed payload storage.

pub mod content;

pub use content::ContentStore;
