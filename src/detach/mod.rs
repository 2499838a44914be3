//! Detach path: find oversized parts, store them, leave a link behind.

pub mod scanner;
pub mod template;

pub use scanner::{AttachmentScanner, ScanSettings};
