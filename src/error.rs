//! Centralized error types for mimestash.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mimestash library.
#[derive(Error, Debug)]
pub enum StashError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configured hash algorithm name is not recognized.
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Writing a payload or its sidecar to the store failed.
    #[error("Failed to store object {digest}: {source}")]
    StoreWrite {
        digest: String,
        source: std::io::Error,
    },

    /// The store was opened read-only and a write was attempted.
    #[error("Content store at '{0}' is read-only")]
    ReadOnly(PathBuf),

    /// No payload exists for the digest.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The payload exists but its metadata sidecar does not.
    #[error("Metadata missing for object {0}")]
    MetadataMissing(String),

    /// The metadata sidecar exists but cannot be read or parsed.
    #[error("Unreadable metadata for object {digest}: {reason}")]
    InvalidMetadata { digest: String, reason: String },

    /// A MIME structure or transfer-encoding problem.
    #[error("MIME decoding error: {0}")]
    MimeError(String),

    /// Detaching the part at `position` failed.
    #[error("Failed to detach part {position}{}: {source}", digest_suffix(.digest))]
    Detach {
        position: String,
        digest: Option<String>,
        source: Box<StashError>,
    },

    /// The request used a method other than GET.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
}

/// Convenience alias for `Result<T, StashError>`.
pub type Result<T> = std::result::Result<T, StashError>;

fn digest_suffix(digest: &Option<String>) -> String {
    match digest {
        Some(d) => format!(" (digest {d})"),
        None => String::new(),
    }
}

/// Helper to convert a bare `std::io::Error` together with a path.
impl StashError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `StoreWrite` variant for a digest.
    pub fn store_write(digest: impl Into<String>, source: std::io::Error) -> Self {
        Self::StoreWrite {
            digest: digest.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `StashError`
/// when no path context is available (rare, prefer `StashError::io`).
impl From<std::io::Error> for StashError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
