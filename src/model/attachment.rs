//! Detached attachment records.
//!
//! The payload bytes live in the content store; these types only describe
//! them. Size and modification time are always read from the filesystem.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::hash::Digest;

/// Sidecar record stored next to each payload as `<digest>.js`.
///
/// Serialized as exactly `{"type": ..., "name": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectMeta {
    /// Media type of the detached part (e.g. `"application/pdf"`).
    #[serde(rename = "type")]
    pub media_type: String,

    /// Filename offered to downloaders.
    pub name: String,
}

impl ObjectMeta {
    pub fn new(media_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            name: name.into(),
        }
    }
}

/// A payload registered in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Identity of the payload.
    pub digest: Digest,

    /// `store_dir/<digest>`.
    pub path: PathBuf,

    /// `store_dir/<digest>.js`.
    pub metadata_path: PathBuf,

    /// Media type and filename from the sidecar.
    pub meta: ObjectMeta,

    /// Payload size as reported by the filesystem.
    pub size_bytes: u64,

    /// Modification time of the payload file.
    pub last_modified: DateTime<Utc>,
}

/// Summary of one part replaced during a scan.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DetachedPart {
    /// Dotted child-index path, `"0"` being the root part.
    pub position: String,

    pub digest: Digest,

    /// Decoded payload size in bytes.
    pub size: u64,

    pub media_type: String,

    pub name: String,

    /// URL written into the placeholder.
    pub url: String,
}
