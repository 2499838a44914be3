//! Write-once content-addressed store.
//!
//! Layout:
//! ```text
//! {store_dir}/
//! ├── 3a7bd3e2...        # payload, mode 0400
//! ├── 3a7bd3e2....js     # {"type": ..., "name": ...}, mode 0400
//! └── .incoming-XXXXXX   # temp files, never visible under a digest name
//! ```
//!
//! Both files are written to a temp name first and published with a
//! no-clobber link, so a reader never sees a partial payload and two
//! processes racing on one digest both succeed without overwriting.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, StashError};
use crate::hash::Digest;
use crate::model::attachment::{ObjectMeta, StoredObject};

/// Extension of the metadata sidecar.
const METADATA_EXT: &str = "js";

/// Prefix of in-flight temp files.
const TEMP_PREFIX: &str = ".incoming-";

/// Filesystem-backed content store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
    read_only: bool,
}

impl ContentStore {
    /// Open a writable store, creating the directory if needed.
    pub fn at_path(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StashError::io(&dir, e))?;
        Ok(Self {
            dir,
            read_only: false,
        })
    }

    /// Open a store for reading only. Nothing is created on disk.
    pub fn read_only_at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            read_only: true,
        }
    }

    /// Directory holding the objects.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `store_dir/<digest>`.
    pub fn object_path(&self, digest: &Digest) -> PathBuf {
        self.dir.join(digest.as_str())
    }

    /// `store_dir/<digest>.js`.
    pub fn metadata_path(&self, digest: &Digest) -> PathBuf {
        self.dir
            .join(format!("{}.{}", digest.as_str(), METADATA_EXT))
    }

    /// `true` when both the payload and its sidecar are present.
    pub fn exists(&self, digest: &Digest) -> bool {
        self.object_path(digest).is_file() && self.metadata_path(digest).is_file()
    }

    /// Store a payload under `digest` unless it is already registered.
    ///
    /// An existing object is returned untouched. A payload left without its
    /// sidecar by an interrupted earlier run gets the sidecar written now.
    pub fn put(&self, digest: &Digest, payload: impl Read, meta: &ObjectMeta) -> Result<StoredObject> {
        if self.exists(digest) {
            debug!(digest = %digest, "Object already stored, skipping write");
            return self.stat(digest);
        }
        if self.read_only {
            return Err(StashError::ReadOnly(self.dir.clone()));
        }

        let object_path = self.object_path(digest);
        if !object_path.is_file() {
            self.publish(digest, &object_path, payload)?;
        }

        let metadata_path = self.metadata_path(digest);
        if !metadata_path.is_file() {
            let json = serde_json::to_vec(meta)
                .map_err(|e| StashError::store_write(digest.as_str(), io::Error::other(e)))?;
            self.publish(digest, &metadata_path, &json[..])?;
        }

        info!(digest = %digest, media_type = %meta.media_type, name = %meta.name, "Stored object");
        self.stat(digest)
    }

    /// Describe a stored object.
    ///
    /// `NotFound` when the payload is missing, `MetadataMissing` when only the
    /// sidecar is, `InvalidMetadata` when the sidecar cannot be read.
    pub fn stat(&self, digest: &Digest) -> Result<StoredObject> {
        let path = self.object_path(digest);
        let file_meta = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StashError::NotFound(digest.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StashError::NotFound(digest.to_string()))
            }
            Err(e) => return Err(StashError::io(&path, e)),
        };

        let metadata_path = self.metadata_path(digest);
        let json = match fs::read(&metadata_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StashError::MetadataMissing(digest.to_string()))
            }
            Err(e) => {
                return Err(StashError::InvalidMetadata {
                    digest: digest.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        let meta: ObjectMeta =
            serde_json::from_slice(&json).map_err(|e| StashError::InvalidMetadata {
                digest: digest.to_string(),
                reason: e.to_string(),
            })?;

        let modified = file_meta.modified().map_err(|e| StashError::io(&path, e))?;

        Ok(StoredObject {
            digest: digest.clone(),
            path,
            metadata_path,
            meta,
            size_bytes: file_meta.len(),
            last_modified: DateTime::<Utc>::from(modified),
        })
    }

    /// Open the payload for reading.
    pub fn open(&self, digest: &Digest) -> Result<File> {
        let path = self.object_path(digest);
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StashError::NotFound(digest.to_string())
            } else {
                StashError::io(&path, e)
            }
        })
    }

    /// Write `content` to a temp file and link it to `target` if absent.
    fn publish(&self, digest: &Digest, target: &Path, mut content: impl Read) -> Result<()> {
        let fail = |e: io::Error| StashError::store_write(digest.as_str(), e);

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(fail)?;
        io::copy(&mut content, tmp.as_file_mut()).map_err(fail)?;
        tmp.as_file_mut().flush().map_err(fail)?;
        tmp.as_file().sync_all().map_err(fail)?;
        make_owner_read_only(&tmp).map_err(fail)?;

        match tmp.persist_noclobber(target) {
            Ok(_) => {
                debug!(path = %target.display(), "Published store file");
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                // Another writer got there first; content is identical by construction.
                debug!(path = %target.display(), "Store file appeared concurrently");
                Ok(())
            }
            Err(e) => Err(fail(e.error)),
        }
    }
}

#[cfg(unix)]
fn make_owner_read_only(tmp: &NamedTempFile) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o400))
}

#[cfg(not(unix))]
fn make_owner_read_only(tmp: &NamedTempFile) -> io::Result<()> {
    let mut perms = tmp.as_file().metadata()?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(tmp.path(), perms)
}
