//! Walks a message tree and replaces oversized leaves with download links.

use tracing::{debug, info, trace};

use crate::config::Config;
use crate::detach::template::{render_message, render_url};
use crate::error::{Result, StashError};
use crate::hash::{self, Digest, HashAlgorithm};
use crate::model::attachment::{DetachedPart, ObjectMeta};
use crate::model::part::{MessagePart, PartContent};
use crate::store::ContentStore;

/// Sidecar name used when a part declares no filename.
pub const FALLBACK_NAME: &str = "attachment";

/// Everything the scanner needs besides the store.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub algorithm: HashAlgorithm,
    pub key: Vec<u8>,
    pub url_template: String,
    pub message_template: String,
    /// Host written into URLs.
    pub host: String,
    /// Port written into URLs.
    pub port: u16,
}

impl ScanSettings {
    /// Collect the detach settings from a loaded configuration.
    ///
    /// Fails with `UnsupportedAlgorithm` when `common.alg` is unknown.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            algorithm: config.hash_algorithm()?,
            key: config.common.key.as_bytes().to_vec(),
            url_template: config.milter.urlfmt.clone(),
            message_template: config.milter.msgfmt.clone(),
            host: config.server.name.clone(),
            port: config.server.port,
        })
    }
}

/// Detaches leaves larger than a threshold into a [`ContentStore`].
#[derive(Debug)]
pub struct AttachmentScanner {
    settings: ScanSettings,
    store: ContentStore,
}

impl AttachmentScanner {
    pub fn new(settings: ScanSettings, store: ContentStore) -> Self {
        Self { settings, store }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Scan `root` depth-first in pre-order and detach every leaf whose
    /// decoded body is strictly larger than `threshold` bytes.
    ///
    /// The tree keeps its shape: containers and their child order are never
    /// touched. The first failure aborts the scan; parts already detached
    /// stay valid in the store.
    pub fn scan(&self, root: &mut MessagePart, threshold: u64) -> Result<Vec<DetachedPart>> {
        let mut detached = Vec::new();
        let mut stack: Vec<(String, &mut MessagePart)> = vec![("0".to_string(), root)];

        while let Some((position, part)) = stack.pop() {
            if part.is_container() {
                // Reverse push keeps the walk in document order.
                for (index, child) in part.children_mut().iter_mut().enumerate().rev() {
                    stack.push((format!("{position}.{index}"), child));
                }
                continue;
            }

            if let Some(record) = self.detach_leaf(&position, part, threshold)? {
                detached.push(record);
            }
        }

        debug!(count = detached.len(), threshold, "Scan finished");
        Ok(detached)
    }

    fn detach_leaf(
        &self,
        position: &str,
        part: &mut MessagePart,
        threshold: u64,
    ) -> Result<Option<DetachedPart>> {
        // Transfer decoding never grows a body, so small raw bodies can be
        // skipped without decoding them.
        if let PartContent::Leaf(body) = part.content() {
            if body.raw.len() as u64 <= threshold {
                trace!(position, size = body.raw.len(), "Part below threshold");
                return Ok(None);
            }
        }

        let body = part
            .decoded_body()
            .map_err(|e| detach_error(position, None, e))?;
        let size = body.len() as u64;
        if size <= threshold {
            trace!(position, size, "Decoded part below threshold");
            return Ok(None);
        }

        let digest = hash::digest(self.settings.algorithm, &self.settings.key, &body[..])
            .map_err(|e| detach_error(position, None, e.into()))?;

        let meta = ObjectMeta::new(
            part.media_type(),
            part.suggested_name().unwrap_or(FALLBACK_NAME),
        );
        self.store
            .put(&digest, &body[..], &meta)
            .map_err(|e| detach_error(position, Some(&digest), e))?;

        let url = render_url(
            &self.settings.url_template,
            &self.settings.host,
            self.settings.port,
            digest.as_str(),
        );
        let text = render_message(&self.settings.message_template, &url);
        part.replace_with_text(&text)
            .map_err(|e| detach_error(position, Some(&digest), e))?;

        info!(
            position,
            digest = %digest,
            size,
            media_type = %meta.media_type,
            name = %meta.name,
            "Detached part"
        );

        Ok(Some(DetachedPart {
            position: position.to_string(),
            digest,
            size,
            media_type: meta.media_type,
            name: meta.name,
            url,
        }))
    }
}

fn detach_error(position: &str, digest: Option<&Digest>, source: StashError) -> StashError {
    StashError::Detach {
        position: position.to_string(),
        digest: digest.map(Digest::to_string),
        source: Box::new(source),
    }
}
