//! Request evaluation for the retrieval server.
//!
//! [`evaluate`] holds the whole decision logic (method check, digest
//! extraction, store lookup, conditional GET) and never touches the
//! transport, so it is tested directly against a store on disk.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::error::StashError;
use crate::hash::Digest;
use crate::model::attachment::StoredObject;
use crate::server::date::parse_http_date;
use crate::store::ContentStore;

/// Conditional request headers, as sent by the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conditions<'a> {
    pub if_modified_since: Option<&'a str>,
    pub if_none_match: Option<&'a str>,
}

/// Outcome of a retrieval request.
#[derive(Debug)]
pub enum Reply {
    /// 200, the payload should be streamed.
    Found(StoredObject),
    /// 304, the client's copy is current.
    NotModified(StoredObject),
    /// 404.
    NotFound,
    /// 405 with a diagnostic naming the method.
    MethodNotAllowed(String),
    /// 500 with a diagnostic naming the digest.
    ServerError(String),
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::Found(_) => 200,
            Reply::NotModified(_) => 304,
            Reply::NotFound => 404,
            Reply::MethodNotAllowed(_) => 405,
            Reply::ServerError(_) => 500,
        }
    }
}

/// Decide how to answer `method path` against `store`.
pub fn evaluate(store: &ContentStore, method: &str, path: &str, conditions: Conditions<'_>) -> Reply {
    if method != "GET" {
        let err = StashError::MethodNotAllowed(method.to_string());
        debug!(error = %err, "Rejecting request");
        return Reply::MethodNotAllowed(format!("{err}\n"));
    }

    let Some(digest) = Digest::from_request_path(path) else {
        debug!(path, "No digest in request path");
        return Reply::NotFound;
    };

    let object = match store.stat(&digest) {
        Ok(object) => object,
        Err(StashError::NotFound(_)) => {
            debug!(digest = %digest, "Unknown digest");
            return Reply::NotFound;
        }
        Err(e) => {
            error!(digest = %digest, error = %e, "Store lookup failed");
            return Reply::ServerError(format!("Cannot serve {digest}: {e}\n"));
        }
    };

    if let Some(since) = conditions.if_modified_since {
        match parse_http_date(since) {
            Some(client_time) if not_modified_since(object.last_modified, client_time) => {
                debug!(digest = %digest, "Not modified since client copy");
                return Reply::NotModified(object);
            }
            Some(_) => {}
            None => debug!(value = since, "Ignoring unparseable If-Modified-Since"),
        }
    }

    if let Some(tags) = conditions.if_none_match {
        if etag_matches(tags, &digest) {
            debug!(digest = %digest, "ETag matches client copy");
            return Reply::NotModified(object);
        }
    }

    Reply::Found(object)
}

/// HTTP dates have whole-second precision, so the file time is truncated
/// before comparing.
fn not_modified_since(last_modified: DateTime<Utc>, client_time: DateTime<Utc>) -> bool {
    last_modified.timestamp() <= client_time.timestamp()
}

/// Match an `If-None-Match` value: `*`, or a comma-separated list of tags,
/// each bare, quoted, or weak (`W/"..."`).
fn etag_matches(header: &str, digest: &Digest) -> bool {
    header.split(',').map(str::trim).any(|tag| {
        if tag == "*" {
            return true;
        }
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        let tag = tag
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(tag);
        tag.eq_ignore_ascii_case(digest.as_str())
    })
}
