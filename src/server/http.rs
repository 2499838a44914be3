//! axum transport for the retrieval server.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::model::attachment::StoredObject;
use crate::server::date::format_http_date;
use crate::server::handler::{self, Conditions, Reply};
use crate::store::ContentStore;

/// Shared state handed to every request.
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<ContentStore>,
}

impl ServerState {
    pub fn new(store: ContentStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Build the router. Every path and method lands in the same handler.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .fallback(retrieve)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr:port` and serve until Ctrl-C or SIGTERM.
pub async fn serve(addr: &str, port: u16, store: ContentStore) -> anyhow::Result<()> {
    let store_dir = store.dir().to_path_buf();
    let listener = tokio::net::TcpListener::bind((addr, port))
        .await
        .with_context(|| format!("Failed to bind to {addr}:{port}"))?;
    let local = listener.local_addr().context("Listener has no local address")?;

    info!(addr = %local, store = %store_dir.display(), "Serving attachments");

    axum::serve(listener, router(ServerState::new(store)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT, shutting down");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn retrieve(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let header_text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let if_modified_since = header_text(header::IF_MODIFIED_SINCE);
    let if_none_match = header_text(header::IF_NONE_MATCH);
    let path = uri.path().to_owned();
    let store = Arc::clone(&state.store);

    // stat, sidecar read and open are plain filesystem calls.
    let looked_up = tokio::task::spawn_blocking(move || {
        let conditions = Conditions {
            if_modified_since: if_modified_since.as_deref(),
            if_none_match: if_none_match.as_deref(),
        };
        match handler::evaluate(&store, method.as_str(), &path, conditions) {
            Reply::Found(object) => match store.open(&object.digest) {
                Ok(file) => (Reply::Found(object), Some(file)),
                Err(e) => {
                    error!(digest = %object.digest, error = %e, "Cannot open payload");
                    let message = format!("Cannot serve {}: {e}\n", object.digest);
                    (Reply::ServerError(message), None)
                }
            },
            reply => (reply, None),
        }
    })
    .await;

    let (reply, file) = match looked_up {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Retrieval task failed");
            (Reply::ServerError("Internal error\n".into()), None)
        }
    };

    match (reply, file) {
        (Reply::Found(object), Some(file)) => stream_object(object, file),
        (Reply::Found(object), None) => plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Cannot serve {}\n", object.digest),
        ),
        (Reply::NotModified(object), _) => not_modified(&object),
        (Reply::NotFound, _) => plain(StatusCode::NOT_FOUND, "Not found\n".into()),
        (Reply::MethodNotAllowed(message), _) => {
            let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, message);
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET"));
            response
        }
        (Reply::ServerError(message), _) => plain(StatusCode::INTERNAL_SERVER_ERROR, message),
    }
}

/// 200 with the payload streamed from disk. Dropping the body (client gone)
/// closes the file.
fn stream_object(object: StoredObject, file: std::fs::File) -> Response {
    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(file)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&object.meta.media_type))
        .header(header::CONTENT_DISPOSITION, content_disposition(&object.meta.name))
        .header(header::CONTENT_LENGTH, object.size_bytes)
        .header(header::LAST_MODIFIED, format_http_date(object.last_modified))
        .header(header::ETAG, object.digest.as_str())
        .header(header::CONNECTION, "close")
        .body(body)
        .map_err(|e| {
            error!(digest = %object.digest, error = %e, "Failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR
        })
        .unwrap_or_else(|status| status.into_response())
}

fn not_modified(object: &StoredObject) -> Response {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(header::LAST_MODIFIED, format_http_date(object.last_modified))
        .header(header::ETAG, object.digest.as_str())
        .header(header::CONNECTION, "close")
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::NOT_MODIFIED.into_response())
}

fn plain(status: StatusCode, message: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CONNECTION, "close")
        .body(Body::from(message))
        .unwrap_or_else(|_| status.into_response())
}

/// Stored media type, or `application/octet-stream` if it is not a valid
/// header value.
fn content_type(media_type: &str) -> header::HeaderValue {
    header::HeaderValue::from_str(media_type)
        .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream"))
}

/// `attachment; filename="..."`, plus an RFC 8187 `filename*` when the name
/// is not plain ASCII.
fn content_disposition(name: &str) -> header::HeaderValue {
    let safe: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut value = format!("attachment; filename=\"{safe}\"");
    if !safe.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        for byte in safe.bytes() {
            if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
                value.push(byte as char);
            } else {
                value.push_str(&format!("%{byte:02X}"));
            }
        }
    }

    header::HeaderValue::from_bytes(value.as_bytes())
        .unwrap_or_else(|_| header::HeaderValue::from_static("attachment"))
}
