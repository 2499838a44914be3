//! Integration tests for the retrieval server, driven through the router
//! without opening a socket.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use mimestash::hash::{self, Digest, HashAlgorithm};
use mimestash::model::attachment::{ObjectMeta, StoredObject};
use mimestash::server::date::format_http_date;
use mimestash::server::{router, ServerState};
use mimestash::store::ContentStore;

const PAYLOAD: &[u8] = b"%PDF-1.4 pretend this is a large report";

struct Fixture {
    _tmp: tempfile::TempDir,
    dir: std::path::PathBuf,
    object: StoredObject,
}

fn stored_fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("store");
    let store = ContentStore::at_path(&dir).unwrap();
    let digest = hash::digest(HashAlgorithm::Sha256, b"", PAYLOAD).unwrap();
    let object = store
        .put(&digest, PAYLOAD, &ObjectMeta::new("application/pdf", "q3 report.pdf"))
        .unwrap();
    Fixture {
        _tmp: tmp,
        dir,
        object,
    }
}

async fn send(fixture: &Fixture, request: Request<Body>) -> Response {
    let app = router(ServerState::new(ContentStore::read_only_at(&fixture.dir)));
    app.oneshot(request).await.unwrap()
}

fn get(path: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(path)
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

// ─── 200 ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_returns_payload_and_headers() {
    let fx = stored_fixture();
    let digest = fx.object.digest.as_str();
    let response = send(&fx, get(&format!("/{digest}")).body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "application/pdf");
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=\"q3 report.pdf\""
    );
    assert_eq!(
        header_str(&response, header::CONTENT_LENGTH),
        PAYLOAD.len().to_string()
    );
    assert_eq!(header_str(&response, header::ETAG), digest);
    assert_eq!(
        header_str(&response, header::LAST_MODIFIED),
        format_http_date(fx.object.last_modified)
    );
    assert_eq!(header_str(&response, header::CONNECTION), "close");
    assert_eq!(body_bytes(response).await, PAYLOAD);
}

#[tokio::test]
async fn test_path_is_lenient() {
    let fx = stored_fixture();
    let upper = fx.object.digest.as_str().to_ascii_uppercase();
    let response = send(&fx, get(&format!("/-{upper}-/")).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Hex letters in surrounding words are kept and change the digest.
    let path = format!("/files/{upper}");
    let response = send(&fx, get(&path).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ─── Conditional GET ────────────────────────────────────────────────

#[tokio::test]
async fn test_if_none_match_equal_is_304() {
    let fx = stored_fixture();
    let digest = fx.object.digest.as_str();
    let request = get(&format!("/{digest}"))
        .header(header::IF_NONE_MATCH, digest)
        .body(Body::empty())
        .unwrap();
    let response = send(&fx, request).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header_str(&response, header::ETAG), digest);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_if_none_match_different_is_200() {
    let fx = stored_fixture();
    let digest = fx.object.digest.as_str();
    let request = get(&format!("/{digest}"))
        .header(header::IF_NONE_MATCH, "\"0123456789abcdef\"")
        .body(Body::empty())
        .unwrap();
    let response = send(&fx, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, PAYLOAD);
}

#[tokio::test]
async fn test_if_modified_since_later_is_304() {
    let fx = stored_fixture();
    let later = format_http_date(fx.object.last_modified + chrono::Duration::days(1));
    let request = get(&format!("/{}", fx.object.digest))
        .header(header::IF_MODIFIED_SINCE, later)
        .body(Body::empty())
        .unwrap();
    let response = send(&fx, request).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_if_modified_since_earlier_is_200() {
    let fx = stored_fixture();
    let earlier = format_http_date(fx.object.last_modified - chrono::Duration::days(1));
    let request = get(&format!("/{}", fx.object.digest))
        .header(header::IF_MODIFIED_SINCE, earlier)
        .body(Body::empty())
        .unwrap();
    let response = send(&fx, request).await;

    assert_eq!(response.status(), StatusCode::OK);
}

// ─── Errors ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_digest_is_404() {
    let fx = stored_fixture();
    let unknown: Digest = "deadbeef".repeat(8).parse().unwrap();
    let response = send(&fx, get(&format!("/{unknown}")).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_metadata_is_500() {
    let fx = stored_fixture();
    std::fs::remove_file(&fx.object.metadata_path).unwrap();

    let response = send(
        &fx,
        get(&format!("/{}", fx.object.digest)).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains(fx.object.digest.as_str()), "{body}");
}

#[tokio::test]
async fn test_post_is_405() {
    let fx = stored_fixture();
    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}", fx.object.digest))
        .body(Body::from("data"))
        .unwrap();
    let response = send(&fx, request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(header_str(&response, header::ALLOW), "GET");
}

// ─── Concurrency ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_share_store() {
    let fx = stored_fixture();
    let app = router(ServerState::new(ContentStore::read_only_at(&fx.dir)));
    let path = format!("/{}", fx.object.digest);

    let mut handles = Vec::new();
    for i in 0..16 {
        let app = app.clone();
        // Every fourth request is conditional and must not read the payload.
        let mut request = get(&path);
        if i % 4 == 0 {
            request = request.header(header::IF_NONE_MATCH, fx.object.digest.as_str());
        }
        let request = request.body(Body::empty()).unwrap();
        handles.push(tokio::spawn(async move {
            let response = app.oneshot(request).await.unwrap();
            (i, response.status(), body_bytes(response).await)
        }));
    }

    for handle in handles {
        let (i, status, body) = handle.await.unwrap();
        if i % 4 == 0 {
            assert_eq!(status, StatusCode::NOT_MODIFIED);
            assert!(body.is_empty());
        } else {
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, PAYLOAD);
        }
    }
}
