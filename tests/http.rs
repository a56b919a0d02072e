mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use git_relay::http_handler::{create_router, HttpState};
use git_relay::{encode_advertisement, Config, PackRelay, RootedAccess};
use tower::ServiceExt;

use common::*;

fn router(root: &std::path::Path, relay: PackRelay, timeout: Duration) -> Router {
    create_router(HttpState::new(
        Arc::new(relay),
        RootedAccess::new(root),
        timeout,
    ))
}

async fn send(router: Router, request: Request<Body>) -> Response {
    router.oneshot(request).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn assert_uncached(response: &Response) {
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()[header::EXPIRES], "0");
}

#[tokio::test]
async fn info_refs_streams_advertisement() {
    let (root, _repo) = repo_root();
    let app = router(root.path(), stub_relay("printf 'REFS'"), Duration::from_secs(5));

    let response = send(app, get("/foo.git/info/refs?service=git-upload-pack")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-git-upload-pack-advertisement"
    );
    assert_uncached(&response);

    let mut expected = encode_advertisement("git-upload-pack").to_vec();
    expected.extend_from_slice(b"REFS");
    assert_eq!(body_bytes(response).await, expected);
}

#[tokio::test]
async fn info_refs_requires_known_service() {
    let (root, _repo) = repo_root();

    let app = router(root.path(), stub_relay("true"), Duration::from_secs(5));
    let response = send(app, get("/foo.git/info/refs")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let app = router(root.path(), stub_relay("true"), Duration::from_secs(5));
    let response = send(app, get("/foo.git/info/refs?service=git-archive")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bare_subcommand_names_are_not_services() {
    let (root, _repo) = repo_root();
    let pid_file = root.path().join("backend.pid");
    let script = pid_and_block(&pid_file);

    let app = router(root.path(), stub_relay(&script), Duration::from_secs(5));
    let response = send(app, get("/foo.git/info/refs?service=upload-pack")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let app = router(root.path(), stub_relay(&script), Duration::from_secs(5));
    let response = send(app, post("/foo.git/upload-pack", "0000")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = router(root.path(), stub_relay(&script), Duration::from_secs(5));
    let response = send(app, post("/foo.git/receive-pack", "0000")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert!(!pid_file.exists(), "a backend was started");
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let (root, _repo) = repo_root();

    let app = router(root.path(), stub_relay("true"), Duration::from_secs(5));
    let response = send(app, get("/missing.git/info/refs?service=git-upload-pack")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = router(root.path(), stub_relay("true"), Duration::from_secs(5));
    let response = send(app, post("/../foo.git/git-upload-pack", "")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = router(root.path(), stub_relay("true"), Duration::from_secs(5));
    let response = send(app, post("/foo.git/git-archive", "")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn exchange_relays_request_body() {
    let (root, _repo) = repo_root();
    let app = router(root.path(), stub_relay("cat"), Duration::from_secs(5));

    let response = send(app, post("/foo.git/git-upload-pack", "0032want 1234\n0009done\n")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-git-upload-pack-result"
    );
    assert_uncached(&response);
    assert_eq!(body_bytes(response).await, b"0032want 1234\n0009done\n");
}

#[tokio::test]
async fn backend_failure_before_output_is_a_server_error() {
    let (root, _repo) = repo_root();
    let app = router(
        root.path(),
        stub_relay("cat >/dev/null; echo 'fatal: bad object' >&2; exit 1"),
        Duration::from_secs(5),
    );

    let response = send(app, post("/foo.git/git-receive-pack", "0000")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(!body.contains("bad object"));
    assert!(body.contains("pack backend failed"));
}

#[tokio::test]
async fn missing_backend_is_a_server_error() {
    let (root, _repo) = repo_root();
    let app = router(
        root.path(),
        PackRelay::new("/nonexistent/git", 1024),
        Duration::from_secs(5),
    );

    let response = send(app, post("/foo.git/git-upload-pack", "0000")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("pack backend unavailable"));
}

#[tokio::test]
async fn exchange_timeout_kills_backend() {
    let (root, _repo) = repo_root();
    let pid_file = root.path().join("backend.pid");
    let app = router(
        root.path(),
        stub_relay(&pid_and_block(&pid_file)),
        Duration::from_millis(500),
    );

    let response = send(app, post("/foo.git/git-upload-pack", "0000")).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let pid = wait_for_pid(&pid_file).await;
    assert_process_gone(pid).await;
}

#[tokio::test]
async fn timeout_after_output_aborts_the_body() {
    let (root, _repo) = repo_root();
    let pid_file = root.path().join("backend.pid");
    let script = format!("printf 'started'; {}", pid_and_block(&pid_file));
    let app = router(root.path(), stub_relay(&script), Duration::from_millis(500));

    let response = send(app, post("/foo.git/git-upload-pack", "0000")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
    assert!(body.is_err());

    let pid = wait_for_pid(&pid_file).await;
    assert_process_gone(pid).await;
}

#[tokio::test]
async fn state_from_config_uses_configured_backend() {
    let (root, _repo) = repo_root();
    let config = Config {
        repo_root: root.path().to_path_buf(),
        git_program: "sh".into(),
        git_args: vec!["-c".into(), "printf 'CFG'".into(), "git-stub".into()],
        ..Config::default()
    };
    let app = create_router(HttpState::from_config(&config));

    let response = send(app, get("/foo.git/info/refs?service=git-receive-pack")).await;

    let mut expected = encode_advertisement("git-receive-pack").to_vec();
    expected.extend_from_slice(b"CFG");
    assert_eq!(body_bytes(response).await, expected);
}

#[tokio::test]
async fn health_reports_version() {
    let (root, _repo) = repo_root();
    let app = router(root.path(), stub_relay("true"), Duration::from_secs(5));

    let response = send(app, get("/health")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "ok");
}
