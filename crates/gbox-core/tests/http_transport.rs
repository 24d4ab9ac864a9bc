//! Integration tests for the HTTP transport.
//!
//! Each test starts a small axum service on `127.0.0.1:0` that mimics the
//! box API and talks to it through [`HttpTransport`].

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gbox_core::{
    BoxData, BoxId, BoxStatus, BoxTransport, ClientConfig, CopyFromOutput, CoreError, GBoxClient,
    HttpTransport, RemoteBox, RunOptions, EXIT_CODE_UNKNOWN,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "secret";

#[derive(Clone, Default)]
struct Service {
    archives: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

fn box_json(id: &str, status: &str, image: &str) -> Value {
    json!({ "id": id, "status": status, "image": image })
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("{what} not found") })),
    )
        .into_response()
}

async fn list_boxes(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Response {
    let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if auth != Some("Bearer secret") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "missing api key" })),
        )
            .into_response();
    }
    let boxes: Vec<Value> = [
        box_json("b1", "running", "python:3"),
        box_json("b2", "stopped", "node:20"),
    ]
    .into_iter()
    .filter(|b| q.get("image").map_or(true, |i| b["image"] == i.as_str()))
    .collect();
    Json(json!({ "boxes": boxes })).into_response()
}

async fn get_box(UrlPath(id): UrlPath<String>) -> Response {
    if id == "b1" {
        Json(box_json("b1", "running", "python:3")).into_response()
    } else {
        not_found(&format!("box {id}"))
    }
}

async fn start_box() -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({ "message": "box is already running" })),
    )
        .into_response()
}

async fn stop_box() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
}

async fn run_in_box(Json(body): Json<Value>) -> Json<Value> {
    let cmd: Vec<&str> = body["cmd"]
        .as_array()
        .map(|parts| parts.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    Json(json!({
        "box": box_json("b1", "running", "python:3"),
        "stdout": body["stdin"],
        "stderr": cmd.join(" "),
    }))
}

async fn put_archive(
    State(service): State<Service>,
    Query(q): Query<HashMap<String, String>>,
    body: Bytes,
) -> Json<Value> {
    let path = q.get("path").cloned().unwrap_or_default();
    let size = body.len();
    service.archives.lock().unwrap().insert(path, body.to_vec());
    Json(json!({ "message": "extracted", "size": size }))
}

async fn get_archive(
    State(service): State<Service>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let path = q.get("path").cloned().unwrap_or_default();
    match service.archives.lock().unwrap().get(&path) {
        Some(bytes) => bytes.clone().into_response(),
        None => not_found(&path),
    }
}

async fn head_archive() -> impl IntoResponse {
    (
        [("X-Gbox-Mode", "0644"), ("X-Gbox-Size", "5")],
        StatusCode::OK,
    )
}

async fn spawn_service() -> String {
    let app = Router::new()
        .route("/api/v1/boxes", get(list_boxes))
        .route("/api/v1/boxes/:id", get(get_box))
        .route("/api/v1/boxes/:id/start", post(start_box))
        .route("/api/v1/boxes/:id/stop", post(stop_box))
        .route("/api/v1/boxes/:id/run", post(run_in_box))
        .route(
            "/api/v1/boxes/:id/archive",
            get(get_archive).put(put_archive).head(head_archive),
        )
        .with_state(Service::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

async fn transport() -> Arc<HttpTransport> {
    let config = ClientConfig::builder()
        .base_url(spawn_service().await)
        .api_key(API_KEY)
        .build()
        .expect("valid config");
    Arc::new(HttpTransport::new(&config).expect("transport"))
}

#[tokio::test]
async fn test_list_boxes_filters_by_image() {
    let config = ClientConfig::builder()
        .base_url(spawn_service().await)
        .api_key(API_KEY)
        .build()
        .unwrap();
    let client = GBoxClient::new(&config).unwrap();

    let boxes = client
        .list_boxes(Some("python:3"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].id.as_str(), "b1");
    assert_eq!(boxes[0].status, BoxStatus::Running);
}

#[tokio::test]
async fn test_missing_api_key_maps_to_api_error() {
    let config = ClientConfig::builder()
        .base_url(spawn_service().await)
        .build()
        .unwrap();
    let transport = HttpTransport::new(&config).unwrap();

    let err = transport.list_boxes(None).await.unwrap_err();
    match err {
        CoreError::Api {
            status,
            message,
            body,
        } => {
            assert_eq!(status, 401);
            assert_eq!(message, "missing api key");
            let raw: Value = serde_json::from_str(&body).unwrap();
            assert_eq!(raw, json!({ "message": "missing api key" }));
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_status_mapping() {
    let transport = transport().await;

    let err = transport.get_details("nope").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(ref m) if m == "box nope not found"));

    let err = transport.start("b1").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(ref m) if m == "box is already running"));

    let err = transport.stop("b1").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Api { status: 500, ref message, ref body } if message == "boom" && body == "boom"
    ));
}

#[tokio::test]
async fn test_reload_of_vanished_box_marks_deleted() {
    let transport = transport().await;
    let data: BoxData =
        serde_json::from_value(json!({ "id": "gone", "status": "running", "image": "x" }))
            .unwrap();
    let mut remote = RemoteBox::from_data(transport, data);

    remote.reload(&CancellationToken::new()).await.unwrap();
    assert_eq!(remote.status(), BoxStatus::Deleted);
}

#[tokio::test]
async fn test_run_sends_stdin_and_defaults_exit_code() {
    let transport = transport().await;
    let client = GBoxClient::with_transport(transport);

    let result = client
        .run_in_box(
            &BoxId::new("b1"),
            &["python3".to_string(), "-u".to_string()],
            Some("print(1)"),
            Some(100),
            Some(100),
            RunOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.exit_code, EXIT_CODE_UNKNOWN);
    assert_eq!(result.stdout, "print(1)");
    assert_eq!(result.stderr, "python3 -u");
    assert_eq!(result.box_data.map(|b| b.id), Some(BoxId::new("b1")));
}

#[tokio::test]
async fn test_archive_round_trip_over_http() {
    let transport = transport().await;
    let token = CancellationToken::new();
    let remote = RemoteBox::get(transport, &BoxId::new("b1"), &token)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("hello.txt");
    std::fs::write(&source, "hello").unwrap();

    let response = remote.copy_to(&source, "/work", &token).await.unwrap();
    assert_eq!(response.message.as_deref(), Some("extracted"));

    // File target: first regular file wins.
    let file_dest = dir.path().join("out").join("copy.txt");
    let output = remote
        .copy_from("/work", Some(file_dest.as_path()), &token)
        .await
        .unwrap();
    assert!(matches!(output, CopyFromOutput::File { entry: Some(_), .. }));
    assert_eq!(std::fs::read_to_string(&file_dest).unwrap(), "hello");

    // Directory target: relative structure kept.
    let dir_dest = dir.path().join("tree").join("");
    let output = remote
        .copy_from("/work", Some(dir_dest.as_path()), &token)
        .await
        .unwrap();
    assert!(matches!(output, CopyFromOutput::Directory(_)));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("tree").join("hello.txt")).unwrap(),
        "hello"
    );

    let stat = remote.stat("/work/hello.txt", &token).await.unwrap();
    assert_eq!(stat.get("x-gbox-size").map(String::as_str), Some("5"));
}

#[tokio::test]
async fn test_copy_from_missing_remote_path() {
    let transport = transport().await;
    let remote = RemoteBox::get(transport, &BoxId::new("b1"), &CancellationToken::new())
        .await
        .unwrap();

    let err = remote
        .copy_from("/nowhere", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
