use std::fs;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use file_share::engine::FileEngine;
use file_share::handlers::{router, AppState, ADMIN_PASSWORD_HEADER};
use file_share::notify::{ChannelBroadcaster, FILE_UPDATED_EVENT};
use file_share::sandbox::Sandbox;
use file_share::shared_text::SharedTextStore;
use file_share::undo::UndoLog;

const PASSWORD: &str = "letmein";

struct TestServer {
    root: TempDir,
    _scratch: TempDir,
    broadcaster: ChannelBroadcaster,
    app: Router,
}

fn server() -> TestServer {
    let root = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let sandbox = Sandbox::new(root.path()).unwrap();
    let engine = FileEngine::new(sandbox, Arc::new(UndoLog::new()), scratch.path()).unwrap();
    let broadcaster = ChannelBroadcaster::default();
    let shared_text = SharedTextStore::load(scratch.path().join("config.json"));

    let state = AppState {
        engine: Arc::new(engine),
        broadcaster: broadcaster.clone(),
        shared_text: Arc::new(shared_text),
        admin_password: Arc::from(PASSWORD),
    };
    TestServer {
        root,
        _scratch: scratch,
        broadcaster,
        app: router(state, 1024 * 1024),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value, admin: bool) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if admin {
        builder = builder.header(ADMIN_PASSWORD_HEADER, PASSWORD);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_responds() {
    let srv = server();
    let response = srv.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_returns_entries_and_breadcrumbs() {
    let srv = server();
    fs::create_dir_all(srv.root.path().join("docs/sub")).unwrap();
    fs::write(srv.root.path().join("docs/report.txt"), "hello").unwrap();
    fs::write(srv.root.path().join("docs/.hidden"), "x").unwrap();

    let (status, body) = send(&srv.app, get("/api/list?path=docs&sort=name")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "docs");
    assert_eq!(body["breadcrumbs"], json!([{ "name": "docs", "path": "docs" }]));
    let names: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["sub", "report.txt"]);
    assert_eq!(body["entries"][1]["size_formatted"], "5.0 B");
    assert_eq!(body["can_undo"], false);
}

#[tokio::test]
async fn escaping_paths_are_rejected() {
    let srv = server();
    let (status, body) = send(&srv.app, get("/api/list?path=../..")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "PATH_REJECTED");

    let (status, _) = send(&srv.app, get("/api/download?path=missing.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mutations_without_password_are_forbidden() {
    let srv = server();
    let (status, body) = send(
        &srv.app,
        post_json("/api/create_folder", json!({ "path": "", "name": "x" }), false),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert!(!srv.root.path().join("x").exists());
}

#[tokio::test]
async fn create_folder_broadcasts_and_can_be_undone() {
    let srv = server();
    let mut events = srv.broadcaster.subscribe();

    let (status, body) = send(
        &srv.app,
        post_json("/api/create_folder", json!({ "path": "", "name": "photos" }), true),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected_paths"], json!(["photos"]));
    assert!(srv.root.path().join("photos").is_dir());

    let event = events.recv().await.unwrap();
    assert_eq!(event.event, FILE_UPDATED_EVENT);
    assert_eq!(event.payload["path"], "");

    let (_, status_body) = send(&srv.app, get("/api/undo")).await;
    assert_eq!(status_body["available"], true);
    assert_eq!(status_body["pending"]["kind"], "create_folder");

    let undo = Request::post("/api/undo")
        .header(header::AUTHORIZATION, format!("Bearer {PASSWORD}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&srv.app, undo).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!srv.root.path().join("photos").exists());

    let (status, body) = send(
        &srv.app,
        Request::post("/api/undo")
            .header(ADMIN_PASSWORD_HEADER, PASSWORD)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NOTHING_TO_UNDO");
}

#[tokio::test]
async fn upload_writes_multipart_files() {
    let srv = server();
    fs::create_dir(srv.root.path().join("inbox")).unwrap();

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"path\"\r\n\r\n\
         inbox\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"note.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         first\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"note.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         second\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/api/upload")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .header(ADMIN_PASSWORD_HEADER, PASSWORD)
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&srv.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded"], json!(["note.txt", "note_1.txt"]));
    assert_eq!(fs::read_to_string(srv.root.path().join("inbox/note_1.txt")).unwrap(), "second");
}

#[tokio::test]
async fn download_streams_file_contents() {
    let srv = server();
    fs::write(srv.root.path().join("hello.txt"), "hello world").unwrap();

    let response = srv.app.clone().oneshot(get("/api/download?path=hello.txt")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"hello.txt\""
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"hello world");
}

#[tokio::test]
async fn shared_text_round_trips() {
    let srv = server();
    let (_, body) = send(&srv.app, get("/api/shared_text")).await;
    assert_eq!(body["content"], "Welcome");

    let (status, _) = send(
        &srv.app,
        post_json("/api/shared_text", json!({ "content": "lunch at noon" }), false),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&srv.app, get("/api/shared_text")).await;
    assert_eq!(body["content"], "lunch at noon");
}
