//! Integration tests for the browser routes, the watch endpoints and the sidecar.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use emberdoc_browser::{BrowserConfig, BrowserService, WatchConfig, WatchService, router, watch};
use emberdoc_core::registry::Database;
use emberdoc_macros::Model;
use emberdoc_memory::InMemoryStoreBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

#[derive(Debug, Clone, Serialize, Deserialize, Model)]
#[model(crate = "emberdoc_core")]
struct User {
    #[model(id)]
    id: Option<String>,
    name: String,
    age: u32,
}

fn user(id: &str, name: &str, age: u32) -> User {
    User {
        id: Some(id.to_string()),
        name: name.to_string(),
        age,
    }
}

async fn database(watcher: bool) -> Arc<Database> {
    let db = Database::builder(InMemoryStoreBuilder::new())
        .model::<User>()
        .enable_watcher(watcher)
        .build();
    db.enable().await.unwrap();

    db.typed::<User>()
        .unwrap()
        .save_many(vec![
            user("1", "John", 30),
            user("2", "Jane", 17),
            user("3", "Bob", 45),
        ])
        .await
        .unwrap();

    Arc::new(db)
}

fn app(db: &Arc<Database>) -> Router {
    router(db.clone(), BrowserConfig::default())
}

async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn upload(uri: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--XBOUNDARY\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"users.json\"\r\n\
         Content-Type: application/json\r\n\r\n\
         {content}\r\n\
         --XBOUNDARY--\r\n"
    );

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn lists_collection_names() {
    let db = database(false).await;

    let response = send(app(&db), get("/rest/collNames")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!(["User"]));
}

#[tokio::test]
async fn fetch_wraps_documents_under_the_identity_field() {
    let db = database(false).await;

    let response = send(app(&db), get("/rest/User")).await;
    let body = json_body(response).await;

    let documents = body["id"].as_array().unwrap();
    assert_eq!(documents.len(), 3);
    assert_eq!(documents[0]["name"], "John");
}

#[tokio::test]
async fn fetch_applies_filter_sort_and_pagination() {
    let db = database(false).await;

    let response = send(
        app(&db),
        get("/rest/User?filter=age%3E%3D18&sort=age:desc&limit=1"),
    )
    .await;
    let body = json_body(response).await;

    assert_eq!(body["id"], json!([{ "id": "3", "name": "Bob", "age": 45 }]));
}

#[tokio::test]
async fn malformed_filter_is_a_bad_request() {
    let db = database(false).await;

    let response = send(app(&db), get("/rest/User?filter=age%3E%3D")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Bad request");
    assert!(body["details"].as_str().unwrap().contains("Malformed filter"));
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let db = database(false).await;

    let response = send(app(&db), get("/rest/Ghost")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_before_enable_are_unavailable() {
    let db = Arc::new(
        Database::builder(InMemoryStoreBuilder::new())
            .model::<User>()
            .build(),
    );

    let response = send(app(&db), get("/rest/collNames")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn delete_by_id_answers_ok() {
    let db = database(false).await;

    let response = send(app(&db), delete("/rest/User/2")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
    assert_eq!(db.typed::<User>().unwrap().count().await.unwrap(), 2);
}

#[tokio::test]
async fn import_reports_rejected_records() {
    let db = database(false).await;
    let content = json!([
        { "id": "10", "name": "Ann", "age": 22 },
        { "name": "Cid", "age": 51 },
        { "id": "1", "name": "Johnny", "age": 31 },
        { "name": "Eve", "age": 40, "nickname": "e" },
    ])
    .to_string();

    let response = send(app(&db), upload("/rest/User", &content)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["imported"].as_array().unwrap().len(), 3);
    assert_eq!(report["failures"][0]["index"], 3);
    assert!(report["failures"][0]["reason"].as_str().unwrap().contains("nickname"));

    let users = db.typed::<User>().unwrap();
    assert_eq!(users.count().await.unwrap(), 5);
    assert_eq!(users.find_by_id("1").await.unwrap().unwrap().name, "Johnny");
}

#[tokio::test]
async fn upload_without_files_field_is_rejected() {
    let db = database(false).await;
    let request = Request::builder()
        .method("POST")
        .uri("/rest/User")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(Body::from("--XBOUNDARY--\r\n"))
        .unwrap();

    let response = send(app(&db), request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn drop_collection_returns_removed_count() {
    let db = database(false).await;

    let response = send(app(&db), delete("/api/drop-collection/User")).await;

    assert_eq!(json_body(response).await, json!(3));
    assert_eq!(db.typed::<User>().unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn export_writes_pretty_json_file() {
    let db = database(false).await;
    let dir = tempfile::tempdir().unwrap();
    let export_dir = dir.path().join("exports");
    let app = router(
        db.clone(),
        BrowserConfig::default().with_export_dir(&export_dir),
    );

    let response = send(app, get("/api/export-collection/User")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"User.json\""
    );

    let written = std::fs::read_to_string(export_dir.join("User.json")).unwrap();
    let exported: Value = serde_json::from_str(&written).unwrap();
    assert!(written.contains("\n  "));
    assert_eq!(exported.as_array().unwrap().len(), 3);
    assert_eq!(json_body(response).await, exported);
}

#[tokio::test]
async fn global_watch_requires_the_watcher() {
    let db = database(false).await;

    let response = send(watch::router(db.clone()), get("/watch-collections")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn watch_without_upgrade_is_a_client_error() {
    let db = database(true).await;

    let all = send(watch::router(db.clone()), get("/watch-collections")).await;
    let one = send(watch::router(db.clone()), get("/watch-collections/User")).await;
    let unknown = send(watch::router(db.clone()), get("/watch-collections/Ghost")).await;

    assert!(all.status().is_client_error());
    assert!(one.status().is_client_error());
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sidecar_serves_while_the_database_is_ready() {
    let service = Arc::new(BrowserService::new(
        BrowserConfig::default().with_addr("127.0.0.1:0".parse().unwrap()),
    ));
    let db = Database::builder(InMemoryStoreBuilder::new())
        .model::<User>()
        .sidecar(service.clone())
        .build();

    db.enable().await.unwrap();
    let addr = service.local_addr().unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /rest/collNames HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("[\"User\"]"));

    db.close().await.unwrap();
    assert!(service.local_addr().is_none());
}

#[tokio::test]
async fn disabled_browser_does_not_listen() {
    let service = Arc::new(BrowserService::new(
        BrowserConfig::default().with_addr("127.0.0.1:0".parse().unwrap()),
    ));
    let db = Database::builder(InMemoryStoreBuilder::new())
        .model::<User>()
        .sidecar(service.clone())
        .enable_browser(false)
        .build();

    db.enable().await.unwrap();

    assert!(service.local_addr().is_none());
}

async fn read_frame(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[0], 0x81, "expected a final text frame");

    let len = match header[1] & 0x7f {
        126 => {
            let mut extended = [0u8; 2];
            stream.read_exact(&mut extended).await.unwrap();
            u16::from_be_bytes(extended) as usize
        }
        127 => {
            let mut extended = [0u8; 8];
            stream.read_exact(&mut extended).await.unwrap();
            u64::from_be_bytes(extended) as usize
        }
        len => len as usize,
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

#[tokio::test]
async fn watch_service_pushes_changes_without_the_browser() {
    let browser = Arc::new(BrowserService::new(
        BrowserConfig::default().with_addr("127.0.0.1:0".parse().unwrap()),
    ));
    let watcher = Arc::new(WatchService::new(
        WatchConfig::default().with_addr("127.0.0.1:0".parse().unwrap()),
    ));
    let db = Database::builder(InMemoryStoreBuilder::new())
        .model::<User>()
        .sidecar(browser.clone())
        .sidecar(watcher.clone())
        .enable_browser(false)
        .enable_watcher(true)
        .build();

    db.enable().await.unwrap();
    assert!(browser.local_addr().is_none());
    let addr = watcher.local_addr().unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /watch-collections HTTP/1.1\r\n\
              Host: localhost\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    assert!(String::from_utf8_lossy(&head).starts_with("HTTP/1.1 101"));

    db.typed::<User>().unwrap().save(user("9", "Zoe", 28)).await.unwrap();

    let payload = tokio::time::timeout(std::time::Duration::from_secs(5), read_frame(&mut stream))
        .await
        .unwrap();
    let message: Value = serde_json::from_slice(&payload).unwrap();

    assert_eq!(message["model"], "User");
    assert_eq!(message["event"], "insert");
    assert_eq!(message["data"][0]["name"], "Zoe");

    db.close().await.unwrap();
    assert!(watcher.local_addr().is_none());
}

#[tokio::test]
async fn watch_service_stays_down_without_the_watcher() {
    let watcher = Arc::new(WatchService::new(
        WatchConfig::default().with_addr("127.0.0.1:0".parse().unwrap()),
    ));
    let db = Database::builder(InMemoryStoreBuilder::new())
        .model::<User>()
        .sidecar(watcher.clone())
        .build();

    db.enable().await.unwrap();

    assert!(watcher.local_addr().is_none());
}
