use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::ServiceExt;

use worldsync::server::build_router;
use worldsync::state::AppState;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn app(state: &Arc<AppState>) -> Router {
    build_router(state.clone(), Path::new("static"))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn request(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

/// Boot a server on an ephemeral port and return its address
async fn boot_server(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state, Path::new("static"));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/subscribe")
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn read_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn wait_for_clients(state: &AppState, count: usize) {
    timeout(TIMEOUT, async {
        while state.hub.client_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client count never reached");
}

async fn wait_for_entity(state: &AppState, id: &str, expected: Value) {
    timeout(TIMEOUT, async {
        loop {
            if Value::Object(state.world.get(id).await) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("entity never reached expected value");
}

// REST routes

#[tokio::test]
async fn test_get_unknown_entity_is_empty() {
    let state = Arc::new(AppState::new());
    let (status, body) = request(app(&state), "GET", "/entity/ghost", "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_post_and_put_merge_fields() {
    let state = Arc::new(AppState::new());

    let (status, body) = request(app(&state), "POST", "/entity/a", r#"{"x": 1, "y": 2}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"x": 1, "y": 2}));

    let (status, body) = request(app(&state), "PUT", "/entity/a", r#"{"y": 5, "z": "new"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"x": 1, "y": 5, "z": "new"}));

    let (_, body) = request(app(&state), "GET", "/entity/a", "").await;
    assert_eq!(body, json!({"x": 1, "y": 5, "z": "new"}));
}

#[tokio::test]
async fn test_post_with_json_content_type() {
    let state = Arc::new(AppState::new());
    let response = app(&state)
        .oneshot(
            Request::post("/entity/b")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"colour": "blue"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        state.world.get("b").await.get("colour"),
        Some(&json!("blue"))
    );
}

#[tokio::test]
async fn test_post_rejects_non_object_body() {
    let state = Arc::new(AppState::new());

    let (status, body) = request(app(&state), "POST", "/entity/a", "[1, 2]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], json!(400));
    assert!(body["error"].as_str().unwrap().contains("expected a JSON object"));

    let (status, _) = request(app(&state), "POST", "/entity/a", "{broken").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.world.is_empty().await);
}

#[tokio::test]
async fn test_world_returns_snapshot_for_get_and_post() {
    let state = Arc::new(AppState::new());
    request(app(&state), "POST", "/entity/a", r#"{"x": 1}"#).await;
    request(app(&state), "POST", "/entity/b", r#"{"y": 2}"#).await;

    for method in ["GET", "POST"] {
        let (status, body) = request(app(&state), method, "/world", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"a": {"x": 1}, "b": {"y": 2}}));
    }
}

#[tokio::test]
async fn test_clear_empties_world() {
    let state = Arc::new(AppState::new());
    request(app(&state), "POST", "/entity/a", r#"{"x": 1}"#).await;

    let (status, body) = request(app(&state), "POST", "/clear", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (_, body) = request(app(&state), "GET", "/entity/a", "").await;
    assert_eq!(body, json!({}));

    request(app(&state), "POST", "/entity/c", r#"{"x": 1}"#).await;
    let (_, body) = request(app(&state), "GET", "/clear", "").await;
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_http_updates_are_not_broadcast() {
    let state = Arc::new(AppState::new());
    let mut client = state.hub.register();

    request(app(&state), "POST", "/entity/a", r#"{"x": 1}"#).await;

    assert!(client.try_next_frame().is_none());
}

#[tokio::test]
async fn test_index_redirects_to_static_page() {
    let state = Arc::new(AppState::new());
    let response = app(&state)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/static/index.html"
    );
}

#[tokio::test]
async fn test_static_files_are_served() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>hello world</h1>").unwrap();

    let state = Arc::new(AppState::new());
    let response = build_router(state, dir.path())
        .oneshot(
            Request::get("/static/index.html")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"<h1>hello world</h1>");
}

// WebSocket end to end

#[tokio::test]
async fn test_update_reaches_every_client_including_sender() {
    let state = Arc::new(AppState::new());
    let url = boot_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    wait_for_clients(&state, 2).await;

    a.send(Message::text(r#"{"a": {"x": 1}}"#)).await.unwrap();

    assert_eq!(read_text(&mut a).await, r#"{"a": {"x": 1}}"#);
    assert_eq!(read_text(&mut b).await, r#"{"a": {"x": 1}}"#);
    wait_for_entity(&state, "a", json!({"x": 1})).await;
}

#[tokio::test]
async fn test_socket_updates_overwrite_entities() {
    let state = Arc::new(AppState::new());
    let url = boot_server(state.clone()).await;

    let mut a = connect(&url).await;
    wait_for_clients(&state, 1).await;

    a.send(Message::text(r#"{"a": {"x": 1}}"#)).await.unwrap();
    a.send(Message::text(r#"{"a": {"y": 2}}"#)).await.unwrap();
    assert_eq!(read_text(&mut a).await, r#"{"a": {"x": 1}}"#);
    assert_eq!(read_text(&mut a).await, r#"{"a": {"y": 2}}"#);

    wait_for_entity(&state, "a", json!({"y": 2})).await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let state = Arc::new(AppState::new());
    let url = boot_server(state.clone()).await;

    let mut a = connect(&url).await;
    wait_for_clients(&state, 1).await;

    a.send(Message::text("this is not json")).await.unwrap();
    a.send(Message::text(r#"{"b": {"ok": true}}"#)).await.unwrap();

    assert_eq!(read_text(&mut a).await, r#"{"b": {"ok": true}}"#);
    assert_eq!(state.hub.client_count(), 1);
}

#[tokio::test]
async fn test_abrupt_disconnect_leaves_other_clients_working() {
    let state = Arc::new(AppState::new());
    let url = boot_server(state.clone()).await;

    let a = connect(&url).await;
    let mut b = connect(&url).await;
    wait_for_clients(&state, 2).await;

    // Drop the socket without a close handshake
    drop(a);
    wait_for_clients(&state, 1).await;

    assert_eq!(state.hub.broadcast(r#"{"c": {"z": 3}}"#), 1);
    assert_eq!(read_text(&mut b).await, r#"{"c": {"z": 3}}"#);
}

#[tokio::test]
async fn test_graceful_close_unregisters_client() {
    let state = Arc::new(AppState::new());
    let url = boot_server(state.clone()).await;

    let mut a = connect(&url).await;
    wait_for_clients(&state, 1).await;

    a.close(None).await.unwrap();
    wait_for_clients(&state, 0).await;
}

#[tokio::test]
async fn test_socket_and_http_share_the_world() {
    let state = Arc::new(AppState::new());
    let url = boot_server(state.clone()).await;

    let mut a = connect(&url).await;
    wait_for_clients(&state, 1).await;
    a.send(Message::text(r#"{"shared": {"from": "socket"}}"#))
        .await
        .unwrap();
    read_text(&mut a).await;
    wait_for_entity(&state, "shared", json!({"from": "socket"})).await;

    let (_, body) = request(app(&state), "PUT", "/entity/shared", r#"{"also": "http"}"#).await;
    assert_eq!(body, json!({"from": "socket", "also": "http"}));
}
