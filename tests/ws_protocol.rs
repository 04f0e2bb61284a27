//! Real-time protocol integration tests
//!
//! The main server runs in-process against a stub agent that records
//! watch/unwatch calls, so subscription counting, fan-out and rollback are
//! all observable without touching the real filesystem watcher.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use promptstack_core::server::{self, AgentClient, ServerContext, SubscriptionBroker};
use promptstack_core::workspace::{WorkspaceConfig, WorkspaceStore};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Call log of the stub agent: one entry per /watch and /unwatch request.
#[derive(Clone, Default)]
struct StubAgent {
    calls: Arc<Mutex<Vec<String>>>,
    fail_watch: Arc<AtomicBool>,
}

impl StubAgent {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn watch_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("watch "))
            .count()
    }

    fn unwatch_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("unwatch "))
            .count()
    }
}

async fn spawn_stub_agent(stub: StubAgent) -> String {
    async fn watch(State(stub): State<StubAgent>, Json(body): Json<Value>) -> StatusCode {
        let path = body["path"].as_str().unwrap_or("").to_string();
        stub.calls.lock().unwrap().push(format!("watch {}", path));
        if stub.fail_watch.load(Ordering::SeqCst) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::ACCEPTED
        }
    }

    async fn unwatch(State(stub): State<StubAgent>, Json(body): Json<Value>) -> StatusCode {
        let path = body["path"].as_str().unwrap_or("").to_string();
        stub.calls.lock().unwrap().push(format!("unwatch {}", path));
        StatusCode::OK
    }

    let app = Router::new()
        .route("/watch", post(watch))
        .route("/unwatch", post(unwatch))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Spin up a full main server wired to the stub agent. Returns the server
/// base URL.
async fn spawn_server(stub: StubAgent) -> String {
    let agent_url = spawn_stub_agent(stub).await;

    let mut workspaces = HashMap::new();
    workspaces.insert(
        "ws1".to_string(),
        WorkspaceConfig {
            root_path: PathBuf::from("/projects/one"),
            ignore_patterns: vec!["dist".to_string()],
        },
    );
    workspaces.insert(
        "ws2".to_string(),
        WorkspaceConfig {
            root_path: PathBuf::from("/projects/two"),
            ignore_patterns: vec![],
        },
    );
    let store = Arc::new(WorkspaceStore::new(
        vec!["node_modules".to_string()],
        workspaces,
    ));

    let agent = AgentClient::new(&agent_url, Duration::from_secs(2));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let broker = Arc::new(SubscriptionBroker::new(
        store.clone(),
        agent.clone(),
        base_url.clone(),
    ));
    let app = server::router(ServerContext {
        broker,
        agent,
        store,
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    base_url
}

async fn connect(base_url: &str) -> WsClient {
    let ws_url = format!("{}/ws", base_url.replace("http://", "ws://"));
    let (client, _) = connect_async(&ws_url).await.unwrap();
    client
}

async fn send(client: &mut WsClient, msg: Value) {
    client
        .send(Message::Text(msg.to_string()))
        .await
        .unwrap();
}

/// Receive the next JSON frame, failing the test on timeout.
async fn recv(client: &mut WsClient) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Assert no text frame arrives within `window`.
async fn assert_silent(client: &mut WsClient, window: Duration) {
    let result = timeout(window, client.next()).await;
    if let Ok(Some(Ok(Message::Text(text)))) = result {
        panic!("Expected silence, got frame: {}", text);
    }
}

async fn watch_workspace(client: &mut WsClient, workspace_id: &str) -> Value {
    send(
        client,
        json!({ "type": "watch-workspace", "workspaceId": workspace_id }),
    )
    .await;
    recv(client).await
}

async fn notify(base_url: &str, workspace_id: &str, kind: &str, path: &str) {
    let status = reqwest::Client::new()
        .post(format!(
            "{}/internal/workspaces/{}/notify-change",
            base_url, workspace_id
        ))
        .json(&json!({ "type": kind, "path": path }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_ping_pong() {
    let server = spawn_server(StubAgent::default()).await;
    let mut client = connect(&server).await;

    send(&mut client, json!({ "type": "ping" })).await;
    assert_eq!(recv(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn test_unknown_workspace_is_an_error() {
    let stub = StubAgent::default();
    let server = spawn_server(stub.clone()).await;
    let mut client = connect(&server).await;

    let reply = watch_workspace(&mut client, "nope").await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().contains("nope"));
    // No agent traffic for a rejected watch.
    assert_eq!(stub.watch_calls(), 0);
}

#[tokio::test]
async fn test_subscription_counting() {
    let stub = StubAgent::default();
    let server = spawn_server(stub.clone()).await;

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    let mut c = connect(&server).await;

    // Three subscribers, one agent watch (0→1 transition only).
    assert_eq!(watch_workspace(&mut a, "ws1").await["type"], "watch-started");
    assert_eq!(watch_workspace(&mut b, "ws1").await["type"], "watch-started");
    assert_eq!(watch_workspace(&mut c, "ws1").await["type"], "watch-started");
    assert_eq!(stub.watch_calls(), 1);

    // One explicit stop, one disconnect: still one subscriber, watch alive.
    send(&mut b, json!({ "type": "stop-watch" })).await;
    assert_eq!(recv(&mut b).await["type"], "watch-stopped");
    drop(c);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stub.unwatch_calls(), 0);

    // Last one out stops the watch exactly once.
    send(&mut a, json!({ "type": "stop-watch" })).await;
    assert_eq!(recv(&mut a).await["type"], "watch-stopped");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stub.unwatch_calls(), 1);
    assert_eq!(stub.watch_calls(), 1);
}

#[tokio::test]
async fn test_fanout_reaches_only_same_workspace() {
    let server = spawn_server(StubAgent::default()).await;

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    let mut c = connect(&server).await;
    watch_workspace(&mut a, "ws1").await;
    watch_workspace(&mut b, "ws1").await;
    watch_workspace(&mut c, "ws2").await;

    notify(&server, "ws1", "add", "x.txt").await;

    for client in [&mut a, &mut b] {
        let event = recv(client).await;
        assert_eq!(event["type"], "filesystem:change");
        assert_eq!(event["workspaceId"], "ws1");
        assert_eq!(event["change"]["type"], "add");
        assert_eq!(event["change"]["path"], "x.txt");
    }
    // C is subscribed to ws2 and must not see it.
    assert_silent(&mut c, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_switch_workspace_never_double_subscribed() {
    let stub = StubAgent::default();
    let server = spawn_server(stub.clone()).await;
    let mut client = connect(&server).await;

    watch_workspace(&mut client, "ws1").await;
    let reply = watch_workspace(&mut client, "ws2").await;
    assert_eq!(reply["type"], "watch-started");
    assert_eq!(reply["workspaceId"], "ws2");

    tokio::time::sleep(Duration::from_millis(200)).await;
    // ws1 released (its count hit zero), ws2 acquired.
    assert_eq!(
        stub.calls(),
        vec![
            "watch /projects/one".to_string(),
            "unwatch /projects/one".to_string(),
            "watch /projects/two".to_string(),
        ]
    );

    // Events for the old workspace no longer reach the connection.
    notify(&server, "ws1", "add", "stale.txt").await;
    notify(&server, "ws2", "unlink", "gone.txt").await;
    let event = recv(&mut client).await;
    assert_eq!(event["workspaceId"], "ws2");
    assert_eq!(event["change"]["type"], "unlink");
}

#[tokio::test]
async fn test_watch_failure_rolls_back_subscription() {
    let stub = StubAgent::default();
    stub.fail_watch.store(true, Ordering::SeqCst);
    let server = spawn_server(stub.clone()).await;
    let mut client = connect(&server).await;

    let reply = watch_workspace(&mut client, "ws1").await;
    assert_eq!(reply["type"], "error");

    // The subscription did not stick: no fan-out, and no unwatch call
    // (count never reached 1).
    notify(&server, "ws1", "add", "x.txt").await;
    assert_silent(&mut client, Duration::from_millis(500)).await;
    assert_eq!(stub.unwatch_calls(), 0);

    // Once the agent recovers the same connection can subscribe cleanly.
    stub.fail_watch.store(false, Ordering::SeqCst);
    let reply = watch_workspace(&mut client, "ws1").await;
    assert_eq!(reply["type"], "watch-started");
}

#[tokio::test]
async fn test_notify_validation() {
    let server = spawn_server(StubAgent::default()).await;

    // Malformed change kind → 400
    let status = reqwest::Client::new()
        .post(format!("{}/internal/workspaces/ws1/notify-change", server))
        .json(&json!({ "type": "sideways", "path": "x" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown workspace id is accepted and dropped (watch may have just
    // stopped while a notification was in flight).
    let status = reqwest::Client::new()
        .post(format!("{}/internal/workspaces/ghost/notify-change", server))
        .json(&json!({ "type": "add", "path": "x" }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::NO_CONTENT);
}
