//! End-to-end tests for the HTTP API
//!
//! Boots the real server on an ephemeral port and drives it over sockets:
//! scans through the validation engine, identifier resolution, and the SSE
//! event stream.

use faregate::domain::identifier::DialingPlan;
use faregate::domain::ticket::{TicketCode, TripId};
use faregate::infra::Metrics;
use faregate::io::http::{serve, ApiContext};
use faregate::services::{Broadcaster, MemoryTicketStore, ValidationEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

struct TestServer {
    addr: SocketAddr,
    bus: Arc<Broadcaster>,
    _shutdown_tx: watch::Sender<bool>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start_test_server(tickets: &[(&str, &str)]) -> TestServer {
    let metrics = Arc::new(Metrics::new());
    let bus = Broadcaster::new(16, metrics.clone());

    let store = Arc::new(MemoryTicketStore::new());
    for (code, trip) in tickets {
        store.register(TicketCode::from(*code), TripId::from(*trip));
    }

    let engine = Arc::new(ValidationEngine::new(store, bus.clone(), None, None, metrics));
    let ctx = Arc::new(ApiContext {
        engine,
        bus: bus.clone(),
        dialing_plan: DialingPlan::default(),
        egress: None,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve(listener, ctx, shutdown_rx));

    TestServer { addr, bus, _shutdown_tx: shutdown_tx }
}

async fn post_scan(server: &TestServer, code: &str, actor: &str) -> serde_json::Value {
    let client = reqwest::Client::new();
    let response = client
        .post(server.url("/api/scan"))
        .json(&serde_json::json!({ "code": code, "actor": actor }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_scan_accept_then_reject() {
    let server = start_test_server(&[("T-1001", "LINE-4-0800")]).await;

    let first = post_scan(&server, "T-1001", "scanner-7").await;
    assert_eq!(first["outcome"], "accepted");
    assert_eq!(first["ticket"]["state"], "used");
    assert_eq!(first["ticket"]["used_by"], "scanner-7");

    let second = post_scan(&server, "T-1001", "scanner-8").await;
    assert_eq!(second["outcome"], "rejected");
    assert_eq!(second["reason"], "already_used");
    // The original consumption is still reported
    assert_eq!(second["ticket"]["used_by"], "scanner-7");
}

#[tokio::test]
async fn test_scan_unknown_code() {
    let server = start_test_server(&[]).await;

    let result = post_scan(&server, "nope", "scanner-1").await;
    assert_eq!(result["outcome"], "rejected");
    assert_eq!(result["reason"], "not_found");
    assert!(result.get("ticket").is_none());
}

#[tokio::test]
async fn test_resolve_endpoint() {
    let server = start_test_server(&[]).await;
    let client = reqwest::Client::new();

    let phone: serde_json::Value = client
        .post(server.url("/api/resolve"))
        .json(&serde_json::json!({ "identifier": "71 23 45 67" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(phone["kind"], "phone");
    assert_eq!(phone["canonical"], "+22871234567");

    let email: serde_json::Value = client
        .post(server.url("/api/resolve"))
        .json(&serde_json::json!({ "identifier": "Rider@Example.com" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(email["kind"], "email");
    assert_eq!(email["canonical"], "rider@example.com");

    let hinted: serde_json::Value = client
        .post(server.url("/api/resolve"))
        .json(&serde_json::json!({ "identifier": "1234", "hint": "phone" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hinted["kind"], "phone");
}

#[tokio::test]
async fn test_healthz_and_unknown_route() {
    let server = start_test_server(&[]).await;
    let client = reqwest::Client::new();

    let health = client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let missing = client.get(server.url("/api/nothing")).send().await.unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_stream_requires_client_id() {
    let server = start_test_server(&[]).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/api/events")).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_event_stream_delivers_validation_frames() {
    let server = start_test_server(&[("T-2001", "LINE-9-1730")]).await;

    // Open the SSE stream over a raw socket so we can read incrementally
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let request = format!(
        "GET /api/events?client=it-dash HTTP/1.1\r\nHost: {}\r\nAccept: text/event-stream\r\n\r\n",
        server.addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // Wait for the subscription to land in the registry
    for _ in 0..100 {
        if server.bus.subscriber_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.bus.subscriber_count(), 1);

    // A scan elsewhere becomes a frame on this stream
    post_scan(&server, "T-2001", "scanner-3").await;

    let mut collected = String::new();
    let mut buf = [0u8; 4096];
    let deadline = Duration::from_secs(5);
    let received = timeout(deadline, async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                panic!("stream closed before a validation frame arrived");
            }
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
            if collected.contains("event: validation") && collected.contains("\n\n") {
                break collected.clone();
            }
        }
    })
    .await
    .unwrap();

    assert!(received.contains("HTTP/1.1 200"));
    assert!(received.contains("text/event-stream"));
    assert!(received.contains("id: 1"));
    assert!(received.contains("\"code\":\"T-2001\""));

    // Closing the socket unsubscribes the client
    drop(stream);
    for _ in 0..100 {
        if server.bus.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.bus.subscriber_count(), 0);
}
