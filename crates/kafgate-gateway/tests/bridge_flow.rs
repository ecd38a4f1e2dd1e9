//! End-to-end bridge flows over the in-memory broker.
//!
//! Drives the real router with a responder task standing in for the
//! downstream topic consumer.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use kafgate_connector::{Connector, MemoryBroker, ReplyConsumer as _};
use kafgate_core::config::BridgeConfig;
use kafgate_core::headers::{HTTP_HEADER_PREFIX, RESPONSE_CODE_HEADER};
use kafgate_core::message::Message;

const CONFIG: &str = r#"
kafka:
  kafkaUrl: "memory"
endpoints:
  - path: "/echo"
    method: "POST"
    dataType: "json"
    kafka:
      topic: "in"
      replyTopic: "out"
  - path: "/svc"
    method: "POST"
    dataType: "json"
    kafka:
      topic: "svcA"
"#;

struct Harness {
    broker: MemoryBroker,
    connector: Arc<Connector>,
    router: Router,
}

fn harness(ttl: Duration) -> Harness {
    let config = BridgeConfig::parse(CONFIG).unwrap();
    let broker = MemoryBroker::new();
    let connector = Arc::new(Connector::in_memory(&config.endpoints, &broker, ttl));
    let router = kafgate_gateway::build_router(&config.endpoints, Arc::clone(&connector)).unwrap();
    Harness {
        broker,
        connector,
        router,
    }
}

/// Responder: reads envelopes from `topic`, asserts the wire shape, and
/// replies `replies` times on `reply_topic` with `WORLD`, a 201 status
/// override, a text content type, and every envelope header echoed back.
fn spawn_responder(broker: &MemoryBroker, topic: &str, reply_topic: &str, replies: usize) {
    let mut requests = broker.subscribe(topic);
    let broker = broker.clone();
    let reply_topic = reply_topic.to_owned();
    tokio::spawn(async move {
        while let Ok(record) = requests.next().await {
            let envelope: Message = serde_json::from_slice(&record.payload).unwrap();
            assert_eq!(envelope.data_type, "json");
            assert_eq!(record.key, envelope.id);

            let mut headers = vec![
                (RESPONSE_CODE_HEADER.to_owned(), b"201".to_vec()),
                (
                    format!("{HTTP_HEADER_PREFIX}Content-Type"),
                    b"text/plain".to_vec(),
                ),
            ];
            for (name, value) in &envelope.headers {
                headers.push((name.clone(), value.clone().into_bytes()));
            }

            for _ in 0..replies {
                broker.publish(
                    &reply_topic,
                    envelope.id.as_bytes(),
                    b"WORLD",
                    headers.clone(),
                );
            }
        }
    });
}

fn post(path: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "round-trip")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn happy_path_round_trip() {
    let harness = harness(Duration::from_secs(5));
    spawn_responder(&harness.broker, "in", "out", 1);

    let response = harness.router.oneshot(post("/echo", "hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    // Request headers forwarded under the prefix reappear verbatim.
    assert_eq!(response.headers().get("x-custom").unwrap(), "round-trip");
    assert_eq!(body_bytes(response).await, b"WORLD");
    assert_eq!(harness.connector.pending_requests(), 0);
}

#[tokio::test]
async fn missing_reply_times_out_with_504() {
    let harness = harness(Duration::from_millis(100));
    // No responder: the reply never arrives.

    let response = harness.router.oneshot(post("/echo", "hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], 504);
    assert_eq!(body["message"], "timeout");
    assert!(body["error"].is_string());
    assert_eq!(harness.connector.pending_requests(), 0);
}

#[tokio::test]
async fn duplicate_reply_produces_exactly_one_response() {
    let harness = harness(Duration::from_secs(5));
    spawn_responder(&harness.broker, "in", "out", 2);

    let response = harness.router.oneshot(post("/echo", "hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_bytes(response).await, b"WORLD");

    // The second reply found no pending entry and was dropped.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.connector.pending_requests(), 0);
}

#[tokio::test]
async fn default_reply_topic_serves_the_request() {
    let harness = harness(Duration::from_secs(5));
    // `/svc` has no replyTopic; the connector listens on `svcA-reply`.
    spawn_responder(&harness.broker, "svcA", "svcA-reply", 1);

    let response = harness.router.oneshot(post("/svc", "ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_bytes(response).await, b"WORLD");
}

#[tokio::test]
async fn close_unblocks_in_flight_requests_with_502() {
    let harness = harness(Duration::from_secs(30));
    // No responder; the request would otherwise wait out the full TTL.

    let router = harness.router.clone();
    let in_flight =
        tokio::spawn(async move { router.oneshot(post("/echo", "hello")).await.unwrap() });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.connector.pending_requests(), 1);
    harness.connector.close().await.unwrap();

    let response = in_flight.await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], 502);
    assert_eq!(body["message"], "transport error");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let harness = harness(Duration::from_secs(5));
    let response = harness
        .router
        .oneshot(post("/nowhere", "hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let harness = harness(Duration::from_secs(5));
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = harness.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
