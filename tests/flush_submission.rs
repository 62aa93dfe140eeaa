//! Integration tests for flushing through the real trap submitter
//!
//! A wiremock server stands in for both the trap endpoint and, in the managed
//! tests, the resource API.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use trapmetrics::check::BrokerProbe;
use trapmetrics::submit::TrapSubmitter;
use trapmetrics::{ClientError, Config, FlushOutcome, MetricsClient};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

struct Reachable;

#[async_trait]
impl BrokerProbe for Reachable {
    async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }
}

async fn trap_accepting(server: &MockServer, stats: u64) {
    Mock::given(method("PUT"))
        .and(path("/write/app"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "stats": stats })))
        .mount(server)
        .await;
}

async fn put_bodies(server: &MockServer, trap_path: &str) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path() == trap_path)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_flush_puts_trap_json() {
    let server = MockServer::start().await;
    trap_accepting(&server, 4).await;

    let client = MetricsClient::for_submission_url(format!("{}/write/app", server.uri())).unwrap();
    client.add_counter("requests", 41);
    client.increment("requests");
    client.set_gauge("temperature", 21.5);
    client.record_histogram("latency", 12.0);
    client.record_histogram("latency", 12.0);
    client.set_text("version", "1.4.2");

    let outcome = client.flush().await;
    assert!(
        matches!(outcome, FlushOutcome::Submitted { stats: 4, new_metrics: 4 }),
        "got {:?}",
        outcome
    );
    assert_eq!(client.stats().stats_accepted(), 4);

    let bodies = put_bodies(&server, "/write/app").await;
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["requests"]["_type"], "L");
    assert_eq!(body["requests"]["_value"], 42);
    assert!(body["requests"]["_ts"].is_u64());
    assert_eq!(body["temperature"]["_type"], "n");
    assert_eq!(body["temperature"]["_value"], 21.5);
    assert_eq!(body["latency"]["_type"], "h");
    assert_eq!(body["latency"]["_value"], serde_json::json!(["H[1.2e+01]=2"]));
    assert!(body["latency"].get("_ts").is_none());
    assert_eq!(body["version"]["_type"], "s");
    assert_eq!(body["version"]["_value"], "1.4.2");
}

#[tokio::test]
async fn test_empty_store_sends_nothing() {
    let server = MockServer::start().await;
    trap_accepting(&server, 0).await;

    let client = MetricsClient::for_submission_url(format!("{}/write/app", server.uri())).unwrap();
    assert!(matches!(client.flush().await, FlushOutcome::Empty));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_counters_reset_between_flushes() {
    let server = MockServer::start().await;
    trap_accepting(&server, 1).await;

    let client = MetricsClient::for_submission_url(format!("{}/write/app", server.uri())).unwrap();
    client.add_counter("requests", 5);
    client.flush().await;
    client.add_counter("requests", 2);
    client.flush().await;

    let bodies = put_bodies(&server, "/write/app").await;
    assert_eq!(bodies[0]["requests"]["_value"], 5);
    assert_eq!(bodies[1]["requests"]["_value"], 2);
}

#[tokio::test]
async fn test_trap_error_is_failed_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/write/app"))
        .respond_with(ResponseTemplate::new(500).set_body_string("trap unavailable"))
        .mount(&server)
        .await;

    let client = MetricsClient::for_submission_url(format!("{}/write/app", server.uri())).unwrap();
    client.increment("requests");

    match client.flush().await {
        FlushOutcome::Failed(ClientError::Submit { reason, .. }) => {
            assert!(reason.contains("500"), "reason: {}", reason);
        }
        other => panic!("expected submit failure, got {:?}", other),
    }
    assert_eq!(client.stats().submit_failures(), 1);
}

#[tokio::test]
async fn test_unexpected_trap_body_is_failed_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/write/app"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let client = MetricsClient::for_submission_url(format!("{}/write/app", server.uri())).unwrap();
    client.increment("requests");
    assert!(matches!(
        client.flush().await,
        FlushOutcome::Failed(ClientError::Submit { .. })
    ));
}

#[tokio::test]
async fn test_no_reset_flush_leaves_values_for_next_flush() {
    let server = MockServer::start().await;
    trap_accepting(&server, 1).await;

    let client = MetricsClient::for_submission_url(format!("{}/write/app", server.uri())).unwrap();
    client.add_counter("requests", 3);

    let peek = client.flush_metrics_no_reset().unwrap();
    assert!(peek.contains_key("requests"));
    assert!(server.received_requests().await.unwrap().is_empty());

    client.flush().await;
    let bodies = put_bodies(&server, "/write/app").await;
    assert_eq!(bodies[0]["requests"]["_value"], 3);
}

/// Managed check whose bundle update fails once, then succeeds
#[tokio::test]
async fn test_registration_failure_retries_on_next_flush() {
    let server = MockServer::start().await;
    let trap_path = "/module/httptrap/1b9e5a14-7a2b-4d1a-9c66-9b8a7b1c2d3e/s3cret";
    let submission_url = format!("{}{}", server.uri(), trap_path);

    let bundle = serde_json::json!({
        "_cid": "/check_bundle/77",
        "brokers": ["/broker/1"],
        "config": {"submission_url": submission_url},
        "metrics": [{"name": "known", "type": "numeric", "status": "active"}],
        "status": "active",
        "type": "httptrap"
    });
    let mut registered = bundle.clone();
    registered["metrics"] = serde_json::json!([
        {"name": "known", "type": "numeric", "status": "active"},
        {"name": "fresh", "type": "numeric", "status": "active"}
    ]);

    Mock::given(method("GET"))
        .and(path("/check/1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "_cid": "/check/1234",
            "_check_bundle": "/check_bundle/77"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/check_bundle/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broker/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "_cid": "/broker/1",
            "_details": [{"cn": "broker1", "ip": "127.0.0.1", "status": "active", "modules": ["httptrap"]}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/check_bundle/77"))
        .respond_with(ResponseTemplate::new(500).set_body_string("try later"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/check_bundle/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(registered))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(trap_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"stats": 1})))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.api.token = Some("test-token".to_string());
    config.api.url = server.uri();
    config.check.id = Some(1234);
    let client = Arc::new(
        MetricsClient::with_components(
            config.clone(),
            Some(Arc::new(trapmetrics::api::ApiClient::new(&config.api).unwrap())),
            Arc::new(Reachable),
            Arc::new(TrapSubmitter::new(Duration::from_secs(5))),
        )
        .unwrap(),
    );

    client.increment("known");
    client.increment("fresh");
    let first = client.flush().await;
    assert!(
        matches!(first, FlushOutcome::Submitted { new_metrics: 0, .. }),
        "got {:?}",
        first
    );
    assert_eq!(client.stats().registration_failures(), 1);
    assert!(!client.is_metric_active("fresh"));

    client.increment("fresh");
    let second = client.flush().await;
    assert!(
        matches!(second, FlushOutcome::Submitted { new_metrics: 1, .. }),
        "got {:?}",
        second
    );
    assert!(client.is_metric_active("fresh"));

    let bodies = put_bodies(&server, trap_path).await;
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0].get("known").is_some());
    assert!(bodies[0].get("fresh").is_none());
    assert!(bodies[1].get("fresh").is_some());
}
