//! End-to-end tests for the request pipeline.
//!
//! The chain is driven directly through `Pipeline::handle` with hand-built
//! contexts; the configured backends point at loopback ports nothing listens
//! on, so proxied requests terminate with fast connection-refused outcomes
//! that exercise the breaker bookkeeping without real upstreams.

use std::sync::Arc;

use actix_web::http::header::HeaderMap;
use actix_web::http::{Method, StatusCode};
use actix_web::web::Bytes;
use futures::future::LocalBoxFuture;

use portcullis_rs::middleware::chain::{Next, Pipeline, Stage, StageResult};
use portcullis_rs::middleware::context::RequestContext;
use portcullis_rs::middleware::cors::CorsStage;
use portcullis_rs::models::error::GatewayError;
use portcullis_rs::models::settings::{BackendConfig, CorsSettings, Settings};
use portcullis_rs::services::gateway::Gateway;
use portcullis_rs::utils::clock::ManualClock;

/// Settings with three weighted backends on unreachable loopback ports.
fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.backends = vec![
        BackendConfig {
            name: "a".to_string(),
            host: "127.0.0.1".to_string(),
            port: 59301,
            weight: 3,
        },
        BackendConfig {
            name: "b".to_string(),
            host: "127.0.0.1".to_string(),
            port: 59302,
            weight: 2,
        },
        BackendConfig {
            name: "c".to_string(),
            host: "127.0.0.1".to_string(),
            port: 59303,
            weight: 1,
        },
    ];
    // Keep breakers quiet unless a test wants them to trip.
    settings.circuit_breaker.failure_threshold = 100;
    settings
}

fn build(settings: Settings) -> (Arc<Gateway>, Pipeline, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let gateway = Gateway::with_clock(settings, clock.clone());
    let pipeline = Pipeline::standard(gateway.clone());
    (gateway, pipeline, clock)
}

fn get(path: &str, key: &str) -> RequestContext {
    RequestContext::get(path, key)
}

#[tokio::test]
async fn standard_pipeline_has_the_canonical_stage_order() {
    let (_gateway, pipeline, _clock) = build(test_settings());
    assert_eq!(
        pipeline.stage_names(),
        vec!["logger", "cors", "rate-limit", "select", "proxy"]
    );
}

#[tokio::test]
async fn preflight_terminates_with_204_and_cors_headers() {
    let (gateway, pipeline, _clock) = build(test_settings());

    let mut ctx = RequestContext::new(
        Method::OPTIONS,
        "/anything",
        "",
        HeaderMap::new(),
        Bytes::new(),
        "10.0.0.1",
    );
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    assert!(response.header("access-control-max-age").is_some());
    // Preflight never consults the limiter or the balancer.
    assert_eq!(gateway.metrics().snapshot().proxied, 0);
}

#[tokio::test]
async fn unreachable_upstreams_map_to_502_with_diagnostic_headers() {
    let (gateway, pipeline, _clock) = build(test_settings());

    let mut ctx = get("/users", "10.0.0.1");
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.header("x-backend"), Some("a"));
    assert_eq!(response.header("x-backend-port"), Some("59301"));
    assert_eq!(response.header("x-lb-algorithm"), Some("round-robin"));
    assert!(response.header("x-gateway").unwrap().starts_with("portcullis-rs/"));
    assert!(response.header("x-response-time").unwrap().ends_with("ms"));
    // CORS and rate headers land on upstream failures too.
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    assert_eq!(response.header("x-ratelimit-algorithm"), Some("fixed-window"));

    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.proxied, 1);
    assert_eq!(snapshot.errors, 1);
    assert_eq!(snapshot.by_backend["a"], 1);
}

#[tokio::test]
async fn round_robin_rotates_across_requests() {
    let (_gateway, pipeline, _clock) = build(test_settings());

    let mut order = Vec::new();
    for _ in 0..6 {
        let mut ctx = get("/rotate", "10.0.0.1");
        let response = pipeline.handle(&mut ctx).await;
        order.push(response.header("x-backend").unwrap().to_string());
    }

    assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
}

#[tokio::test]
async fn weighted_round_robin_follows_the_weights() {
    let (gateway, pipeline, _clock) = build(test_settings());
    gateway.set_load_balancer("weighted-round-robin").unwrap();

    let mut order = Vec::new();
    for _ in 0..6 {
        let mut ctx = get("/weighted", "10.0.0.1");
        let response = pipeline.handle(&mut ctx).await;
        order.push(response.header("x-backend").unwrap().to_string());
    }

    assert_eq!(order, vec!["a", "a", "a", "b", "b", "c"]);
}

#[tokio::test]
async fn rate_limit_denial_short_circuits_with_429() {
    let mut settings = test_settings();
    settings.rate_limit.max_requests = 2;
    let (gateway, pipeline, _clock) = build(settings);

    for _ in 0..2 {
        let mut ctx = get("/limited", "10.9.9.9");
        let response = pipeline.handle(&mut ctx).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    }

    let mut ctx = get("/limited", "10.9.9.9");
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header("x-ratelimit-limit"), Some("2"));
    assert_eq!(response.header("x-ratelimit-remaining"), Some("0"));
    assert_eq!(response.header("x-ratelimit-algorithm"), Some("fixed-window"));
    assert!(response.header("retry-after").is_some());
    // Denials carry CORS headers but never reach the proxy.
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    assert!(response.header("x-backend").is_none());

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["algorithm"], "fixed-window");

    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.rate_limited, 1);
    assert_eq!(snapshot.proxied, 2);
}

#[tokio::test]
async fn rate_limit_partitions_by_client_key() {
    let mut settings = test_settings();
    settings.rate_limit.max_requests = 1;
    let (_gateway, pipeline, _clock) = build(settings);

    let mut first = get("/p", "10.0.0.1");
    assert_eq!(pipeline.handle(&mut first).await.status, StatusCode::BAD_GATEWAY);

    let mut denied = get("/p", "10.0.0.1");
    assert_eq!(
        pipeline.handle(&mut denied).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    // A different client still has budget.
    let mut other = get("/p", "10.0.0.2");
    assert_eq!(pipeline.handle(&mut other).await.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn all_unhealthy_backends_yield_503_with_circuit_states() {
    let (gateway, pipeline, _clock) = build(test_settings());
    for name in ["a", "b", "c"] {
        gateway.toggle_backend(name).unwrap();
    }

    let mut ctx = get("/nobody-home", "10.0.0.1");
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["circuits"]["a"], "closed");
    assert_eq!(body["circuits"]["b"], "closed");
    assert_eq!(body["circuits"]["c"], "closed");
    assert_eq!(gateway.metrics().snapshot().circuit_broken, 1);
}

#[tokio::test]
async fn open_breaker_fails_fast_and_probes_after_the_timeout() {
    let mut settings = test_settings();
    settings.backends.truncate(1);
    settings.circuit_breaker.failure_threshold = 1;
    let (gateway, pipeline, clock) = build(settings);

    // First request reaches the dead upstream; the failure opens the circuit.
    let mut first = get("/solo", "10.0.0.1");
    let first_response = pipeline.handle(&mut first).await;
    assert_eq!(first_response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(first_response.header("x-circuit-state"), Some("open"));

    // While open, selection finds no admissible backend.
    let mut second = get("/solo", "10.0.0.1");
    let second_response = pipeline.handle(&mut second).await;
    assert_eq!(second_response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_slice(&second_response.body).unwrap();
    assert_eq!(body["circuits"]["a"], "open");

    // After the reset timeout the probe is admitted and fails again.
    clock.advance(15_000);
    let mut third = get("/solo", "10.0.0.1");
    let third_response = pipeline.handle(&mut third).await;
    assert_eq!(third_response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(third_response.header("x-circuit-state"), Some("open"));

    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.proxied, 2);
    assert_eq!(snapshot.circuit_broken, 1);
}

#[tokio::test]
async fn deterministic_balancer_skips_refused_backends() {
    let mut settings = test_settings();
    settings.circuit_breaker.failure_threshold = 1;
    let (gateway, pipeline, _clock) = build(settings);
    gateway.set_load_balancer("ip-hash").unwrap();

    // Every upstream is dead, so each request trips the breaker of the
    // backend that served it. IP-hash would return the same backend forever;
    // the refused set forces it onto a different one each time until the
    // whole pool is open.
    let mut served = Vec::new();
    for _ in 0..3 {
        let mut ctx = get("/sticky", "10.77.0.1");
        let response = pipeline.handle(&mut ctx).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        served.push(response.header("x-backend").unwrap().to_string());
    }

    served.sort();
    served.dedup();
    assert_eq!(served.len(), 3, "each request must reach a fresh backend");

    let mut exhausted = get("/sticky", "10.77.0.1");
    let response = pipeline.handle(&mut exhausted).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

struct FailingStage;

impl Stage for FailingStage {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult> {
        Box::pin(async { Err(GatewayError::Internal("synthetic stage failure".to_string())) })
    }
}

#[tokio::test]
async fn stage_errors_become_500_naming_the_stage() {
    let pipeline = Pipeline::new(vec![
        Arc::new(CorsStage::new(&CorsSettings::default())),
        Arc::new(FailingStage),
    ]);

    let mut ctx = get("/boom", "10.0.0.1");
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    // The CORS stage converts the inner error, so its headers still apply.
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["stage"], "failing");
    assert_eq!(body["type"], "internal");
}

#[tokio::test]
async fn swapping_the_active_limiter_changes_the_reported_algorithm() {
    let (gateway, pipeline, _clock) = build(test_settings());
    gateway.set_rate_limiter("token-bucket").unwrap();

    let mut ctx = get("/swap", "10.0.0.1");
    let response = pipeline.handle(&mut ctx).await;
    assert_eq!(response.header("x-ratelimit-algorithm"), Some("token-bucket"));

    assert!(gateway.set_rate_limiter("no-such-limiter").is_err());
    assert!(gateway.set_load_balancer("no-such-balancer").is_err());
}
