//! HTTP-level tests for the control surface.

use std::sync::Arc;

use actix_web::{test, web, App};

use portcullis_rs::middleware::chain::Pipeline;
use portcullis_rs::models::settings::Settings;
use portcullis_rs::routes::{health, management, metrics};
use portcullis_rs::services::gateway::Gateway;

fn gateway() -> (Arc<Gateway>, Arc<Pipeline>) {
    let gateway = Gateway::new(Settings::default());
    let pipeline = Arc::new(Pipeline::standard(gateway.clone()));
    (gateway, pipeline)
}

#[actix_web::test]
async fn gateway_health_reports_the_decision_state() {
    let (gateway, pipeline) = gateway();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(pipeline.clone()))
            .configure(management::configure_management),
    )
    .await;

    let req = test::TestRequest::get().uri("/gateway/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["active"]["rate_limiter"], "fixed-window");
    assert_eq!(body["active"]["load_balancer"], "round-robin");
    assert_eq!(
        body["pipeline"],
        serde_json::json!(["logger", "cors", "rate-limit", "select", "proxy"])
    );
    assert_eq!(body["backends"].as_array().unwrap().len(), 3);
    assert_eq!(body["backends"][0]["name"], "api-1");
    assert_eq!(body["backends"][0]["weight"], 3);
    assert_eq!(body["backends"][0]["healthy"], true);
    assert_eq!(body["backends"][0]["circuit_state"], "closed");
    assert_eq!(body["metrics"]["total_requests"], 0);
}

#[actix_web::test]
async fn swapping_algorithms_over_http() {
    let (gateway, pipeline) = gateway();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(pipeline.clone()))
            .configure(management::configure_management),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/gateway/rate-limiter/sliding-log")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(gateway.active_limiter().name(), "sliding-log");

    let req = test::TestRequest::post()
        .uri("/gateway/load-balancer/consistent-hash")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(gateway.active_balancer().name(), "consistent-hash");

    // Unknown names are a client error, not a silent no-op.
    let req = test::TestRequest::post()
        .uri("/gateway/rate-limiter/nope")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(gateway.active_limiter().name(), "sliding-log");
}

#[actix_web::test]
async fn toggling_a_backend_flips_the_flag() {
    let (gateway, pipeline) = gateway();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(pipeline.clone()))
            .configure(management::configure_management),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/gateway/backend/api-2/toggle")
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["healthy"], false);
    assert!(!gateway.backend("api-2").unwrap().is_healthy());

    let req = test::TestRequest::post()
        .uri("/gateway/backend/ghost/toggle")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[actix_web::test]
async fn circuit_and_metrics_reset_endpoints() {
    let (gateway, pipeline) = gateway();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(gateway.clone()))
            .app_data(web::Data::new(pipeline.clone()))
            .configure(management::configure_management),
    )
    .await;

    // Trip one breaker, then reset it over HTTP.
    let breaker = gateway.breaker("api-1").unwrap();
    for _ in 0..3 {
        breaker.on_failure();
    }
    gateway.metrics().record_request();

    let req = test::TestRequest::post()
        .uri("/gateway/circuit/api-1/reset")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        gateway.breaker("api-1").unwrap().state(),
        portcullis_rs::services::circuit_breaker::CircuitState::Closed
    );

    let req = test::TestRequest::post()
        .uri("/gateway/metrics/reset")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(gateway.metrics().snapshot().total_requests, 0);
}

#[actix_web::test]
async fn prometheus_exposition_lists_every_backend() {
    let (gateway, _pipeline) = gateway();
    gateway.metrics().record_proxied("api-1");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(gateway.clone()))
            .configure(metrics::configure_metrics),
    )
    .await;

    let req = test::TestRequest::get().uri("/gateway/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("portcullis_proxied_total 1"));
    assert!(text.contains("portcullis_backend_requests_total{backend=\"api-1\"} 1"));
    assert!(text.contains("portcullis_circuit_state{backend=\"api-3\"} 0"));
}

#[actix_web::test]
async fn probe_endpoints_answer() {
    let (gateway, _pipeline) = gateway();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(gateway.clone()))
            .configure(health::configure_health),
    )
    .await;

    for uri in ["/health", "/ready", "/live"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success(), "{} should be 200", uri);
    }

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["uptime"].is_u64());
}
