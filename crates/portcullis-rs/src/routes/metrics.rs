//! Prometheus-compatible metrics exposition.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result};

use crate::services::circuit_breaker::CircuitState;
use crate::services::gateway::Gateway;

/// Renders the gateway counters and circuit states in Prometheus exposition
/// format.
///
/// # Metrics Exposed
///
/// - **portcullis_requests_total**: inbound requests (counter)
/// - **portcullis_rate_limited_total**: requests denied by a limiter (counter)
/// - **portcullis_circuit_broken_total**: requests refused by every breaker (counter)
/// - **portcullis_proxied_total**: requests handed to the proxy stage (counter)
/// - **portcullis_errors_total**: upstream transport errors and timeouts (counter)
/// - **portcullis_backend_requests_total{backend=...}**: per-backend routing (counter)
/// - **portcullis_circuit_state{backend=...}**: 0=closed, 1=open, 2=half-open (gauge)
pub async fn metrics_endpoint(gateway: web::Data<Arc<Gateway>>) -> Result<HttpResponse> {
    let snapshot = gateway.metrics().snapshot();

    let mut text = format!(
        r#"# HELP portcullis_requests_total Total number of inbound requests
# TYPE portcullis_requests_total counter
portcullis_requests_total {}

# HELP portcullis_rate_limited_total Requests denied by the active rate limiter
# TYPE portcullis_rate_limited_total counter
portcullis_rate_limited_total {}

# HELP portcullis_circuit_broken_total Requests refused by every circuit breaker
# TYPE portcullis_circuit_broken_total counter
portcullis_circuit_broken_total {}

# HELP portcullis_proxied_total Requests forwarded to a backend
# TYPE portcullis_proxied_total counter
portcullis_proxied_total {}

# HELP portcullis_errors_total Upstream transport errors and timeouts
# TYPE portcullis_errors_total counter
portcullis_errors_total {}
"#,
        snapshot.total_requests,
        snapshot.rate_limited,
        snapshot.circuit_broken,
        snapshot.proxied,
        snapshot.errors,
    );

    text.push_str("\n# HELP portcullis_backend_requests_total Requests routed per backend\n");
    text.push_str("# TYPE portcullis_backend_requests_total counter\n");
    for backend in gateway.backends() {
        text.push_str(&format!(
            "portcullis_backend_requests_total{{backend=\"{}\"}} {}\n",
            backend.name,
            gateway.metrics().backend_count(&backend.name),
        ));
    }

    text.push_str(
        "\n# HELP portcullis_circuit_state Circuit state (0=closed, 1=open, 2=half-open)\n",
    );
    text.push_str("# TYPE portcullis_circuit_state gauge\n");
    for backend in gateway.backends() {
        if let Some(breaker) = gateway.breaker(&backend.name) {
            let value = match breaker.state() {
                CircuitState::Closed => 0,
                CircuitState::Open => 1,
                CircuitState::HalfOpen => 2,
            };
            text.push_str(&format!(
                "portcullis_circuit_state{{backend=\"{}\"}} {}\n",
                backend.name, value,
            ));
        }
    }

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(text))
}

/// Registers `GET /gateway/metrics`.
pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/gateway/metrics", web::get().to(metrics_endpoint));
}
