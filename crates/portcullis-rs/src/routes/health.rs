//! Service probe endpoints.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Result};
use serde_json::json;

use crate::services::gateway::Gateway;

/// General health check with version, timestamp and uptime.
///
/// Distinct from `/gateway/health`: this endpoint answers "is the process
/// up" for load balancers and orchestration probes, while the gateway
/// snapshot reports decision-pipeline internals.
pub async fn health_check(gateway: web::Data<Arc<Gateway>>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": gateway.uptime_secs(),
    })))
}

/// Readiness probe endpoint.
pub async fn readiness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Liveness probe endpoint.
pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Registers `/health`, `/ready` and `/live`.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check));
}
