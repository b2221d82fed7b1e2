//! Runtime control surface under `/gateway/*`.
//!
//! These endpoints mutate the live gateway: swapping the active rate limiter
//! or load balancer, toggling backend health, resetting circuit breakers and
//! zeroing the metrics. `GET /gateway/health` exposes a snapshot of the
//! whole decision state for dashboards and debugging.

use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::middleware::chain::Pipeline;
use crate::services::gateway::Gateway;

/// Response envelope for the control operations.
#[derive(Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the operation completed successfully.
    pub success: bool,
    /// Human-readable message describing the result.
    pub message: String,
}

impl ControlResponse {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

/// Snapshot of the gateway's decision state.
///
/// # Endpoint
///
/// `GET /gateway/health`
///
/// # Response
///
/// Active algorithm names, the registered alternatives, the pipeline stage
/// order, per-backend status (healthy flag, circuit state, routed request
/// count), full breaker stats and the aggregate metrics.
#[get("/gateway/health")]
pub async fn gateway_health(
    gateway: web::Data<Arc<Gateway>>,
    pipeline: web::Data<Arc<Pipeline>>,
) -> impl Responder {
    let backends: Vec<_> = gateway
        .backends()
        .iter()
        .map(|backend| {
            let circuit_state = gateway
                .breaker(&backend.name)
                .map(|breaker| breaker.state().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            json!({
                "name": backend.name,
                "host": backend.host,
                "port": backend.port,
                "weight": backend.weight,
                "healthy": backend.is_healthy(),
                "circuit_state": circuit_state,
                "count": gateway.metrics().backend_count(&backend.name),
            })
        })
        .collect();

    let mut circuits = serde_json::Map::new();
    for backend in gateway.backends() {
        if let Some(breaker) = gateway.breaker(&backend.name) {
            circuits.insert(backend.name.clone(), json!(breaker.stats()));
        }
    }

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active": {
            "rate_limiter": gateway.active_limiter().name(),
            "load_balancer": gateway.active_balancer().name(),
        },
        "available": {
            "rate_limiters": gateway.limiter_names(),
            "load_balancers": gateway.balancer_names(),
        },
        "pipeline": pipeline.stage_names(),
        "backends": backends,
        "circuits": circuits,
        "metrics": gateway.metrics().snapshot(),
    }))
}

/// Swaps the active rate limiter.
///
/// # Endpoint
///
/// `POST /gateway/rate-limiter/{name}`
///
/// Returns 400 with the offending name when no limiter is registered
/// under it.
#[post("/gateway/rate-limiter/{name}")]
pub async fn swap_rate_limiter(
    gateway: web::Data<Arc<Gateway>>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match gateway.set_rate_limiter(&name) {
        Ok(()) => HttpResponse::Ok().json(ControlResponse::ok(format!(
            "Active rate limiter set to {}",
            name
        ))),
        Err(message) => HttpResponse::BadRequest().json(ControlResponse::failed(message)),
    }
}

/// Swaps the active load balancer.
///
/// # Endpoint
///
/// `POST /gateway/load-balancer/{name}`
#[post("/gateway/load-balancer/{name}")]
pub async fn swap_load_balancer(
    gateway: web::Data<Arc<Gateway>>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match gateway.set_load_balancer(&name) {
        Ok(()) => HttpResponse::Ok().json(ControlResponse::ok(format!(
            "Active load balancer set to {}",
            name
        ))),
        Err(message) => HttpResponse::BadRequest().json(ControlResponse::failed(message)),
    }
}

/// Flips a backend's healthy flag and propagates the change to every load
/// balancer.
///
/// # Endpoint
///
/// `POST /gateway/backend/{name}/toggle`
#[post("/gateway/backend/{name}/toggle")]
pub async fn toggle_backend(
    gateway: web::Data<Arc<Gateway>>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match gateway.toggle_backend(&name) {
        Some(healthy) => HttpResponse::Ok().json(json!({
            "success": true,
            "backend": name,
            "healthy": healthy,
        })),
        None => HttpResponse::NotFound().json(ControlResponse::failed(format!(
            "Unknown backend: {}",
            name
        ))),
    }
}

/// Forces a breaker back to CLOSED and clears its failure log.
///
/// # Endpoint
///
/// `POST /gateway/circuit/{name}/reset`
#[post("/gateway/circuit/{name}/reset")]
pub async fn reset_circuit(
    gateway: web::Data<Arc<Gateway>>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    if gateway.reset_circuit(&name) {
        HttpResponse::Ok().json(ControlResponse::ok(format!("Circuit {} reset", name)))
    } else {
        HttpResponse::NotFound().json(ControlResponse::failed(format!(
            "Unknown backend: {}",
            name
        )))
    }
}

/// Zeroes all aggregate counters.
///
/// # Endpoint
///
/// `POST /gateway/metrics/reset`
#[post("/gateway/metrics/reset")]
pub async fn reset_metrics(gateway: web::Data<Arc<Gateway>>) -> impl Responder {
    gateway.metrics().reset();
    HttpResponse::Ok().json(ControlResponse::ok("Metrics reset".to_string()))
}

/// Registers the control surface routes.
pub fn configure_management(cfg: &mut web::ServiceConfig) {
    cfg.service(gateway_health)
        .service(swap_rate_limiter)
        .service(swap_load_balancer)
        .service(toggle_backend)
        .service(reset_circuit)
        .service(reset_metrics);
}
