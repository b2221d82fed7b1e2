//! Backend selection stage: load balancer plus circuit breakers.

use actix_web::http::StatusCode;
use futures::future::LocalBoxFuture;
use log::{debug, warn};
use serde_json::json;
use std::sync::Arc;

use crate::middleware::chain::{Next, Stage, StageResult};
use crate::middleware::context::RequestContext;
use crate::middleware::response::GatewayResponse;
use crate::models::error::GatewayError;
use crate::services::gateway::Gateway;

/// Asks the active load balancer for a candidate and consults the
/// candidate's circuit breaker.
///
/// A refused candidate is released back to the balancer (`completed`, so
/// least-connections counts stay paired) and added to the excluded set
/// before asking again; deterministic balancers therefore skip over refused
/// backends instead of returning them forever. At most one candidate per
/// configured backend is consulted. If nobody admits the request the stage
/// terminates with 503 and a body listing each breaker's state.
pub struct SelectStage {
    gateway: Arc<Gateway>,
}

impl SelectStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Stage for SelectStage {
    fn name(&self) -> &'static str {
        "select"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult> {
        Box::pin(async move {
            let balancer = self.gateway.active_balancer();
            ctx.metadata
                .insert("lb_algorithm", balancer.name().to_string());

            let mut refused: Vec<String> = Vec::new();
            let mut admitted = None;

            for _ in 0..self.gateway.backends().len() {
                let Some(candidate) = balancer.select(Some(&ctx.client_key), &refused) else {
                    break;
                };

                let Some(breaker) = self.gateway.breaker(&candidate.name) else {
                    // Release the selection before bailing; the proxy stage
                    // will never run for this candidate.
                    balancer.completed(&candidate);
                    return Err(GatewayError::Internal(format!(
                        "no circuit breaker registered for backend {}",
                        candidate.name
                    )));
                };

                if breaker.can_request() {
                    admitted = Some((candidate, breaker));
                    break;
                }

                debug!(
                    "circuit {} refused request {}, trying next backend",
                    candidate.name, ctx.request_id
                );
                balancer.completed(&candidate);
                refused.push(candidate.name.clone());
            }

            let Some((backend, breaker)) = admitted else {
                self.gateway.metrics().record_circuit_broken();
                warn!(
                    "no backend admitted request {} ({} refused)",
                    ctx.request_id,
                    refused.len()
                );

                let mut circuits = serde_json::Map::new();
                for backend in self.gateway.backends() {
                    if let Some(breaker) = self.gateway.breaker(&backend.name) {
                        circuits.insert(
                            backend.name.clone(),
                            json!(breaker.state().to_string()),
                        );
                    }
                }
                let body = json!({
                    "error": "All backends are unavailable",
                    "circuits": circuits,
                });
                return Ok(GatewayResponse::json(StatusCode::SERVICE_UNAVAILABLE, &body));
            };

            ctx.metadata.insert("backend", backend.name.clone());
            ctx.backend = Some(backend);
            ctx.breaker = Some(breaker);
            ctx.balancer = Some(balancer);

            next.run(ctx).await
        })
    }
}
