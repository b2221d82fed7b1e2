//! Rate limiting stage.

use actix_web::http::StatusCode;
use futures::future::LocalBoxFuture;
use log::warn;
use serde_json::json;
use std::sync::Arc;

use crate::middleware::chain::{Next, Stage, StageResult};
use crate::middleware::context::RequestContext;
use crate::middleware::response::GatewayResponse;
use crate::services::gateway::Gateway;
use crate::services::rate_limiter::RateLimitDecision;

/// Consults the active rate limiter with the request's client key.
///
/// Every response that passed through this stage carries the
/// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Algorithm`
/// headers. Denied requests additionally get `Retry-After` and terminate
/// with 429 without reaching selection.
pub struct RateLimitStage {
    gateway: Arc<Gateway>,
}

impl RateLimitStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    fn apply_headers(response: &mut GatewayResponse, decision: &RateLimitDecision, name: &str) {
        response.insert_header("x-ratelimit-limit", &decision.limit.to_string());
        response.insert_header("x-ratelimit-remaining", &decision.remaining.to_string());
        response.insert_header("x-ratelimit-algorithm", name);
    }
}

impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult> {
        Box::pin(async move {
            let limiter = self.gateway.active_limiter();
            let decision = limiter.consume(&ctx.client_key);
            ctx.metadata
                .insert("rate_limiter", limiter.name().to_string());

            if !decision.allowed {
                self.gateway.metrics().record_rate_limited();
                ctx.metadata.insert("rate_limited", "true".to_string());

                let retry_after = decision.retry_after.unwrap_or(1);
                warn!(
                    "rate limit exceeded for client {} ({}, retry after {}s)",
                    ctx.client_key,
                    limiter.name(),
                    retry_after,
                );

                let body = json!({
                    "error": "Rate limit exceeded",
                    "algorithm": limiter.name(),
                    "retry_after": retry_after,
                });
                let mut response = GatewayResponse::json(StatusCode::TOO_MANY_REQUESTS, &body);
                response.insert_header("retry-after", &retry_after.to_string());
                Self::apply_headers(&mut response, &decision, limiter.name());
                return Ok(response);
            }

            // Inner errors propagate so the CORS stage stays the single
            // point that logs and converts them; only the counter is
            // recorded here.
            let mut response = match next.run(ctx).await {
                Ok(response) => response,
                Err(err) => {
                    self.gateway.metrics().record_error();
                    return Err(err);
                }
            };
            Self::apply_headers(&mut response, &decision, limiter.name());
            Ok(response)
        })
    }
}
