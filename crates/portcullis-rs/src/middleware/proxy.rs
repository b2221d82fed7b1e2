//! Upstream forwarding stage.
//!
//! Terminal stage of the chain. Opens the upstream request over a pooled
//! reqwest client, relays status, headers and body back to the client, maps
//! the observed outcome onto the backend's circuit breaker, and guarantees
//! the load balancer's completion hook runs exactly once per selection via a
//! drop guard.

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::{Method as ActixMethod, StatusCode};
use actix_web::web::Bytes;
use futures::future::LocalBoxFuture;
use log::{debug, warn};
use reqwest::{
    header::HeaderMap as ReqwestHeaderMap, header::HeaderName as ReqwestHeaderName,
    header::HeaderValue as ReqwestHeaderValue, Client, Method as ReqwestMethod,
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use crate::middleware::chain::{Next, Stage, StageResult};
use crate::middleware::context::RequestContext;
use crate::middleware::response::GatewayResponse;
use crate::models::backend::Backend;
use crate::models::error::GatewayError;
use crate::services::gateway::Gateway;
use crate::services::load_balancer::LoadBalancer;

/// Version tag reported in the `x-gateway` header.
const GATEWAY_TAG: &str = concat!("portcullis-rs/", env!("CARGO_PKG_VERSION"));

/// Inbound headers never forwarded upstream. Host is regenerated from the
/// backend authority; the connection-management headers are hop-by-hop.
const SKIP_REQUEST_HEADERS: &[&str] = &["host", "connection", "upgrade", "proxy-connection"];

/// Upstream headers never relayed back. The body is re-framed by the server,
/// so the upstream's framing headers would lie about it.
const SKIP_RESPONSE_HEADERS: &[&str] =
    &["connection", "keep-alive", "transfer-encoding", "content-length"];

/// Releases the balancer's per-selection bookkeeping when dropped.
///
/// Held across the whole upstream exchange so the completion hook fires on
/// success, timeout, transport error and client disconnect alike.
struct CompletionGuard {
    balancer: Arc<dyn LoadBalancer>,
    backend: Arc<Backend>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.balancer.completed(&self.backend);
    }
}

/// Terminal proxy stage.
pub struct ProxyStage {
    gateway: Arc<Gateway>,
    client: Client,
    timeout_ms: u64,
}

impl ProxyStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("Failed to create HTTP client");
        let timeout_ms = gateway.settings().proxy.upstream_timeout_ms;

        Self {
            gateway,
            client,
            timeout_ms,
        }
    }

    fn convert_method(method: &ActixMethod) -> ReqwestMethod {
        match *method {
            ActixMethod::GET => ReqwestMethod::GET,
            ActixMethod::POST => ReqwestMethod::POST,
            ActixMethod::PUT => ReqwestMethod::PUT,
            ActixMethod::DELETE => ReqwestMethod::DELETE,
            ActixMethod::HEAD => ReqwestMethod::HEAD,
            ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
            ActixMethod::PATCH => ReqwestMethod::PATCH,
            ActixMethod::TRACE => ReqwestMethod::TRACE,
            _ => ReqwestMethod::GET,
        }
    }

    /// Converts and filters inbound headers for the upstream request.
    /// Invalid names or values are skipped rather than failing the request.
    fn build_upstream_headers(original: &HeaderMap) -> ReqwestHeaderMap {
        let mut headers = ReqwestHeaderMap::with_capacity(original.len());

        for (key, value) in original {
            let key_str = key.as_str();
            if SKIP_REQUEST_HEADERS
                .iter()
                .any(|skip| key_str.eq_ignore_ascii_case(skip))
            {
                continue;
            }

            if let (Ok(name), Ok(value)) = (
                ReqwestHeaderName::from_bytes(key_str.as_bytes()),
                ReqwestHeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }

        headers
            .entry("user-agent")
            .or_insert_with(|| ReqwestHeaderValue::from_static(GATEWAY_TAG));

        headers
    }

    /// Relays upstream response headers, dropping the hop-by-hop set.
    fn relay_response_headers(upstream: &reqwest::header::HeaderMap, target: &mut HeaderMap) {
        for (key, value) in upstream {
            let key_str = key.as_str();
            if SKIP_RESPONSE_HEADERS
                .iter()
                .any(|skip| key_str.eq_ignore_ascii_case(skip))
            {
                continue;
            }

            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key_str.as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                target.insert(name, value);
            }
        }
    }
}

impl Stage for ProxyStage {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        _next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult> {
        Box::pin(async move {
            let backend = ctx.backend.clone().ok_or_else(|| {
                GatewayError::Internal("proxy stage reached without a selected backend".to_string())
            })?;
            let breaker = ctx.breaker.clone().ok_or_else(|| {
                GatewayError::Internal("proxy stage reached without a circuit breaker".to_string())
            })?;
            let balancer = ctx.balancer.clone().ok_or_else(|| {
                GatewayError::Internal("proxy stage reached without a load balancer".to_string())
            })?;

            let _completion = CompletionGuard {
                balancer,
                backend: backend.clone(),
            };

            self.gateway.metrics().record_proxied(&backend.name);

            let url = backend.url_for(&ctx.path, &ctx.query);
            debug!("forwarding {} {} to {}", ctx.method, ctx.path, url);

            let upstream_request = self
                .client
                .request(Self::convert_method(&ctx.method), &url)
                .headers(Self::build_upstream_headers(&ctx.headers))
                .body(ctx.body.to_vec());

            let outcome = timeout(
                Duration::from_millis(self.timeout_ms),
                upstream_request.send(),
            )
            .await;

            let mut response = match outcome {
                Err(_) => {
                    breaker.on_failure();
                    self.gateway.metrics().record_error();
                    warn!(
                        "upstream {} timed out after {}ms",
                        backend.name, self.timeout_ms
                    );
                    GatewayResponse::json(
                        StatusCode::GATEWAY_TIMEOUT,
                        &json!({
                            "error": "Upstream request timed out",
                            "backend": backend.name,
                            "timeout_ms": self.timeout_ms,
                        }),
                    )
                }
                Ok(Err(err)) => {
                    breaker.on_failure();
                    self.gateway.metrics().record_error();
                    warn!("upstream {} unreachable: {}", backend.name, err);
                    GatewayResponse::json(
                        StatusCode::BAD_GATEWAY,
                        &json!({
                            "error": "Upstream request failed",
                            "backend": backend.name,
                            "detail": err.to_string(),
                        }),
                    )
                }
                Ok(Ok(upstream)) => {
                    let status = upstream.status().as_u16();
                    let upstream_headers = upstream.headers().clone();

                    match upstream.bytes().await {
                        Err(err) => {
                            breaker.on_failure();
                            self.gateway.metrics().record_error();
                            warn!(
                                "upstream {} body read failed: {}",
                                backend.name, err
                            );
                            GatewayResponse::json(
                                StatusCode::BAD_GATEWAY,
                                &json!({
                                    "error": "Upstream request failed",
                                    "backend": backend.name,
                                    "detail": err.to_string(),
                                }),
                            )
                        }
                        Ok(body) => {
                            // Any completed exchange below 500, 4xx included,
                            // proves the backend is up.
                            if status >= 500 {
                                breaker.on_failure();
                            } else {
                                breaker.on_success();
                            }

                            let mut response = GatewayResponse {
                                status: StatusCode::from_u16(status)
                                    .unwrap_or(StatusCode::BAD_GATEWAY),
                                headers: HeaderMap::new(),
                                body: Bytes::from(body),
                            };
                            Self::relay_response_headers(&upstream_headers, &mut response.headers);
                            response
                        }
                    }
                }
            };

            let lb_algorithm = ctx
                .metadata
                .get("lb_algorithm")
                .cloned()
                .unwrap_or_default();
            response.insert_header("x-gateway", GATEWAY_TAG);
            response.insert_header("x-backend", &backend.name);
            response.insert_header("x-backend-port", &backend.port.to_string());
            response.insert_header("x-response-time", &format!("{}ms", ctx.elapsed_ms()));
            response.insert_header("x-lb-algorithm", &lb_algorithm);
            response.insert_header("x-circuit-state", &breaker.state().to_string());

            Ok(response)
        })
    }
}
