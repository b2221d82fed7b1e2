//! Per-request pipeline context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use actix_web::http::header::HeaderMap;
use actix_web::http::Method;
use actix_web::web::Bytes;

use crate::models::backend::Backend;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::load_balancer::LoadBalancer;

/// Everything one request carries down the stage chain.
///
/// The selection stage fills `backend`, `breaker` and `balancer`; the proxy
/// stage requires all three. `metadata` is an open bag where stages record
/// facts for the logger and for diagnostic headers (active algorithm names,
/// the rate-limited flag, the chosen backend).
pub struct RequestContext {
    /// Per-request id included in transaction log lines.
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// Raw query string without the leading `?`; empty when absent.
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Partition key for rate limiting and hashing balancers, normally the
    /// client IP.
    pub client_key: String,
    pub started_at: Instant,
    pub backend: Option<Arc<Backend>>,
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub balancer: Option<Arc<dyn LoadBalancer>>,
    pub metadata: HashMap<&'static str, String>,
}

impl RequestContext {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: impl Into<String>,
        headers: HeaderMap,
        body: Bytes,
        client_key: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            query: query.into(),
            headers,
            body,
            client_key: client_key.into(),
            started_at: Instant::now(),
            backend: None,
            breaker: None,
            balancer: None,
            metadata: HashMap::new(),
        }
    }

    /// Shorthand for a GET with no headers or body, used heavily in tests.
    pub fn get(path: &str, client_key: &str) -> Self {
        Self::new(
            Method::GET,
            path,
            "",
            HeaderMap::new(),
            Bytes::new(),
            client_key,
        )
    }

    /// Milliseconds since the context was created.
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}
