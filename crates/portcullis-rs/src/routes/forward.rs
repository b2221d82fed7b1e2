//! Catch-all forwarding handler.
//!
//! Everything that is not a control or probe route lands here: the handler
//! derives the client key, builds the pipeline context from the raw request,
//! runs the stage chain and converts the resulting [`GatewayResponse`] back
//! into an Actix response.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};

use crate::middleware::chain::Pipeline;
use crate::middleware::context::RequestContext;

/// Derives the rate-limit partition key from the connection.
///
/// Prefers the first forwarded-for entry when present, falling back to the
/// peer address, and strips the port so one client maps to one key
/// regardless of its ephemeral source port.
pub fn client_key(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let addr = info.realip_remote_addr().unwrap_or("unknown");
    match addr.parse::<std::net::SocketAddr>() {
        Ok(socket) => socket.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

/// Runs one request through the pipeline.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    pipeline: web::Data<Arc<Pipeline>>,
) -> HttpResponse {
    let key = client_key(&req);
    let mut ctx = RequestContext::new(
        req.method().clone(),
        req.path(),
        req.query_string(),
        req.headers().clone(),
        body,
        key,
    );

    pipeline.handle(&mut ctx).await.into_http_response()
}
