//! CORS stage.

use actix_web::http::{Method, StatusCode};
use futures::future::LocalBoxFuture;
use log::error;

use crate::middleware::chain::{Next, Stage, StageResult};
use crate::middleware::context::RequestContext;
use crate::middleware::response::GatewayResponse;
use crate::models::settings::CorsSettings;

/// Sets the Access-Control-Allow-* headers on every response, including
/// rejections and internal errors, and terminates preflight requests with
/// 204 without invoking the rest of the chain.
///
/// Inner-stage errors are converted to their 500 response here so the
/// headers still apply and the logger stage above sees a finished status.
pub struct CorsStage {
    allowed_origin: String,
    allowed_methods: String,
    allowed_headers: String,
    max_age: String,
}

impl CorsStage {
    pub fn new(settings: &CorsSettings) -> Self {
        Self {
            allowed_origin: settings.allowed_origin.clone(),
            allowed_methods: settings.allowed_methods.clone(),
            allowed_headers: settings.allowed_headers.clone(),
            max_age: settings.max_age_secs.to_string(),
        }
    }

    fn apply(&self, response: &mut GatewayResponse) {
        response.insert_header("access-control-allow-origin", &self.allowed_origin);
        response.insert_header("access-control-allow-methods", &self.allowed_methods);
        response.insert_header("access-control-allow-headers", &self.allowed_headers);
        response.insert_header("access-control-max-age", &self.max_age);
    }
}

impl Stage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult> {
        Box::pin(async move {
            if ctx.method == Method::OPTIONS {
                let mut response = GatewayResponse::new(StatusCode::NO_CONTENT);
                self.apply(&mut response);
                return Ok(response);
            }

            let mut response = match next.run(ctx).await {
                Ok(response) => response,
                Err(err) => {
                    error!("request {} failed: {}", ctx.request_id, err);
                    err.to_response()
                }
            };
            self.apply(&mut response);
            Ok(response)
        })
    }
}
