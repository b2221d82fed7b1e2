//! Transaction logging stage.

use futures::future::LocalBoxFuture;
use log::{error, info};
use std::sync::Arc;

use crate::middleware::chain::{Next, Stage, StageResult};
use crate::middleware::context::RequestContext;
use crate::services::gateway::Gateway;

/// First stage of the chain.
///
/// Runs before everything else so that even requests rejected by a later
/// stage are logged with their final status and elapsed time, and counts
/// every inbound request in the aggregate metrics. The finish line is
/// emitted after the rest of the chain returns, whatever happened inside.
pub struct LoggerStage {
    gateway: Arc<Gateway>,
}

impl LoggerStage {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Stage for LoggerStage {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult> {
        Box::pin(async move {
            self.gateway.metrics().record_request();

            let result = next.run(ctx).await;
            let elapsed = ctx.elapsed_ms();

            match &result {
                Ok(response) => {
                    let backend = ctx
                        .metadata
                        .get("backend")
                        .map(String::as_str)
                        .unwrap_or("-");
                    let limited = if ctx.metadata.contains_key("rate_limited") {
                        " rate-limited"
                    } else {
                        ""
                    };
                    info!(
                        "{} {} -> {} in {}ms (client={} backend={}{}) [{}]",
                        ctx.method,
                        ctx.path,
                        response.status.as_u16(),
                        elapsed,
                        ctx.client_key,
                        backend,
                        limited,
                        ctx.request_id,
                    );
                }
                Err(err) => {
                    error!(
                        "{} {} -> error after {}ms: {} [{}]",
                        ctx.method, ctx.path, elapsed, err, ctx.request_id,
                    );
                }
            }

            result
        })
    }
}
