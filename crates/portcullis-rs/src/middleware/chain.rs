//! The composable stage chain that drives each request.
//!
//! A [`Pipeline`] is an ordered list of named stages fixed at startup. Each
//! stage receives the request context and a [`Next`] cursor over the
//! remainder of the chain; calling `next.run(ctx)` delegates onward, not
//! calling it short-circuits with the stage's own response. The driver tags
//! any raw error with the name of the stage that raised it so the resulting
//! 500 body can point at the offender.

use std::sync::Arc;

use futures::future::LocalBoxFuture;
use log::error;

use crate::middleware::context::RequestContext;
use crate::middleware::response::GatewayResponse;
use crate::middleware::{cors, logger, proxy, rate_limit, select};
use crate::models::error::GatewayError;
use crate::services::gateway::Gateway;

/// Result of running a stage: a finished response, or an internal fault the
/// driver converts into a 500.
pub type StageResult = Result<GatewayResponse, GatewayError>;

/// One named step of the pipeline.
pub trait Stage: Send + Sync {
    /// Stage name used in progress logs and internal-error bodies.
    fn name(&self) -> &'static str;

    /// Handles the request, delegating to `next` or short-circuiting.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> LocalBoxFuture<'a, StageResult>;
}

/// Cursor over the remaining stages of the chain.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    /// Runs the rest of the chain.
    ///
    /// An error coming out of a stage that has not already been attributed
    /// is tagged with that stage's name here, so stages can use `?` freely.
    pub async fn run(self, ctx: &mut RequestContext) -> StageResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let name = stage.name();
                match stage.handle(ctx, Next { stages: rest }).await {
                    Err(GatewayError::Internal(message)) => {
                        Err(GatewayError::Stage {
                            stage: name,
                            message,
                        })
                    }
                    other => other,
                }
            }
            None => Err(GatewayError::Internal(
                "pipeline ended without a terminal stage".to_string(),
            )),
        }
    }
}

/// The ordered stage chain.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Builds a pipeline from an explicit stage list. Order is significant
    /// and fixed for the process lifetime.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The canonical five-stage chain: logger, CORS, rate-limit, select,
    /// proxy. Stage order encodes the design: logging wraps everything so
    /// rejected requests still get a transaction line, CORS headers reach
    /// every response, and nothing hits the proxy without passing admission.
    pub fn standard(gateway: Arc<Gateway>) -> Self {
        let settings = gateway.settings().clone();
        Self::new(vec![
            Arc::new(logger::LoggerStage::new(gateway.clone())),
            Arc::new(cors::CorsStage::new(&settings.cors)),
            Arc::new(rate_limit::RateLimitStage::new(gateway.clone())),
            Arc::new(select::SelectStage::new(gateway.clone())),
            Arc::new(proxy::ProxyStage::new(gateway)),
        ])
    }

    /// Stage names in execution order, surfaced by the health snapshot.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Drives a request through the chain and always produces a response.
    pub async fn handle(&self, ctx: &mut RequestContext) -> GatewayResponse {
        match (Next {
            stages: &self.stages,
        })
        .run(ctx)
        .await
        {
            Ok(response) => response,
            Err(err) => {
                error!("request {} failed: {}", ctx.request_id, err);
                err.to_response()
            }
        }
    }
}
