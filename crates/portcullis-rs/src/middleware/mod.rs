//! The request-decision pipeline.
//!
//! Every proxied request runs through an ordered chain of named stages, each
//! of which may delegate to the remainder of the chain or terminate the
//! request itself. The canonical order is logger, CORS, rate-limit, select,
//! proxy; see [`chain::Pipeline::standard`].
//!
//! # Module Organization
//!
//! - [`chain`] - `Stage` trait, `Next` cursor and the `Pipeline` driver
//! - [`context`] - the per-request `RequestContext`
//! - [`response`] - the in-memory `GatewayResponse` stages build
//! - [`logger`] - transaction logging and request counting
//! - [`cors`] - CORS headers and preflight termination
//! - [`rate_limit`] - admission control against the active limiter
//! - [`select`] - load balancer plus circuit breaker selection
//! - [`proxy`] - upstream forwarding and outcome bookkeeping

pub mod chain;
pub mod context;
pub mod cors;
pub mod logger;
pub mod proxy;
pub mod rate_limit;
pub mod response;
pub mod select;
