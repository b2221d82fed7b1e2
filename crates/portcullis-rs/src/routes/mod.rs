//! HTTP route definitions and handlers.
//!
//! - [`forward`] - the catch-all handler that drives the pipeline
//! - [`management`] - the `/gateway/*` control surface
//! - [`metrics`] - Prometheus-format metrics exposition
//! - [`health`] - service probe endpoints

pub mod forward;
pub mod health;
pub mod management;
pub mod metrics;
