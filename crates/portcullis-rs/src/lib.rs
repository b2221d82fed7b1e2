//! # Portcullis API Gateway
//!
//! A reverse-proxy API gateway built with Rust and Actix Web. Portcullis
//! sits between untrusted clients and a fixed pool of interchangeable
//! backend HTTP services and decides, for every inbound request: is the
//! client within its permitted rate, which healthy backend should serve the
//! request, and how did the forwarded exchange go.
//!
//! ## Core Features
//!
//! ### Request Pipeline
//! - **Named stage chain**: logger, CORS, rate-limit, select, proxy; fixed
//!   at startup, each stage may short-circuit the request
//! - **Decision headers**: `X-RateLimit-*` and `x-backend`/`x-circuit-state`
//!   diagnostics on every decided response
//!
//! ### Traffic Protection
//! - **Rate limiting**: five swappable algorithms (fixed window, sliding
//!   log, sliding counter, token bucket, leaky bucket)
//! - **Load balancing**: five swappable strategies (round-robin, weighted
//!   round-robin, least-connections, IP-hash, consistent-hash)
//! - **Circuit breaking**: per-backend windowed failure tracking with
//!   automatic half-open probing
//!
//! ### Operations
//! - **Control surface**: swap active algorithms, toggle backend health,
//!   reset breakers and counters at runtime under `/gateway/*`
//! - **Observability**: structured transaction logs, a JSON health
//!   snapshot, and Prometheus-format counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portcullis_rs::middleware::chain::Pipeline;
//! use portcullis_rs::models::settings::Settings;
//! use portcullis_rs::services::gateway::Gateway;
//!
//! let settings = Settings::default();
//! settings.validate().expect("invalid configuration");
//!
//! let gateway = Gateway::new(settings);
//! let pipeline = Arc::new(Pipeline::standard(gateway.clone()));
//! // Hand `gateway` and `pipeline` to the HTTP server as shared app data.
//! ```
//!
//! ## Module Organization
//!
//! - **[`config`]** - Configuration file loading
//! - **[`models`]** - Backends, settings schema, and error types
//! - **[`services`]** - Rate limiters, load balancers, circuit breakers,
//!   metrics, and the gateway registry
//! - **[`middleware`]** - The stage chain and the five pipeline stages
//! - **[`routes`]** - Control surface, probes, metrics, and the catch-all
//!   forwarder
//! - **[`logs`]** - Logging configuration
//! - **[`utils`]** - Clock injection and hash functions
//!
//! ## Environment Variables
//!
//! - `GATEWAY_CONFIG_PATH`: configuration file path (default: `./config.json`)
//! - `GATEWAY_HOST`: server bind address (default: from configuration)
//! - `GATEWAY_PORT`: server port (default: from configuration)
//! - `NO_COLOR`: disable coloured log output

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
