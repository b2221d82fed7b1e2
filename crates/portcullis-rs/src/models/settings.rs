//! Application configuration schema.
//!
//! Every section carries serde defaults so a partial configuration file (or
//! none at all) resolves to the documented default gateway: three weighted
//! backends, 50-per-minute window limiters, 20-token buckets, a 3-failure
//! breaker, and a 5 second upstream timeout on port 4000.

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
///
/// # Examples
///
/// ```json
/// {
///   "version": 1,
///   "server": { "host": "0.0.0.0", "port": 4000 },
///   "backends": [
///     { "name": "api-1", "host": "127.0.0.1", "port": 9101, "weight": 3 },
///     { "name": "api-2", "host": "127.0.0.1", "port": 9102, "weight": 2 },
///     { "name": "api-3", "host": "127.0.0.1", "port": 9103, "weight": 1 }
///   ],
///   "rate_limit": { "max_requests": 50, "window_ms": 60000 },
///   "circuit_breaker": { "failure_threshold": 3, "reset_timeout_ms": 15000 }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    /// Configuration schema version.
    #[serde(default = "default_version")]
    pub version: u8,

    /// Listener address configuration.
    #[serde(default)]
    pub server: ServerSettings,

    /// The fixed backend pool. Order matters for deterministic selection.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    /// Shared parameters for the five rate-limiting algorithms.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Per-backend circuit breaker parameters.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Load balancer tuning.
    #[serde(default)]
    pub load_balancer: BalancerSettings,

    /// Upstream proxy behaviour.
    #[serde(default)]
    pub proxy: ProxySettings,

    /// CORS headers applied to every response.
    #[serde(default)]
    pub cors: CorsSettings,
}

/// One backend pool entry as written in the configuration file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackendConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Weight for weighted round-robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    /// Ceiling for the window-based algorithms.
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Window length for the window-based algorithms, in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Token bucket capacity (also the burst ceiling).
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: f64,
    /// Token bucket refill rate, tokens per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    /// Leaky bucket capacity.
    #[serde(default = "default_bucket_capacity")]
    pub leak_capacity: f64,
    /// Leaky bucket drain rate, requests per second.
    #[serde(default = "default_leak_per_sec")]
    pub leak_per_sec: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CircuitBreakerSettings {
    /// Failures within the monitor window that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Failure-aggregation window in milliseconds.
    #[serde(default = "default_monitor_window_ms")]
    pub monitor_window_ms: u64,
    /// Time spent OPEN before a probe is admitted, in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Concurrent probes allowed while HALF_OPEN.
    #[serde(default = "default_half_open_max")]
    pub half_open_max: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BalancerSettings {
    /// Virtual nodes per backend on the consistent-hash ring.
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProxySettings {
    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CorsSettings {
    #[serde(default = "default_cors_origin")]
    pub allowed_origin: String,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: String,
    #[serde(default = "default_cors_headers")]
    pub allowed_headers: String,
    /// Access-Control-Max-Age in seconds.
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

fn default_version() -> u8 {
    1
}

fn default_weight() -> u32 {
    1
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_max_requests() -> u64 {
    50
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_bucket_capacity() -> f64 {
    20.0
}

fn default_refill_per_sec() -> f64 {
    5.0
}

fn default_leak_per_sec() -> f64 {
    5.0
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_monitor_window_ms() -> u64 {
    10_000
}

fn default_reset_timeout_ms() -> u64 {
    15_000
}

fn default_half_open_max() -> u32 {
    1
}

fn default_virtual_nodes() -> u32 {
    150
}

fn default_upstream_timeout_ms() -> u64 {
    5_000
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_cors_methods() -> String {
    "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string()
}

fn default_cors_headers() -> String {
    "Content-Type, Authorization, X-Requested-With".to_string()
}

fn default_cors_max_age() -> u64 {
    86_400
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            name: "api-1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9101,
            weight: 3,
        },
        BackendConfig {
            name: "api-2".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9102,
            weight: 2,
        },
        BackendConfig {
            name: "api-3".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9103,
            weight: 1,
        },
    ]
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            bucket_capacity: default_bucket_capacity(),
            refill_per_sec: default_refill_per_sec(),
            leak_capacity: default_bucket_capacity(),
            leak_per_sec: default_leak_per_sec(),
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            monitor_window_ms: default_monitor_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max: default_half_open_max(),
        }
    }
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            upstream_timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origin: default_cors_origin(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
            max_age_secs: default_cors_max_age(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerSettings::default(),
            backends: default_backends(),
            rate_limit: RateLimitSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            load_balancer: BalancerSettings::default(),
            proxy: ProxySettings::default(),
            cors: CorsSettings::default(),
        }
    }
}

impl Settings {
    /// Validates the configuration for correctness before startup.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message when:
    /// - the backend pool is empty or contains duplicate names
    /// - a backend has an empty host, a scheme-prefixed host, port 0 or weight 0
    /// - a rate-limit window, ceiling or rate is zero/non-positive
    /// - the breaker threshold or one of its windows is zero
    /// - the consistent-hash ring would have no virtual nodes
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("At least one backend must be configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for config in &self.backends {
            if !seen.insert(config.name.as_str()) {
                return Err(format!("Duplicate backend name: {}", config.name));
            }
            crate::models::backend::Backend::new(
                config.name.clone(),
                config.host.clone(),
                config.port,
                config.weight,
            )
            .validate()?;
        }

        if self.rate_limit.max_requests == 0 {
            return Err("rate_limit.max_requests must be at least 1".to_string());
        }
        if self.rate_limit.window_ms == 0 {
            return Err("rate_limit.window_ms must be non-zero".to_string());
        }
        if self.rate_limit.bucket_capacity < 1.0 || self.rate_limit.leak_capacity < 1.0 {
            return Err("bucket capacities must be at least 1".to_string());
        }
        if self.rate_limit.refill_per_sec <= 0.0 || self.rate_limit.leak_per_sec <= 0.0 {
            return Err("bucket rates must be positive".to_string());
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.circuit_breaker.monitor_window_ms == 0 || self.circuit_breaker.reset_timeout_ms == 0
        {
            return Err("circuit breaker windows must be non-zero".to_string());
        }
        if self.circuit_breaker.half_open_max == 0 {
            return Err("circuit_breaker.half_open_max must be at least 1".to_string());
        }

        if self.load_balancer.virtual_nodes == 0 {
            return Err("load_balancer.virtual_nodes must be at least 1".to_string());
        }

        if self.proxy.upstream_timeout_ms == 0 {
            return Err("proxy.upstream_timeout_ms must be non-zero".to_string());
        }

        Ok(())
    }
}
