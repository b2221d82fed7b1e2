//! The process-wide gateway value.
//!
//! One [`Gateway`] owns everything the request pipeline and control surface
//! share: the backend registry, one circuit breaker per backend, one
//! instance of each rate-limiting and load-balancing algorithm, the
//! atomically swappable active-algorithm selectors, and the aggregate
//! metrics. The server entry point builds it once and threads `Arc<Gateway>`
//! into the pipeline stages and route handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use log::info;

use crate::models::backend::Backend;
use crate::models::settings::Settings;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::services::load_balancer::{LoadBalancer, LoadBalancerFactory};
use crate::services::metrics::GatewayMetrics;
use crate::services::rate_limiter::{RateLimiter, RateLimiterFactory};
use crate::utils::clock::{Clock, MonotonicClock};

/// Shared gateway state.
///
/// The registries are fixed at startup; only the active selectors, the
/// backend healthy flags and the breaker/limiter internals mutate at
/// runtime. Selector swaps replace the inner `Arc` behind an `RwLock`, so a
/// request that already cloned the active instance keeps using it while new
/// requests observe the replacement.
pub struct Gateway {
    backends: Vec<Arc<Backend>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    limiters: Vec<Arc<dyn RateLimiter>>,
    balancers: Vec<Arc<dyn LoadBalancer>>,
    active_limiter: RwLock<Arc<dyn RateLimiter>>,
    active_balancer: RwLock<Arc<dyn LoadBalancer>>,
    metrics: GatewayMetrics,
    settings: Settings,
    started_at: Instant,
}

impl Gateway {
    /// Builds the gateway from validated settings with the production clock.
    pub fn new(settings: Settings) -> Arc<Self> {
        Self::with_clock(settings, Arc::new(MonotonicClock::new()))
    }

    /// Builds the gateway with an explicit clock; tests inject a manual one.
    pub fn with_clock(settings: Settings, clock: Arc<dyn Clock>) -> Arc<Self> {
        let backends: Vec<Arc<Backend>> = settings
            .backends
            .iter()
            .map(|config| {
                Arc::new(Backend::new(
                    config.name.clone(),
                    config.host.clone(),
                    config.port,
                    config.weight,
                ))
            })
            .collect();

        let breaker_config = CircuitBreakerConfig::from(&settings.circuit_breaker);
        let breakers: HashMap<String, Arc<CircuitBreaker>> = backends
            .iter()
            .map(|backend| {
                (
                    backend.name.clone(),
                    CircuitBreaker::new(
                        backend.name.clone(),
                        breaker_config.clone(),
                        clock.clone(),
                    ),
                )
            })
            .collect();

        let limiters = RateLimiterFactory::create_all(&settings.rate_limit, clock);
        let balancers =
            LoadBalancerFactory::create_all(&backends, settings.load_balancer.virtual_nodes);

        info!(
            "gateway initialised: {} backends, {} rate limiters, {} load balancers",
            backends.len(),
            limiters.len(),
            balancers.len()
        );

        let active_limiter = RwLock::new(limiters[0].clone());
        let active_balancer = RwLock::new(balancers[0].clone());
        let metrics = GatewayMetrics::new(backends.iter().map(|b| b.name.clone()));

        Arc::new(Self {
            backends,
            breakers,
            limiters,
            balancers,
            active_limiter,
            active_balancer,
            metrics,
            settings,
            started_at: Instant::now(),
        })
    }

    /// Seconds since the gateway value was constructed at startup.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|backend| backend.name == name)
    }

    pub fn breaker(&self, backend_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(backend_name).cloned()
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The limiter the rate-limit stage consults right now.
    pub fn active_limiter(&self) -> Arc<dyn RateLimiter> {
        self.active_limiter.read().unwrap().clone()
    }

    /// The balancer the selection stage consults right now.
    pub fn active_balancer(&self) -> Arc<dyn LoadBalancer> {
        self.active_balancer.read().unwrap().clone()
    }

    /// Registered limiter names in registry order.
    pub fn limiter_names(&self) -> Vec<&'static str> {
        self.limiters.iter().map(|l| l.name()).collect()
    }

    /// Registered balancer names in registry order.
    pub fn balancer_names(&self) -> Vec<&'static str> {
        self.balancers.iter().map(|b| b.name()).collect()
    }

    /// Swaps the active rate limiter.
    ///
    /// # Errors
    ///
    /// Returns the unknown name back when no limiter is registered under it.
    pub fn set_rate_limiter(&self, name: &str) -> Result<(), String> {
        let limiter = self
            .limiters
            .iter()
            .find(|limiter| limiter.name() == name)
            .cloned()
            .ok_or_else(|| format!("Unknown rate limiter: {}", name))?;

        *self.active_limiter.write().unwrap() = limiter;
        info!("active rate limiter set to {}", name);
        Ok(())
    }

    /// Swaps the active load balancer.
    pub fn set_load_balancer(&self, name: &str) -> Result<(), String> {
        let balancer = self
            .balancers
            .iter()
            .find(|balancer| balancer.name() == name)
            .cloned()
            .ok_or_else(|| format!("Unknown load balancer: {}", name))?;

        *self.active_balancer.write().unwrap() = balancer;
        info!("active load balancer set to {}", name);
        Ok(())
    }

    /// Flips a backend's healthy flag and propagates the change to every
    /// balancer so derived structures (weighted list, hash ring) rebuild.
    ///
    /// Returns the new flag value, or `None` for an unknown backend.
    pub fn toggle_backend(&self, name: &str) -> Option<bool> {
        let backend = self.backend(name)?;
        let healthy = backend.toggle_healthy();
        info!(
            "backend {} marked {}",
            name,
            if healthy { "healthy" } else { "unhealthy" }
        );

        for balancer in &self.balancers {
            balancer.update_backends(&self.backends);
        }

        Some(healthy)
    }

    /// Forces a breaker back to CLOSED. Returns false for an unknown backend.
    pub fn reset_circuit(&self, backend_name: &str) -> bool {
        match self.breakers.get(backend_name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
