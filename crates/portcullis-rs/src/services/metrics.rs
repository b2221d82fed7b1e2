//! In-process request counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe aggregate counters for the gateway.
///
/// All counters are monotonic `AtomicU64`s updated with relaxed ordering
/// from the pipeline stages; they reset only through the control surface.
/// The per-backend map is fixed at startup because the pool is, so lookups
/// are lock-free.
#[derive(Debug)]
pub struct GatewayMetrics {
    total_requests: AtomicU64,
    rate_limited: AtomicU64,
    circuit_broken: AtomicU64,
    proxied: AtomicU64,
    errors: AtomicU64,
    by_backend: HashMap<String, AtomicU64>,
}

/// Point-in-time copy of the counters for JSON endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub rate_limited: u64,
    pub circuit_broken: u64,
    pub proxied: u64,
    pub errors: u64,
    pub by_backend: HashMap<String, u64>,
}

impl GatewayMetrics {
    pub fn new(backend_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            circuit_broken: AtomicU64::new(0),
            proxied: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            by_backend: backend_names
                .into_iter()
                .map(|name| (name, AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Counts one inbound request; called once per request by the log stage.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_broken(&self) {
        self.circuit_broken.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request handed to the proxy stage, attributed to `backend`.
    pub fn record_proxied(&self, backend: &str) {
        self.proxied.fetch_add(1, Ordering::Relaxed);
        if let Some(count) = self.by_backend.get(backend) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts an upstream transport error, timeout, or internal failure.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests routed to one backend so far.
    pub fn backend_count(&self, backend: &str) -> u64 {
        self.by_backend
            .get(backend)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.rate_limited.store(0, Ordering::Relaxed);
        self.circuit_broken.store(0, Ordering::Relaxed);
        self.proxied.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        for count in self.by_backend.values() {
            count.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_broken: self.circuit_broken.load(Ordering::Relaxed),
            proxied: self.proxied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            by_backend: self
                .by_backend
                .iter()
                .map(|(name, count)| (name.clone(), count.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}
