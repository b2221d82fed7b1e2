//! Load balancing strategies for distributing requests across the backend pool.
//!
//! Five strategies share the [`LoadBalancer`] contract: round-robin, weighted
//! round-robin, least-connections, IP-hash and consistent-hash. Selection
//! only ever returns backends whose healthy flag is set and whose name is not
//! in the caller's `excluded` set; the selection stage uses the excluded set
//! to skip backends whose circuit breakers refused the current request, so a
//! deterministic strategy cannot spin on the same refused target.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::info;

use crate::models::backend::Backend;
use crate::utils::hash::{client_key_hash, fnv1a_32};

/// Load balancer trait for selecting backends.
///
/// Implementations own their backend list (refreshed through
/// [`update_backends`](LoadBalancer::update_backends) when the control
/// surface toggles a healthy flag) and any derived structures such as the
/// weighted expansion or the hash ring.
pub trait LoadBalancer: Send + Sync {
    /// Registry name, also reported in the `x-lb-algorithm` header.
    fn name(&self) -> &'static str;

    /// Selects a backend for a request.
    ///
    /// # Parameters
    ///
    /// * `client_key` - Partition key for the hashing strategies
    /// * `excluded` - Backend names already refused for this request
    ///
    /// # Returns
    ///
    /// A healthy, non-excluded backend, or `None` if no backend qualifies.
    fn select(&self, client_key: Option<&str>, excluded: &[String]) -> Option<Arc<Backend>>;

    /// Releases whatever `select` acquired for `backend`.
    ///
    /// Callers must invoke this exactly once per successful `select`, on
    /// every terminal path. Only least-connections does real work here.
    fn completed(&self, _backend: &Backend) {}

    /// Replaces the backend list and rebuilds derived structures.
    fn update_backends(&self, _backends: &[Arc<Backend>]) {}
}

/// Healthy, non-excluded backends in registry order.
fn eligible(backends: &[Arc<Backend>], excluded: &[String]) -> Vec<Arc<Backend>> {
    backends
        .iter()
        .filter(|backend| backend.is_healthy() && !excluded.iter().any(|n| n == &backend.name))
        .cloned()
        .collect()
}

/// Round-robin load balancer.
///
/// Advances a monotonic counter on every selection and reduces it modulo the
/// eligible count. Ignores weight; best when backends have similar capacity.
pub struct RoundRobinBalancer {
    backends: RwLock<Vec<Arc<Backend>>>,
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            backends: RwLock::new(backends),
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, _client_key: Option<&str>, excluded: &[String]) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap();
        let pool = eligible(&backends, excluded);
        if pool.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(pool[index].clone())
    }

    fn update_backends(&self, backends: &[Arc<Backend>]) {
        *self.backends.write().unwrap() = backends.to_vec();
    }
}

/// Weighted round-robin load balancer.
///
/// Expands the healthy pool into a list where each backend appears `weight`
/// times, then round-robins over the expansion. With weights {3,2,1} the
/// expansion is `[A, A, A, B, B, C]`, i.e. half the traffic goes to A.
///
/// The expansion is rebuilt when the backend set or its healthy flags change
/// rather than on every request, keeping selection O(eligible).
pub struct WeightedRoundRobinBalancer {
    expanded: RwLock<Vec<Arc<Backend>>>,
    counter: AtomicUsize,
}

impl WeightedRoundRobinBalancer {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            expanded: RwLock::new(Self::build_expanded(&backends)),
            counter: AtomicUsize::new(0),
        }
    }

    /// Expanded list over healthy backends; length equals the weight sum.
    fn build_expanded(backends: &[Arc<Backend>]) -> Vec<Arc<Backend>> {
        let mut expanded = Vec::new();
        for backend in backends.iter().filter(|b| b.is_healthy()) {
            for _ in 0..backend.weight {
                expanded.push(backend.clone());
            }
        }
        expanded
    }
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn name(&self) -> &'static str {
        "weighted-round-robin"
    }

    fn select(&self, _client_key: Option<&str>, excluded: &[String]) -> Option<Arc<Backend>> {
        let expanded = self.expanded.read().unwrap();
        // Entries can go stale between a health flip and the update_backends
        // that follows it, so eligibility is re-checked here.
        let pool = eligible(&expanded, excluded);
        if pool.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(pool[index].clone())
    }

    fn update_backends(&self, backends: &[Arc<Backend>]) {
        *self.expanded.write().unwrap() = Self::build_expanded(backends);
    }
}

/// Least-connections load balancer.
///
/// Tracks active requests per backend (keyed by `host:port`) and picks the
/// eligible backend with the lowest count, first wins on ties. The count is
/// incremented inside `select` and released by `completed`, so the two must
/// pair exactly; the decrement clamps at zero to survive a stray release.
///
/// Selection and completion share one mutex, making them atomic relative to
/// each other.
pub struct LeastConnectionsBalancer {
    backends: RwLock<Vec<Arc<Backend>>>,
    connections: Mutex<HashMap<String, u64>>,
}

impl LeastConnectionsBalancer {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            backends: RwLock::new(backends),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Current active count for a backend, for tests and the health snapshot.
    pub fn active_connections(&self, backend: &Backend) -> u64 {
        let connections = self.connections.lock().unwrap();
        connections.get(&backend.authority()).copied().unwrap_or(0)
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn name(&self) -> &'static str {
        "least-connections"
    }

    fn select(&self, _client_key: Option<&str>, excluded: &[String]) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap();
        let pool = eligible(&backends, excluded);
        if pool.is_empty() {
            return None;
        }

        let mut connections = self.connections.lock().unwrap();
        let mut chosen = pool[0].clone();
        let mut lowest = connections.get(&chosen.authority()).copied().unwrap_or(0);
        for backend in pool.iter().skip(1) {
            let count = connections.get(&backend.authority()).copied().unwrap_or(0);
            if count < lowest {
                chosen = backend.clone();
                lowest = count;
            }
        }

        *connections.entry(chosen.authority()).or_insert(0) += 1;
        Some(chosen)
    }

    fn completed(&self, backend: &Backend) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(count) = connections.get_mut(&backend.authority()) {
            *count = count.saturating_sub(1);
        }
    }

    fn update_backends(&self, backends: &[Arc<Backend>]) {
        *self.backends.write().unwrap() = backends.to_vec();
    }
}

/// IP-hash load balancer.
///
/// Reduces a rolling polynomial hash of the client key modulo the eligible
/// count, so a given client sticks to one backend for as long as the
/// eligible set is stable. Falls back to the first eligible backend when the
/// request carries no client key.
pub struct IpHashBalancer {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl IpHashBalancer {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        Self {
            backends: RwLock::new(backends),
        }
    }
}

impl LoadBalancer for IpHashBalancer {
    fn name(&self) -> &'static str {
        "ip-hash"
    }

    fn select(&self, client_key: Option<&str>, excluded: &[String]) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap();
        let pool = eligible(&backends, excluded);
        if pool.is_empty() {
            return None;
        }

        let index = match client_key {
            Some(key) => client_key_hash(key) as usize % pool.len(),
            None => 0,
        };
        Some(pool[index].clone())
    }

    fn update_backends(&self, backends: &[Arc<Backend>]) {
        *self.backends.write().unwrap() = backends.to_vec();
    }
}

/// Consistent-hash load balancer.
///
/// Each healthy backend contributes `virtual_nodes` positions on a ring,
/// labelled `host:port:vnode<i>` and placed at the label's 32-bit FNV-1a
/// hash. Selection hashes the client key with the same function, binary
/// searches for the first position at or past the hash (wrapping to the
/// start of the ring) and walks forward past entries whose backend is no
/// longer eligible.
///
/// Removing one of N backends only re-routes the keys whose positions that
/// backend owned, roughly 1/N of them, which is the point of the ring over
/// the plain modulo of [`IpHashBalancer`].
pub struct ConsistentHashBalancer {
    backends: RwLock<Vec<Arc<Backend>>>,
    ring: RwLock<Vec<(u32, Arc<Backend>)>>,
    virtual_nodes: u32,
}

impl ConsistentHashBalancer {
    pub fn new(backends: Vec<Arc<Backend>>, virtual_nodes: u32) -> Self {
        let ring = Self::build_ring(&backends, virtual_nodes);
        Self {
            backends: RwLock::new(backends),
            ring: RwLock::new(ring),
            virtual_nodes,
        }
    }

    fn build_ring(backends: &[Arc<Backend>], virtual_nodes: u32) -> Vec<(u32, Arc<Backend>)> {
        let mut ring = Vec::with_capacity(backends.len() * virtual_nodes as usize);
        for backend in backends.iter().filter(|b| b.is_healthy()) {
            for vnode in 0..virtual_nodes {
                let label = format!("{}:{}:vnode{}", backend.host, backend.port, vnode);
                ring.push((fnv1a_32(&label), backend.clone()));
            }
        }
        ring.sort_by_key(|(position, _)| *position);
        ring
    }

    /// Ring size, exposed for tests.
    pub fn ring_len(&self) -> usize {
        self.ring.read().unwrap().len()
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn name(&self) -> &'static str {
        "consistent-hash"
    }

    fn select(&self, client_key: Option<&str>, excluded: &[String]) -> Option<Arc<Backend>> {
        let ring = self.ring.read().unwrap();
        if ring.is_empty() {
            return None;
        }

        let Some(key) = client_key else {
            let backends = self.backends.read().unwrap();
            return eligible(&backends, excluded).first().cloned();
        };

        let hash = fnv1a_32(key);
        let start = ring.partition_point(|(position, _)| *position < hash);
        for offset in 0..ring.len() {
            let (_, backend) = &ring[(start + offset) % ring.len()];
            if backend.is_healthy() && !excluded.iter().any(|n| n == &backend.name) {
                return Some(backend.clone());
            }
        }

        None
    }

    fn update_backends(&self, backends: &[Arc<Backend>]) {
        let ring = Self::build_ring(backends, self.virtual_nodes);
        *self.backends.write().unwrap() = backends.to_vec();
        *self.ring.write().unwrap() = ring;
        info!(
            "consistent-hash ring rebuilt with {} positions",
            self.ring.read().unwrap().len()
        );
    }
}

/// Builds one instance of every strategy over the shared backend pool.
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    /// Creates the full family in registry order. The first entry
    /// (round-robin) is the startup default.
    pub fn create_all(
        backends: &[Arc<Backend>],
        virtual_nodes: u32,
    ) -> Vec<Arc<dyn LoadBalancer>> {
        vec![
            Arc::new(RoundRobinBalancer::new(backends.to_vec())),
            Arc::new(WeightedRoundRobinBalancer::new(backends.to_vec())),
            Arc::new(LeastConnectionsBalancer::new(backends.to_vec())),
            Arc::new(IpHashBalancer::new(backends.to_vec())),
            Arc::new(ConsistentHashBalancer::new(backends.to_vec(), virtual_nodes)),
        ]
    }
}
