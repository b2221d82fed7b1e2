//! Rate limiting algorithms behind a uniform trait.
//!
//! Five independently selectable algorithms share the [`RateLimiter`]
//! contract: fixed window, sliding log, sliding counter, token bucket and
//! leaky bucket. Each keeps its own per-client-key state behind a mutex so
//! the read-or-create, arithmetic update and decision happen in one critical
//! section; two concurrent requests for the same key can never both be
//! admitted past the ceiling through a lost update.
//!
//! All window arithmetic runs on the injected [`Clock`], so tests advance
//! time explicitly instead of sleeping.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::models::settings::RateLimitSettings;
use crate::utils::clock::Clock;

/// Outcome of a single `consume` call.
///
/// `limit` and `remaining` are advisory and surface verbatim in the
/// `X-RateLimit-*` response headers. `retry_after` is present exactly when
/// the request was denied and is always at least 1 second.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    fn allow(limit: u64, remaining: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: None,
        }
    }

    fn deny(limit: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: Some(retry_after.max(1)),
        }
    }
}

/// Admission decision for a client key.
///
/// Implementations must be safe to call concurrently from many request
/// handlers and must not block on I/O. Implementations never share state
/// with each other; swapping the active algorithm starts the new one from
/// whatever state it has independently accumulated.
pub trait RateLimiter: Send + Sync {
    /// Registry name, also reported in `X-RateLimit-Algorithm`.
    fn name(&self) -> &'static str;

    /// Decides whether one more request from `key` is admitted right now.
    fn consume(&self, key: &str) -> RateLimitDecision;
}

/// Whole seconds until `delta_ms` elapses, rounded up, floored at 1.
fn retry_after_secs(delta_ms: u64) -> u64 {
    ((delta_ms + 999) / 1000).max(1)
}

// ---------------------------------------------------------------------------
// Fixed window
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FixedWindowSlot {
    count: u64,
    expires_at: u64,
}

#[derive(Debug)]
struct FixedWindowStore {
    slots: HashMap<String, FixedWindowSlot>,
    last_sweep: u64,
}

/// Fixed aligned windows of length W.
///
/// The window index is `floor(now / W)`; each key holds a counter and the
/// window expiry `(index + 1) * W`. The first request of a window counts as
/// 1, so an admitted fresh key reports `remaining = max - 1`.
///
/// Known weakness, kept deliberately: a client can burst `max` requests at
/// the end of one window and `max` more at the start of the next, doubling
/// the apparent rate across the boundary. The sliding algorithms exist for
/// callers that care.
pub struct FixedWindowLimiter {
    max_requests: u64,
    window_ms: u64,
    store: Mutex<FixedWindowStore>,
    clock: Arc<dyn Clock>,
}

/// How often the fixed-window map drops expired slots.
const SWEEP_INTERVAL_MS: u64 = 300_000;

impl FixedWindowLimiter {
    pub fn new(max_requests: u64, window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window_ms,
            store: Mutex::new(FixedWindowStore {
                slots: HashMap::new(),
                last_sweep: 0,
            }),
            clock,
        }
    }

    fn sweep(store: &mut FixedWindowStore, now: u64) {
        if now.saturating_sub(store.last_sweep) < SWEEP_INTERVAL_MS {
            return;
        }
        let before = store.slots.len();
        store.slots.retain(|_, slot| slot.expires_at > now);
        store.last_sweep = now;
        debug!(
            "fixed-window sweep: {} of {} entries retained",
            store.slots.len(),
            before
        );
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn name(&self) -> &'static str {
        "fixed-window"
    }

    fn consume(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let mut store = self.store.lock().unwrap();
        Self::sweep(&mut store, now);

        let window_ms = self.window_ms;
        let slot = store
            .slots
            .entry(key.to_string())
            .or_insert_with(|| FixedWindowSlot {
                count: 0,
                expires_at: (now / window_ms + 1) * window_ms,
            });

        if now >= slot.expires_at {
            slot.count = 0;
            slot.expires_at = (now / window_ms + 1) * window_ms;
        }

        slot.count += 1;
        if slot.count > self.max_requests {
            return RateLimitDecision::deny(
                self.max_requests,
                retry_after_secs(slot.expires_at - now),
            );
        }

        RateLimitDecision::allow(self.max_requests, self.max_requests - slot.count)
    }
}

// ---------------------------------------------------------------------------
// Sliding log
// ---------------------------------------------------------------------------

/// Exact sliding window over a per-key log of request timestamps.
///
/// Memory is O(requests in window) per key, the price of exactness. Entries
/// older than `now - W` are dropped before every decision.
pub struct SlidingLogLimiter {
    max_requests: u64,
    window_ms: u64,
    logs: Mutex<HashMap<String, VecDeque<u64>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingLogLimiter {
    pub fn new(max_requests: u64, window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window_ms,
            logs: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl RateLimiter for SlidingLogLimiter {
    fn name(&self) -> &'static str {
        "sliding-log"
    }

    fn consume(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let mut logs = self.logs.lock().unwrap();
        let log = logs.entry(key.to_string()).or_default();

        while let Some(&oldest) = log.front() {
            if oldest + self.window_ms <= now {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() as u64 >= self.max_requests {
            // front() is non-empty here because max_requests >= 1.
            let oldest = *log.front().unwrap();
            return RateLimitDecision::deny(
                self.max_requests,
                retry_after_secs(oldest + self.window_ms - now),
            );
        }

        log.push_back(now);
        RateLimitDecision::allow(self.max_requests, self.max_requests - log.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Sliding counter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SlidingCounterSlot {
    window_index: u64,
    current: u64,
    previous: u64,
}

/// Two-bucket approximation of a sliding window.
///
/// Keeps counters for the current and previous aligned windows and weights
/// the previous one by how much of it still overlaps the trailing window:
/// `estimate = floor(previous * (1 - elapsed/W)) + current`. O(1) per key
/// with accuracy close to the sliding log for smooth traffic.
pub struct SlidingCounterLimiter {
    max_requests: u64,
    window_ms: u64,
    slots: Mutex<HashMap<String, SlidingCounterSlot>>,
    clock: Arc<dyn Clock>,
}

impl SlidingCounterLimiter {
    pub fn new(max_requests: u64, window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window_ms,
            slots: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl RateLimiter for SlidingCounterLimiter {
    fn name(&self) -> &'static str {
        "sliding-counter"
    }

    fn consume(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let index = now / self.window_ms;
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| SlidingCounterSlot {
                window_index: index,
                current: 0,
                previous: 0,
            });

        if index != slot.window_index {
            // Rotate: the stored current becomes previous only when we moved
            // exactly one window forward; a larger gap clears both.
            slot.previous = if index == slot.window_index + 1 {
                slot.current
            } else {
                0
            };
            slot.current = 0;
            slot.window_index = index;
        }

        let elapsed = now - index * self.window_ms;
        let prev_weight = 1.0 - elapsed as f64 / self.window_ms as f64;
        let estimate = (slot.previous as f64 * prev_weight).floor() as u64 + slot.current;

        if estimate >= self.max_requests {
            return RateLimitDecision::deny(
                self.max_requests,
                retry_after_secs(self.window_ms - elapsed),
            );
        }

        slot.current += 1;
        RateLimitDecision::allow(self.max_requests, self.max_requests - estimate - 1)
    }
}

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TokenBucketSlot {
    tokens: f64,
    last_refill: u64,
}

/// Token bucket: continuous refill, bursts up to capacity.
///
/// A fresh key starts with a full bucket, so this is the only algorithm that
/// admits `capacity` back-to-back requests from a cold start.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, TokenBucketSlot>>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn name(&self) -> &'static str {
        "token-bucket"
    }

    fn consume(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let capacity = self.capacity;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucketSlot {
                tokens: capacity,
                last_refill: now,
            });

        let elapsed_secs = (now - bucket.last_refill) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed_secs * self.refill_per_sec).min(capacity);
        bucket.last_refill = now;

        let limit = capacity as u64;
        if bucket.tokens < 1.0 {
            let wait_secs = ((1.0 - bucket.tokens) / self.refill_per_sec).ceil() as u64;
            return RateLimitDecision::deny(limit, wait_secs);
        }

        bucket.tokens -= 1.0;
        RateLimitDecision::allow(limit, bucket.tokens.floor() as u64)
    }
}

// ---------------------------------------------------------------------------
// Leaky bucket
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LeakyBucketSlot {
    queue_size: f64,
    last_leak: u64,
}

/// Leaky bucket: a virtual queue drained at a constant rate.
///
/// Unlike the token bucket there is no burst credit; a cold key still only
/// has `capacity` queue slots and each request occupies one until it drains.
pub struct LeakyBucketLimiter {
    capacity: f64,
    leak_per_sec: f64,
    buckets: Mutex<HashMap<String, LeakyBucketSlot>>,
    clock: Arc<dyn Clock>,
}

impl LeakyBucketLimiter {
    pub fn new(capacity: f64, leak_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            leak_per_sec,
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl RateLimiter for LeakyBucketLimiter {
    fn name(&self) -> &'static str {
        "leaky-bucket"
    }

    fn consume(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| LeakyBucketSlot {
                queue_size: 0.0,
                last_leak: now,
            });

        let elapsed_secs = (now - bucket.last_leak) as f64 / 1000.0;
        bucket.queue_size = (bucket.queue_size - elapsed_secs * self.leak_per_sec).max(0.0);
        bucket.last_leak = now;

        let limit = self.capacity as u64;
        if bucket.queue_size >= self.capacity {
            let overflow = bucket.queue_size - self.capacity + 1.0;
            let wait_secs = (overflow / self.leak_per_sec).ceil() as u64;
            return RateLimitDecision::deny(limit, wait_secs);
        }

        bucket.queue_size += 1.0;
        RateLimitDecision::allow(limit, (self.capacity - bucket.queue_size).floor() as u64)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds one instance of every algorithm from the shared settings.
pub struct RateLimiterFactory;

impl RateLimiterFactory {
    /// Creates the full family in registry order. The first entry
    /// (fixed-window) is the startup default.
    pub fn create_all(
        settings: &RateLimitSettings,
        clock: Arc<dyn Clock>,
    ) -> Vec<Arc<dyn RateLimiter>> {
        vec![
            Arc::new(FixedWindowLimiter::new(
                settings.max_requests,
                settings.window_ms,
                clock.clone(),
            )),
            Arc::new(SlidingLogLimiter::new(
                settings.max_requests,
                settings.window_ms,
                clock.clone(),
            )),
            Arc::new(SlidingCounterLimiter::new(
                settings.max_requests,
                settings.window_ms,
                clock.clone(),
            )),
            Arc::new(TokenBucketLimiter::new(
                settings.bucket_capacity,
                settings.refill_per_sec,
                clock.clone(),
            )),
            Arc::new(LeakyBucketLimiter::new(
                settings.leak_capacity,
                settings.leak_per_sec,
                clock,
            )),
        ]
    }
}
