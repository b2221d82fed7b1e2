//! Tests for the rate limiting algorithm family.

use std::sync::Arc;

use portcullis_rs::services::rate_limiter::{
    FixedWindowLimiter, LeakyBucketLimiter, RateLimiter, RateLimiterFactory, SlidingCounterLimiter,
    SlidingLogLimiter, TokenBucketLimiter,
};
use portcullis_rs::models::settings::RateLimitSettings;
use portcullis_rs::utils::clock::{Clock, ManualClock};

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new())
}

#[test]
fn fixed_window_admits_up_to_the_ceiling() {
    let clock = manual_clock();
    let limiter = FixedWindowLimiter::new(50, 60_000, clock.clone());

    for i in 0..50 {
        let decision = limiter.consume("client");
        assert!(decision.allowed, "request {} should be admitted", i + 1);
        assert_eq!(decision.limit, 50);
        assert_eq!(decision.remaining, 50 - (i + 1));
    }

    // Request 51 inside the same window is denied.
    let denied = limiter.consume("client");
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    // The window ends at 60 000 ms, so a full 60 seconds remain.
    assert_eq!(denied.retry_after, Some(60));
}

#[test]
fn fixed_window_resets_at_the_boundary() {
    let clock = manual_clock();
    let limiter = FixedWindowLimiter::new(2, 1_000, clock.clone());

    assert!(limiter.consume("k").allowed);
    assert!(limiter.consume("k").allowed);
    assert!(!limiter.consume("k").allowed);

    clock.set(1_000);
    let fresh = limiter.consume("k");
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 1);
}

#[test]
fn fixed_window_retry_after_shrinks_with_elapsed_time() {
    let clock = manual_clock();
    let limiter = FixedWindowLimiter::new(1, 60_000, clock.clone());

    clock.set(45_500);
    assert!(limiter.consume("k").allowed);
    let denied = limiter.consume("k");
    // 14 500 ms remain in the window, rounded up to 15 seconds.
    assert_eq!(denied.retry_after, Some(15));
}

#[test]
fn sliding_log_denies_while_window_is_full() {
    let clock = manual_clock();
    let limiter = SlidingLogLimiter::new(3, 10_000, clock.clone());

    assert!(limiter.consume("k").allowed);
    clock.advance(1_000);
    assert!(limiter.consume("k").allowed);
    clock.advance(1_000);
    assert!(limiter.consume("k").allowed);

    let denied = limiter.consume("k");
    assert!(!denied.allowed);
    // The oldest entry is at t=0, the window ends at t=10 000, now is 2 000.
    assert_eq!(denied.retry_after, Some(8));

    // Once the oldest timestamp ages out, one slot opens up.
    clock.set(10_000);
    let admitted = limiter.consume("k");
    assert!(admitted.allowed);
    assert_eq!(admitted.remaining, 0);
}

#[test]
fn sliding_log_recovers_fully_after_idle_window() {
    let clock = manual_clock();
    let limiter = SlidingLogLimiter::new(5, 10_000, clock.clone());

    for _ in 0..5 {
        assert!(limiter.consume("k").allowed);
    }
    assert!(!limiter.consume("k").allowed);

    clock.advance(10_000);
    let decision = limiter.consume("k");
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 4);
}

#[test]
fn sliding_counter_weighs_the_previous_window() {
    let clock = manual_clock();
    let limiter = SlidingCounterLimiter::new(10, 10_000, clock.clone());

    for _ in 0..10 {
        assert!(limiter.consume("k").allowed);
    }
    assert!(!limiter.consume("k").allowed);

    // Halfway through the next window the previous 10 requests still count
    // for floor(10 * 0.5) = 5, leaving room for 5 more.
    clock.set(15_000);
    let decision = limiter.consume("k");
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 4);

    for _ in 0..4 {
        assert!(limiter.consume("k").allowed);
    }
    let denied = limiter.consume("k");
    assert!(!denied.allowed);
    // 5 000 ms remain in the current window.
    assert_eq!(denied.retry_after, Some(5));
}

#[test]
fn sliding_counter_clears_after_a_gap_of_two_windows() {
    let clock = manual_clock();
    let limiter = SlidingCounterLimiter::new(3, 1_000, clock.clone());

    for _ in 0..3 {
        assert!(limiter.consume("k").allowed);
    }
    assert!(!limiter.consume("k").allowed);

    clock.set(5_000);
    let decision = limiter.consume("k");
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 2);
}

#[test]
fn token_bucket_allows_a_burst_then_denies() {
    let clock = manual_clock();
    let limiter = TokenBucketLimiter::new(20.0, 5.0, clock.clone());

    // A fresh key starts with a full bucket: 20 immediate requests pass.
    for i in 0..20 {
        let decision = limiter.consume("k");
        assert!(decision.allowed, "request {} should be admitted", i + 1);
        assert_eq!(decision.limit, 20);
    }

    let denied = limiter.consume("k");
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(1));
    assert_eq!(denied.remaining, 0);
}

#[test]
fn token_bucket_refills_at_the_configured_rate() {
    let clock = manual_clock();
    let limiter = TokenBucketLimiter::new(20.0, 5.0, clock.clone());

    for _ in 0..20 {
        assert!(limiter.consume("k").allowed);
    }
    assert!(!limiter.consume("k").allowed);

    // One second at 5 tokens/s buys exactly five more requests.
    clock.advance(1_000);
    for i in 0..5 {
        assert!(limiter.consume("k").allowed, "refilled request {}", i + 1);
    }
    assert!(!limiter.consume("k").allowed);
}

#[test]
fn token_bucket_caps_refill_at_capacity() {
    let clock = manual_clock();
    let limiter = TokenBucketLimiter::new(3.0, 1.0, clock.clone());

    for _ in 0..3 {
        assert!(limiter.consume("k").allowed);
    }

    // A long idle period refills to capacity, not beyond.
    clock.advance(3_600_000);
    for _ in 0..3 {
        assert!(limiter.consume("k").allowed);
    }
    assert!(!limiter.consume("k").allowed);
}

#[test]
fn leaky_bucket_fills_and_drains() {
    let clock = manual_clock();
    let limiter = LeakyBucketLimiter::new(20.0, 5.0, clock.clone());

    for i in 0..20 {
        let decision = limiter.consume("k");
        assert!(decision.allowed, "request {} should be admitted", i + 1);
    }

    let denied = limiter.consume("k");
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(1));

    // One second drains five queue slots.
    clock.advance(1_000);
    for _ in 0..5 {
        assert!(limiter.consume("k").allowed);
    }
    assert!(!limiter.consume("k").allowed);
}

#[test]
fn leaky_bucket_reports_floor_of_free_capacity() {
    let clock = manual_clock();
    let limiter = LeakyBucketLimiter::new(5.0, 1.0, clock.clone());

    let first = limiter.consume("k");
    assert!(first.allowed);
    assert_eq!(first.remaining, 4);

    clock.advance(500);
    // Queue is 0.5 after draining; adding one leaves 3.5 free.
    let second = limiter.consume("k");
    assert!(second.allowed);
    assert_eq!(second.remaining, 3);
}

#[test]
fn limiters_partition_by_client_key() {
    let clock = manual_clock();
    let limiter = FixedWindowLimiter::new(1, 60_000, clock.clone());

    assert!(limiter.consume("alice").allowed);
    assert!(!limiter.consume("alice").allowed);
    // A different key is an independent partition.
    assert!(limiter.consume("bob").allowed);
}

#[test]
fn denied_decisions_always_carry_a_positive_retry_after() {
    let clock = manual_clock();
    let limiters: Vec<Box<dyn RateLimiter>> = vec![
        Box::new(FixedWindowLimiter::new(1, 500, clock.clone())),
        Box::new(SlidingLogLimiter::new(1, 500, clock.clone())),
        Box::new(SlidingCounterLimiter::new(1, 500, clock.clone())),
        Box::new(TokenBucketLimiter::new(1.0, 10.0, clock.clone())),
        Box::new(LeakyBucketLimiter::new(1.0, 10.0, clock.clone())),
    ];

    for limiter in &limiters {
        assert!(limiter.consume("k").allowed, "{} first", limiter.name());
        let denied = limiter.consume("k");
        assert!(!denied.allowed, "{} second", limiter.name());
        assert_eq!(denied.remaining, 0, "{}", limiter.name());
        assert!(
            denied.retry_after.unwrap() >= 1,
            "{} retry_after must be >= 1",
            limiter.name()
        );
    }
}

#[test]
fn factory_builds_the_whole_family_in_registry_order() {
    let clock: Arc<dyn Clock> = manual_clock();
    let limiters = RateLimiterFactory::create_all(&RateLimitSettings::default(), clock);
    let names: Vec<&str> = limiters.iter().map(|l| l.name()).collect();
    assert_eq!(
        names,
        vec![
            "fixed-window",
            "sliding-log",
            "sliding-counter",
            "token-bucket",
            "leaky-bucket"
        ]
    );
}
