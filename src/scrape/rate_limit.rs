//! Per-provider rate limiting.
//!
//! Every provider gets one [`ProviderLimiter`]: a `governor` token bucket
//! sized from the provider's [`RateLimitPolicy`] plus a backoff deadline set
//! when the provider itself answers "slow down". All jobs of all batches that
//! talk to the same provider share that limiter through a [`RateLimiterSet`].
//!
//! The buckets refill on the wall clock (`governor`'s `DefaultClock`) while
//! waits and backoff deadlines use the tokio clock. Under a paused tokio
//! clock a held call sleeps in virtual time, but the bucket only refills as
//! real time passes, so tests that depend on refills run unpaused.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use reelscrape_common::ProviderName;
use tokio::time::Instant;
use tracing::debug;

use super::provider::{ProviderDescriptor, RateLimitPolicy};

/// Backoff applied when a provider rate-limits us without a `Retry-After` hint.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Result of [`ProviderLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A token was taken; the call may proceed.
    Granted,
    /// No token is available before the given instant.
    MustWaitUntil(Instant),
}

/// Token bucket and backoff state for one provider.
pub struct ProviderLimiter {
    provider: ProviderName,
    bucket: Bucket,
    clock: DefaultClock,
    backoff_until: Mutex<Option<Instant>>,
}

impl ProviderLimiter {
    /// Create a limiter for `provider` with the given policy. Zero values in
    /// the policy are treated as one.
    pub fn new(provider: ProviderName, policy: RateLimitPolicy) -> Self {
        let rate = NonZeroU32::new(policy.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(policy.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            provider,
            bucket: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
            backoff_until: Mutex::new(None),
        }
    }

    /// The provider this limiter belongs to.
    pub fn provider(&self) -> &ProviderName {
        &self.provider
    }

    /// Try to take one token without waiting.
    ///
    /// While the provider is in backoff no token is handed out, even if the
    /// bucket has budget left.
    pub fn try_acquire(&self) -> Acquire {
        if let Some(until) = self.backoff_deadline() {
            return Acquire::MustWaitUntil(until);
        }
        match self.bucket.check() {
            Ok(()) => Acquire::Granted,
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Acquire::MustWaitUntil(Instant::now() + wait)
            }
        }
    }

    /// Wait until a token is available and take it.
    ///
    /// The waiting task is parked; callers race this against cancellation.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Acquire::Granted => return,
                Acquire::MustWaitUntil(until) => {
                    debug!(
                        provider = %self.provider,
                        wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Waiting for rate-limit token"
                    );
                    tokio::time::sleep_until(until).await;
                }
            }
        }
    }

    /// Put the provider into backoff for `delay`. An existing later deadline
    /// is kept.
    pub fn back_off(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut guard = self.backoff_until.lock();
        match *guard {
            Some(existing) if existing >= until => {}
            _ => *guard = Some(until),
        }
    }

    /// Returns `true` while a backoff deadline is in the future.
    pub fn in_backoff(&self) -> bool {
        self.backoff_deadline().is_some()
    }

    /// The pending backoff deadline, clearing it once it has passed.
    fn backoff_deadline(&self) -> Option<Instant> {
        let mut guard = self.backoff_until.lock();
        match *guard {
            Some(until) if until > Instant::now() => Some(until),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for ProviderLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLimiter")
            .field("provider", &self.provider)
            .field("backoff_until", &*self.backoff_until.lock())
            .finish_non_exhaustive()
    }
}

/// The limiters of every provider, created lazily on first use.
#[derive(Debug, Default)]
pub struct RateLimiterSet {
    limiters: DashMap<ProviderName, Arc<ProviderLimiter>>,
    overrides: HashMap<ProviderName, RateLimitPolicy>,
}

impl RateLimiterSet {
    /// A set using each descriptor's own policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set where the given providers use an overridden policy.
    pub fn with_overrides(overrides: HashMap<ProviderName, RateLimitPolicy>) -> Self {
        Self {
            limiters: DashMap::new(),
            overrides,
        }
    }

    /// The limiter for a provider, creating it from the descriptor (or its
    /// override) on first use.
    pub fn limiter(&self, descriptor: &ProviderDescriptor) -> Arc<ProviderLimiter> {
        self.limiters
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                let policy = self
                    .overrides
                    .get(&descriptor.name)
                    .copied()
                    .unwrap_or(descriptor.rate_limit);
                Arc::new(ProviderLimiter::new(descriptor.name.clone(), policy))
            })
            .clone()
    }

    /// Number of providers that have a limiter.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Returns `true` if no limiter has been created yet.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
