//! Shared outbound rate limiter.
//!
//! A token bucket expressed as GCRA (virtual scheduling): the whole bucket
//! is one atomic "theoretical arrival time" (TAT). Each acquire reserves the
//! next emission slot with a compare-and-swap and then sleeps until the slot
//! opens, so concurrent callers never take a lock and waiting callers are
//! served in reservation order.
//!
//! One limiter is shared by the cache refreshers and every ad-hoc upstream
//! call so total outbound traffic stays under a single ceiling.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::RateLimitConfig,
    error::{DirectoryError, DirectoryResult},
    metrics,
};

const NANOS_PER_MINUTE: u64 = 60_000_000_000;

/// A slot claimed by one acquire call.
#[derive(Debug, Clone, Copy)]
struct Reservation {
    /// Offset from `origin` at which the caller may proceed.
    allowed_at: u64,
    /// TAT written by this reservation.
    tat: u64,
}

pub struct RateLimiter {
    origin: Instant,
    /// Nanoseconds between two permits at the sustained rate; zero disables limiting.
    interval_nanos: u64,
    /// How far ahead of the sustained rate a burst may run.
    tolerance_nanos: u64,
    tat: AtomicU64,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let interval_nanos = match config.requests_per_minute {
            0 => 0,
            rpm => NANOS_PER_MINUTE / u64::from(rpm),
        };
        let burst = u64::from(config.burst.max(1));

        Self {
            origin: Instant::now(),
            interval_nanos,
            tolerance_nanos: interval_nanos.saturating_mul(burst - 1),
            tat: AtomicU64::new(0),
            config,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(RateLimitConfig::unlimited())
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn is_unlimited(&self) -> bool {
        self.interval_nanos == 0
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn reserve(&self, now: u64) -> Reservation {
        let mut tat = self.tat.load(Ordering::Acquire);
        loop {
            let base = tat.max(now);
            let next = base.saturating_add(self.interval_nanos);
            let allowed_at = base.saturating_sub(self.tolerance_nanos).max(now);
            match self
                .tat
                .compare_exchange_weak(tat, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Reservation { allowed_at, tat: next },
                Err(actual) => tat = actual,
            }
        }
    }

    /// Give back an unused reservation.
    ///
    /// Only the most recent reservation can be returned; when another caller
    /// has already stacked a slot behind it the bucket is left as is.
    fn release(&self, reservation: Reservation) {
        let _ = self.tat.compare_exchange(
            reservation.tat,
            reservation.tat - self.interval_nanos,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Take a permit without waiting. Returns false when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        let now = self.now_nanos();
        let mut tat = self.tat.load(Ordering::Acquire);
        loop {
            let base = tat.max(now);
            if base.saturating_sub(self.tolerance_nanos) > now {
                return false;
            }
            match self.tat.compare_exchange_weak(
                tat,
                base.saturating_add(self.interval_nanos),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => tat = actual,
            }
        }
    }

    /// Wait for a permit.
    ///
    /// Exhaustion only lengthens the wait; the sole error is cancellation.
    /// Dropping the returned future before it completes returns the slot the
    /// same way cancellation does.
    pub async fn acquire(&self, cancel: &CancellationToken) -> DirectoryResult<()> {
        if cancel.is_cancelled() {
            return Err(DirectoryError::Cancelled);
        }
        if self.is_unlimited() {
            return Ok(());
        }

        let now = self.now_nanos();
        let reservation = self.reserve(now);
        if reservation.allowed_at <= now {
            return Ok(());
        }

        let wait = Duration::from_nanos(reservation.allowed_at - now);
        debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit permit");
        metrics::record_rate_limit_wait(wait);

        let pending = scopeguard::guard(reservation, |r| self.release(r));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DirectoryError::Cancelled),
            _ = sleep_until(self.origin + Duration::from_nanos(reservation.allowed_at)) => {
                scopeguard::ScopeGuard::into_inner(pending);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
