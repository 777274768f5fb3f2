// Token bucket admission control, lock-free

use crate::error::{Error, Result};
use crate::time::{Clock, SystemClock};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Time unit the average rate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Seconds,
    Minutes,
}

impl RateUnit {
    fn to_ms_conversion(self) -> u64 {
        match self {
            RateUnit::Seconds => 1_000,
            RateUnit::Minutes => 60 * 1_000,
        }
    }
}

/// A non-blocking token bucket.
///
/// Up to `burst_size` tokens are outstanding at once, replenished
/// continuously at `average_rate` per [`RateUnit`]. Both limits are per-call
/// parameters rather than construction state, so one limiter instance can be
/// reconfigured live from dynamic configuration without being rebuilt.
///
/// Contention never blocks a caller; it only shows up as CAS retries.
#[derive(Debug)]
pub struct RateLimiter {
    rate_to_ms_conversion: u64,
    consumed_tokens: AtomicI64,
    last_refill_time: AtomicU64,
}

impl RateLimiter {
    pub fn new(unit: RateUnit) -> Self {
        Self {
            rate_to_ms_conversion: unit.to_ms_conversion(),
            consumed_tokens: AtomicI64::new(0),
            last_refill_time: AtomicU64::new(0),
        }
    }

    /// Construct from an explicit rate interval. Only one-second and
    /// one-minute intervals are supported; anything else is a fatal
    /// misconfiguration.
    pub fn with_interval(interval: Duration) -> Result<Self> {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        match millis {
            1_000 => Ok(Self::new(RateUnit::Seconds)),
            60_000 => Ok(Self::new(RateUnit::Minutes)),
            _ => Err(Error::UnsupportedRateUnit { millis }),
        }
    }

    /// Try to take one token, using the wall clock.
    pub fn acquire(&self, burst_size: i32, average_rate: i64) -> bool {
        self.acquire_at(burst_size, average_rate, SystemClock.now_millis())
    }

    /// Try to take one token at an explicit time. This is the deterministic
    /// form the tests drive.
    ///
    /// Degenerate limits fail open: a non-positive burst or rate admits
    /// everything rather than letting a bad config knob turn into an outage.
    pub fn acquire_at(&self, burst_size: i32, average_rate: i64, now_millis: u64) -> bool {
        if burst_size <= 0 || average_rate <= 0 {
            return true;
        }
        self.refill(burst_size, average_rate, now_millis);
        self.consume(burst_size)
    }

    fn refill(&self, burst_size: i32, average_rate: i64, now_millis: u64) {
        let refill_time = self.last_refill_time.load(Ordering::SeqCst);
        let elapsed = now_millis.saturating_sub(refill_time);
        let rate = u64::try_from(average_rate).unwrap_or_default();
        let new_tokens = elapsed.saturating_mul(rate) / self.rate_to_ms_conversion;
        if new_tokens == 0 {
            return;
        }

        // Advance by whole-token time, not to `now`: when the rate is high
        // relative to the unit, jumping to `now` would swallow the fraction
        // of a token the leftover millis were worth. The first refill has no
        // origin to advance from and anchors at `now`.
        let new_refill_time = if refill_time == 0 {
            now_millis
        } else {
            refill_time + new_tokens * self.rate_to_ms_conversion / rate
        };

        // Single CAS winner performs this refill; losers piggyback on it.
        if self
            .last_refill_time
            .compare_exchange(refill_time, new_refill_time, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let new_tokens = i64::try_from(new_tokens).unwrap_or(i64::MAX);
            loop {
                let current_level = self.consumed_tokens.load(Ordering::SeqCst);
                // burst_size may have shrunk since the tokens were consumed
                let adjusted_level = current_level.min(i64::from(burst_size));
                let new_level = (adjusted_level - new_tokens).max(0);
                if self
                    .consumed_tokens
                    .compare_exchange(current_level, new_level, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
            }
        }
    }

    fn consume(&self, burst_size: i32) -> bool {
        loop {
            let current_level = self.consumed_tokens.load(Ordering::SeqCst);
            if current_level >= i64::from(burst_size) {
                return false;
            }
            if self
                .consumed_tokens
                .compare_exchange(
                    current_level,
                    current_level + 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Instantly restore full capacity.
    pub fn reset(&self) {
        self.consumed_tokens.store(0, Ordering::SeqCst);
        self.last_refill_time.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_steady_refill() {
        let limiter = RateLimiter::new(RateUnit::Seconds);

        // burst of 2, 1 token/s
        assert!(limiter.acquire_at(2, 1, 0));
        assert!(limiter.acquire_at(2, 1, 0));
        assert!(!limiter.acquire_at(2, 1, 0));

        // exactly one token back after one second
        assert!(limiter.acquire_at(2, 1, 1_000));
        assert!(!limiter.acquire_at(2, 1, 1_000));
    }

    #[test]
    fn fail_open_on_degenerate_limits() {
        let limiter = RateLimiter::new(RateUnit::Seconds);
        for t in [0, 1, 1_000_000] {
            assert!(limiter.acquire_at(0, 10, t));
            assert!(limiter.acquire_at(10, 0, t));
            assert!(limiter.acquire_at(-1, -1, t));
        }
    }

    #[test]
    fn reset_restores_capacity() {
        let limiter = RateLimiter::new(RateUnit::Seconds);
        assert!(limiter.acquire_at(1, 1, 0));
        assert!(!limiter.acquire_at(1, 1, 0));

        limiter.reset();
        assert!(limiter.acquire_at(1, 1, 0));
    }

    #[test]
    fn fractional_token_time_is_not_lost() {
        let limiter = RateLimiter::new(RateUnit::Seconds);

        // 500 tokens/s is one token per 2ms. Drain the single-token bucket,
        // then poll on a 3ms cadence: each refill advances the refill origin
        // by whole-token time only, so the odd millisecond carries over.
        assert!(limiter.acquire_at(1, 500, 0));
        assert!(!limiter.acquire_at(1, 500, 0));
        // first refill anchors the origin at t=3
        assert!(limiter.acquire_at(1, 500, 3));
        assert!(!limiter.acquire_at(1, 500, 4));
        // 3ms elapsed = one token, origin advances 3 -> 5 (not to 6)
        assert!(limiter.acquire_at(1, 500, 6));
        // the banked millisecond makes t=7 a full 2ms since the origin
        assert!(limiter.acquire_at(1, 500, 7));
    }

    #[test]
    fn shrunk_burst_clamps_outstanding_tokens() {
        let limiter = RateLimiter::new(RateUnit::Seconds);
        for _ in 0..10 {
            assert!(limiter.acquire_at(10, 1, 0));
        }
        assert!(!limiter.acquire_at(10, 1, 0));

        // burst reduced to 2 at runtime; one second refills one token and
        // the consumed level must clamp down to the new burst first
        assert!(limiter.acquire_at(2, 1, 1_000));
        assert!(!limiter.acquire_at(2, 1, 1_000));
    }

    #[test]
    fn minute_unit_refills_sixty_times_slower() {
        let limiter = RateLimiter::new(RateUnit::Minutes);
        assert!(limiter.acquire_at(1, 1, 0));
        assert!(!limiter.acquire_at(1, 1, 59_999));
        assert!(limiter.acquire_at(1, 1, 60_000));
    }

    #[test]
    fn interval_constructor_rejects_odd_units() {
        assert!(RateLimiter::with_interval(Duration::from_secs(1)).is_ok());
        assert!(RateLimiter::with_interval(Duration::from_secs(60)).is_ok());

        let err = RateLimiter::with_interval(Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRateUnit { millis: 2_000 }));
    }

    #[test]
    fn concurrent_acquire_never_oversubscribes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(RateUnit::Seconds));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        // fixed timestamp: no refill ever happens after t=0
                        if limiter.acquire_at(100, 1, 0) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 100);
    }
}
