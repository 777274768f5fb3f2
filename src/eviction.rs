// Periodic eviction driver

use crate::rate_limiter::{RateLimiter, RateUnit};
use crate::registry::LeaseRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Cap on how many leases one eviction pass may remove.
///
/// After a long pause or a clock jump a single pass can find a large share
/// of the registry expired at once; draining tokens per eviction spreads
/// the removals over several passes instead.
#[derive(Debug, Clone, Copy)]
pub struct EvictionRateLimit {
    pub unit: RateUnit,
    pub burst_size: i32,
    pub average_rate: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionConfig {
    /// How often to run an eviction pass.
    pub interval: Duration,
    /// Optional per-pass cap; `None` evicts everything that has lapsed.
    pub rate_limit: Option<EvictionRateLimit>,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            rate_limit: None,
        }
    }
}

/// Owns the background task that periodically sweeps a registry.
///
/// The sweep itself is just [`LeaseRegistry::evict_with_budget`]; the driver
/// adds the cadence and the optional rate cap, and is safe to run while
/// register/renew/cancel traffic continues.
pub struct EvictionDriver {
    handle: JoinHandle<()>,
}

impl EvictionDriver {
    pub fn spawn<T>(registry: Arc<LeaseRegistry<T>>, config: EvictionConfig) -> Self
    where
        T: Send + Sync + 'static,
    {
        let limiter = config.rate_limit.map(|limit| (RateLimiter::new(limit.unit), limit));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = match &limiter {
                    Some((limiter, limit)) => registry.evict_with_budget(|| {
                        limiter.acquire(limit.burst_size, limit.average_rate)
                    }),
                    None => registry.evict_with_budget(|| true),
                };
                if evicted > 0 {
                    info!(evicted, "eviction pass complete");
                } else {
                    debug!("eviction pass found nothing to remove");
                }
            }
        });
        Self { handle }
    }

    /// Stop the background task. Dropping the driver does the same.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for EvictionDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::{LeaseManager, Registrant};
    use crate::time::ManualClock;

    #[derive(Debug, Clone)]
    struct Instance {
        app: &'static str,
        id: String,
    }

    impl Registrant for Instance {
        fn app_name(&self) -> &str {
            self.app
        }

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn seeded_registry(count: usize) -> (Arc<LeaseRegistry<Instance>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(LeaseRegistry::with_clock(clock.clone()));
        for i in 0..count {
            registry.register(
                Instance {
                    app: "app",
                    id: format!("i-{i}"),
                },
                Duration::from_secs(1),
                false,
            );
        }
        (registry, clock)
    }

    #[tokio::test]
    async fn driver_sweeps_lapsed_leases() {
        let (registry, clock) = seeded_registry(3);
        let driver = EvictionDriver::spawn(
            registry.clone(),
            EvictionConfig {
                interval: Duration::from_millis(10),
                rate_limit: None,
            },
        );

        clock.set(60_000);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(registry.is_empty());
        driver.shutdown();
    }

    #[tokio::test]
    async fn driver_leaves_live_leases_alone() {
        let (registry, _clock) = seeded_registry(3);
        let driver = EvictionDriver::spawn(
            registry.clone(),
            EvictionConfig {
                interval: Duration::from_millis(10),
                rate_limit: None,
            },
        );

        // clock never moves, nothing lapses
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.len(), 3);
        driver.shutdown();
    }

    #[tokio::test]
    async fn rate_cap_spreads_evictions_over_passes() {
        let (registry, clock) = seeded_registry(6);
        clock.set(60_000);

        // burst of 2 and a slow refill: the first pass removes at most two,
        // later passes drain the rest as tokens come back
        let driver = EvictionDriver::spawn(
            registry.clone(),
            EvictionConfig {
                interval: Duration::from_millis(10),
                rate_limit: Some(EvictionRateLimit {
                    unit: RateUnit::Seconds,
                    burst_size: 2,
                    average_rate: 100,
                }),
            },
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.len() < 6);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.is_empty());
        driver.shutdown();
    }
}
