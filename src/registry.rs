// Map-backed lease registry, the canonical LeaseManager implementation

use crate::interning::StringCache;
use crate::lease::{Lease, LeaseManager, Registrant};
use crate::time::{Clock, SystemClock};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identity a lease is stored under. Both components are interned, so a
/// registry full of instances of the same few applications shares one
/// allocation per distinct name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    app_name: Arc<str>,
    id: Arc<str>,
}

impl LeaseKey {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Default)]
struct Counters {
    registrations: AtomicU64,
    replicated_registrations: AtomicU64,
    renewals: AtomicU64,
    replicated_renewals: AtomicU64,
    renewal_misses: AtomicU64,
    cancellations: AtomicU64,
    replicated_cancellations: AtomicU64,
    cancellation_misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of a registry's operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub registrations: u64,
    pub replicated_registrations: u64,
    pub renewals: u64,
    pub replicated_renewals: u64,
    pub renewal_misses: u64,
    pub cancellations: u64,
    pub replicated_cancellations: u64,
    pub cancellation_misses: u64,
    pub evictions: u64,
}

/// A concurrent registry of leases keyed by `(app_name, id)`.
///
/// The sharded map gives every operation per-key atomicity: two concurrent
/// calls on the same identity serialize on the shard lock, and the eviction
/// pass re-checks each candidate under that same lock so a renew that lands
/// mid-pass always wins.
pub struct LeaseRegistry<T> {
    leases: DashMap<LeaseKey, Lease<T>>,
    strings: StringCache,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<T> LeaseRegistry<T> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a registry on an explicit clock. Tests drive expiry through a
    /// [`ManualClock`](crate::time::ManualClock) here.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: DashMap::new(),
            strings: StringCache::new(),
            clock,
            counters: Counters::default(),
        }
    }

    fn key(&self, app_name: &str, id: &str) -> LeaseKey {
        LeaseKey {
            app_name: self.strings.cached_value_of(app_name),
            id: self.strings.cached_value_of(id),
        }
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Copy out the lease for `(app_name, id)`, if one is held.
    pub fn lease(&self, app_name: &str, id: &str) -> Option<Lease<T>>
    where
        T: Clone,
    {
        self.leases
            .get(&self.key(app_name, id))
            .map(|entry| entry.value().clone())
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            replicated_registrations: self
                .counters
                .replicated_registrations
                .load(Ordering::Relaxed),
            renewals: self.counters.renewals.load(Ordering::Relaxed),
            replicated_renewals: self.counters.replicated_renewals.load(Ordering::Relaxed),
            renewal_misses: self.counters.renewal_misses.load(Ordering::Relaxed),
            cancellations: self.counters.cancellations.load(Ordering::Relaxed),
            replicated_cancellations: self
                .counters
                .replicated_cancellations
                .load(Ordering::Relaxed),
            cancellation_misses: self.counters.cancellation_misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// One eviction pass with an admission budget.
    ///
    /// Expired candidates are snapshotted along with the renewal timestamp
    /// each was observed at; removal then only goes through if the lease is
    /// still expired *and* still carries that timestamp, so a renew that
    /// landed after the snapshot keeps its lease. `admit` is consulted once
    /// per candidate; the first `false` defers the remainder to the next
    /// pass. Returns the number of leases evicted.
    pub fn evict_with_budget(&self, mut admit: impl FnMut() -> bool) -> usize {
        let now = self.clock.now_millis();
        let candidates: Vec<(LeaseKey, u64)> = self
            .leases
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().last_update_timestamp()))
            .collect();

        if candidates.is_empty() {
            return 0;
        }
        debug!(candidates = candidates.len(), "starting eviction pass");

        let mut evicted = 0;
        for (index, (key, observed_update)) in candidates.iter().enumerate() {
            if !admit() {
                debug!(
                    deferred = candidates.len() - index,
                    "eviction budget exhausted, deferring remainder to next pass"
                );
                break;
            }
            let removed = self.leases.remove_if(key, |_, lease| {
                lease.last_update_timestamp() == *observed_update && lease.is_expired(now)
            });
            if let Some((key, mut lease)) = removed {
                lease.mark_evicted(now);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
                info!(
                    app = key.app_name(),
                    id = key.id(),
                    last_update = lease.last_update_timestamp(),
                    "evicted lease, renewal window lapsed"
                );
            }
        }
        evicted
    }
}

impl<T> Default for LeaseRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Registrant> LeaseManager<T> for LeaseRegistry<T> {
    fn register(&self, registrant: T, lease_duration: Duration, is_replication: bool) {
        let key = self.key(registrant.app_name(), registrant.id());
        let now = self.clock.now_millis();
        let lease = Lease::new(registrant, lease_duration, now);

        let replaced = self.leases.insert(key.clone(), lease);
        let counter = if is_replication {
            &self.counters.replicated_registrations
        } else {
            &self.counters.registrations
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if replaced.is_some() {
            debug!(
                app = key.app_name(),
                id = key.id(),
                is_replication,
                "re-registered lease, timing state reset"
            );
        } else {
            info!(
                app = key.app_name(),
                id = key.id(),
                is_replication,
                "registered lease"
            );
        }
    }

    fn cancel(&self, app_name: &str, id: &str, is_replication: bool) -> bool {
        let key = self.key(app_name, id);
        match self.leases.remove(&key) {
            Some((key, mut lease)) => {
                lease.mark_cancelled();
                let counter = if is_replication {
                    &self.counters.replicated_cancellations
                } else {
                    &self.counters.cancellations
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    app = key.app_name(),
                    id = key.id(),
                    is_replication,
                    "cancelled lease"
                );
                true
            }
            None => {
                self.counters
                    .cancellation_misses
                    .fetch_add(1, Ordering::Relaxed);
                warn!(app = app_name, id, is_replication, "cancel found no lease");
                false
            }
        }
    }

    fn renew(&self, app_name: &str, id: &str, is_replication: bool) -> bool {
        let key = self.key(app_name, id);
        let now = self.clock.now_millis();
        match self.leases.get_mut(&key) {
            Some(mut entry) => {
                entry.renew(now);
                let counter = if is_replication {
                    &self.counters.replicated_renewals
                } else {
                    &self.counters.renewals
                };
                counter.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.counters.renewal_misses.fetch_add(1, Ordering::Relaxed);
                warn!(app = app_name, id, is_replication, "renew found no lease");
                false
            }
        }
    }

    fn evict(&self) {
        self.evict_with_budget(|| true);
    }
}
