// Core lease data structures and the lifecycle contract

use crate::time::EpochMillis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lease duration (90 seconds)
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(90);

/// Current status of a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseStatus {
    /// Lease is active; kept alive by renewals
    Active,
    /// Holder cancelled the lease explicitly (terminal)
    Cancelled,
    /// Lease lapsed and an eviction pass removed it (terminal)
    Evicted,
}

/// A time-bounded liveness claim wrapping a registrant `T`.
///
/// The lease stays alive as long as renewals land within `duration_millis`
/// of the previous update; once that window lapses the lease becomes
/// eligible for eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease<T> {
    holder: T,
    registration_timestamp: EpochMillis,
    duration_millis: u64,
    last_update_timestamp: EpochMillis,
    eviction_timestamp: Option<EpochMillis>,
    status: LeaseStatus,
    renewal_count: u32,
}

impl<T> Lease<T> {
    /// Create a new active lease. A zero duration falls back to
    /// [`DEFAULT_LEASE_DURATION`] rather than producing a lease that is
    /// expired on arrival.
    pub fn new(holder: T, duration: Duration, now: EpochMillis) -> Self {
        let mut duration_millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if duration_millis == 0 {
            duration_millis = u64::try_from(DEFAULT_LEASE_DURATION.as_millis())
                .unwrap_or(u64::MAX);
        }
        Self {
            holder,
            registration_timestamp: now,
            duration_millis,
            last_update_timestamp: now,
            eviction_timestamp: None,
            status: LeaseStatus::Active,
            renewal_count: 0,
        }
    }

    pub fn holder(&self) -> &T {
        &self.holder
    }

    pub fn into_holder(self) -> T {
        self.holder
    }

    pub fn registration_timestamp(&self) -> EpochMillis {
        self.registration_timestamp
    }

    pub fn duration_millis(&self) -> u64 {
        self.duration_millis
    }

    pub fn last_update_timestamp(&self) -> EpochMillis {
        self.last_update_timestamp
    }

    pub fn eviction_timestamp(&self) -> Option<EpochMillis> {
        self.eviction_timestamp
    }

    pub fn status(&self) -> LeaseStatus {
        self.status
    }

    pub fn renewal_count(&self) -> u32 {
        self.renewal_count
    }

    /// Check if the renewal window has lapsed at the given time. Only an
    /// active lease can expire; cancelled and evicted leases are already
    /// terminal.
    pub fn is_expired(&self, now: EpochMillis) -> bool {
        self.status == LeaseStatus::Active
            && now.saturating_sub(self.last_update_timestamp) > self.duration_millis
    }

    /// Refresh the renewal window. A renew on a lease that has lapsed but
    /// not yet been removed resurrects it.
    pub fn renew(&mut self, now: EpochMillis) {
        self.last_update_timestamp = now;
        self.renewal_count += 1;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = LeaseStatus::Cancelled;
    }

    pub(crate) fn mark_evicted(&mut self, now: EpochMillis) {
        self.status = LeaseStatus::Evicted;
        self.eviction_timestamp = Some(now);
    }
}

/// Supplies the identity key a registry stores a registrant under.
pub trait Registrant {
    /// Application the instance belongs to
    fn app_name(&self) -> &str;

    /// Unique id within the application
    fn id(&self) -> &str;
}

/// The lease lifecycle contract implemented by a registry that owns a
/// collection of [`Lease`]s. Leases determine which instances are treated
/// as alive: when renewals stop arriving, the lease lapses and the eviction
/// pass removes the instance.
///
/// `is_replication` never changes lease semantics; it marks the call as
/// having originated from a peer registry rather than the registrant
/// itself, which matters only for accounting and propagation.
pub trait LeaseManager<T> {
    /// Assign a new lease to `registrant`, replacing any existing lease for
    /// the same identity and resetting its timing state.
    fn register(&self, registrant: T, lease_duration: Duration, is_replication: bool);

    /// Remove the lease for `(app_name, id)`. Returns `true` if a lease was
    /// removed; a second cancel of the same id returns `false`.
    fn cancel(&self, app_name: &str, id: &str, is_replication: bool) -> bool;

    /// Refresh the lease for `(app_name, id)`. Returns `false` only when no
    /// lease exists (never registered, or already cancelled/evicted).
    fn renew(&self, app_name: &str, id: &str, is_replication: bool) -> bool;

    /// Remove every lease whose renewal window has lapsed.
    fn evict(&self);
}
