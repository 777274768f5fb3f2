#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod eviction;
pub mod interning;
pub mod lease;
pub mod rate_limiter;
pub mod registry;
pub mod time;

pub use error::{Error, Result};
pub use eviction::{EvictionConfig, EvictionDriver, EvictionRateLimit};
pub use interning::{intern, StringCache};
pub use lease::{Lease, LeaseManager, LeaseStatus, Registrant, DEFAULT_LEASE_DURATION};
pub use rate_limiter::{RateLimiter, RateUnit};
pub use registry::{LeaseRegistry, RegistryStats};
pub use time::{Clock, EpochMillis, ManualClock, SystemClock};
