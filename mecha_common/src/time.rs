//! Monotonic time source for the control kernel.
//!
//! Nothing inside the kernel reads a global clock for control decisions.
//! Callers pass a [`Timestamp`] into every time-dependent operation
//! (`run_cycle`, `update`, `tick`), and components that need to *measure*
//! elapsed wall time hold an injected [`Clock`].
//!
//! - [`MonotonicClock`] wraps `std::time::Instant` for production hosts.
//! - [`ManualClock`] is advanced explicitly, for deterministic tests and
//!   simulation without real sleeps.

use std::ops::Add;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use static_assertions::{assert_eq_size, assert_impl_all};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A point on a monotonic time axis, in nanoseconds since the clock origin.
///
/// The origin is arbitrary (clock creation, simulation start); only
/// differences between timestamps from the same clock are meaningful.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Build from fractional seconds. Negative and NaN inputs map to the
    /// origin; values beyond the representable range saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return Self::ZERO;
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos >= u64::MAX as f64 {
            Self(u64::MAX)
        } else {
            Self(nanos as u64)
        }
    }

    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    /// Elapsed time since `earlier`, or zero if `earlier` is in the future.
    #[inline]
    pub const fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Signed elapsed seconds `self − earlier`.
    ///
    /// Negative when time went backwards; the PID regulator relies on this
    /// to detect a non-positive `dt`.
    #[inline]
    pub fn secs_since(self, earlier: Timestamp) -> f64 {
        if self.0 >= earlier.0 {
            (self.0 - earlier.0) as f64 / NANOS_PER_SEC
        } else {
            -((earlier.0 - self.0) as f64 / NANOS_PER_SEC)
        }
    }

    #[inline]
    pub fn saturating_add(self, d: Duration) -> Self {
        let add = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(add))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Monotonic time provider.
pub trait Clock: Send + Sync {
    /// Current time. Successive calls never decrease.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline]
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Clock backed by `std::time::Instant`; origin is the moment of creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Timestamp {
        let nanos = self.origin.elapsed().as_nanos();
        Timestamp(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Explicitly driven clock.
///
/// Clones share the same time cell, so a test can hand one clone to the
/// scheduler and advance another from inside a task body to simulate
/// execution time. Never moves backwards: [`ManualClock::set`] ignores
/// earlier timestamps.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(t: Timestamp) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(t.as_nanos())),
        }
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let add = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(add))
            });
    }

    /// Jump to `t` if it is not earlier than the current time.
    pub fn set(&self, t: Timestamp) {
        self.nanos.fetch_max(t.as_nanos(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::Acquire))
    }
}

assert_eq_size!(Timestamp, u64);
assert_impl_all!(MonotonicClock: Clock, Send, Sync);
assert_impl_all!(ManualClock: Clock, Send, Sync, Clone);

// ─── Tests ──────────────────────────────────────────────────────────
