// SPDX-License-Identifier: Apache-2.0

//! Monotonic nanosecond time source.
//!
//! The event loop samples [`Clock::now`] once at the top of each run-cycle
//! and threads the cached value through the rest of the cycle — callers
//! that need "now" mid-cycle read the cache via [`Clock::cached`] instead of
//! re-querying the OS clock.

use std::time::Instant;

/// A monotonic nanosecond clock, anchored at construction time.
///
/// `Clock` is cheap to clone (it only holds an `Instant` and a cached
/// sample) and is `!Send`-agnostic — nothing about it requires loop-thread
/// affinity, but in practice each event loop owns one instance.
#[derive(Debug, Clone)]
pub struct Clock {
    epoch: Instant,
    cached_nanos: u64,
}

impl Clock {
    /// Creates a new clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        let epoch = Instant::now();
        Self {
            epoch,
            cached_nanos: 0,
        }
    }

    /// Re-samples the underlying OS monotonic clock and caches the result.
    ///
    /// Returns the freshly sampled value. This is the only method that
    /// actually queries the OS; every other accessor reads the cache.
    pub fn sample(&mut self) -> u64 {
        let nanos = self.epoch.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.cached_nanos = nanos;
        nanos
    }

    /// Returns the last sampled value without touching the OS clock.
    #[must_use]
    pub fn cached(&self) -> u64 {
        self.cached_nanos
    }

    /// The instant this clock is anchored to. Exposed so callers can take
    /// an independent fresh sample via [`now_nanos_since`] without
    /// mutating (or needing access to) the `Clock` itself.
    #[must_use]
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples elapsed nanoseconds since `epoch` without needing a `&mut
/// Clock`. Used by task-local horizon checks (`should_yield`) that must
/// read fresh time from inside a running task, independent of the loop's
/// once-per-cycle cached sample.
#[must_use]
pub fn now_nanos_since(epoch: Instant) -> u64 {
    epoch.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64
}

/// Saturating addition of a nanosecond delay to a deadline, clamped to
/// `i64::MAX` as specified ("overflow-safe deadline computation clamps to
/// max signed 64-bit").
#[must_use]
pub fn saturating_deadline(base_nanos: u64, delta_nanos: u64) -> u64 {
    let max = i64::MAX as u64;
    base_nanos.saturating_add(delta_nanos).min(max)
}
