// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Herd Contributors

//! Clock abstraction for testable time handling.
//!
//! Job timing and node liveness use a monotonic microsecond scale
//! anchored at clock construction, never wall-clock time.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that provides the current time.
///
/// Object-safe so daemon singletons can hold an `Arc<dyn Clock>` and
/// tests can swap in a [`FakeClock`].
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Microseconds elapsed since the clock was created.
    fn monotonic_us(&self) -> u64;
}

/// Real system clock.
#[derive(Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn monotonic_us(&self) -> u64 {
        self.now().duration_since(self.origin).as_micros() as u64
    }
}

/// Fake clock for testing with controllable time.
#[derive(Clone)]
pub struct FakeClock {
    origin: Instant,
    current: Arc<Mutex<Instant>>,
}

impl FakeClock {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self { origin, current: Arc::new(Mutex::new(origin)) }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn monotonic_us(&self) -> u64 {
        self.now().duration_since(self.origin).as_micros() as u64
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
