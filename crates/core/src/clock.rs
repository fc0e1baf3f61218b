// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable lease expiry
//!
//! Lease deadlines are plain [`Instant`]s; every question about one
//! (has it passed, how much is left) goes through the clock so a fake clock
//! can expire leases without sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of the current time for lease bookkeeping
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Deadline of a lease starting now
    fn deadline_after(&self, lease: Duration) -> Instant {
        self.now() + lease
    }

    /// Time left until `deadline`, saturating at zero
    fn remaining_until(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(self.now())
    }

    fn has_passed(&self, deadline: Instant) -> bool {
        self.now() >= deadline
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock: a fixed origin plus an offset moved by `advance`
#[derive(Clone, Debug)]
pub struct FakeClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward for this clock and every clone of it
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner()) += by;
    }

    /// Total time advanced since creation
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
