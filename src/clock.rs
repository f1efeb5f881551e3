//! Monotonic microsecond timestamps, relative to a scheduler's birth.
//!
//! Deadlines are `usecs since sched->birth`. `std::time::Instant` gives
//! us the same monotonic guarantee without reaching for
//! `libc::clock_gettime` ourselves.

use std::time::Instant;

/// A scheduler-local clock, born the moment its scheduler is created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    birth: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock { birth: Instant::now() }
    }

    /// Microseconds elapsed since this clock was created.
    pub fn now_usecs(&self) -> u64 {
        self.birth.elapsed().as_micros() as u64
    }

    /// Absolute deadline `usecs` microseconds from now, in the same
    /// birth-relative units as `now_usecs()`.
    pub fn deadline_in(&self, usecs: u64) -> u64 {
        self.now_usecs().saturating_add(usecs)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
