//! Coroutine status bit-set.
//!
//! A checked `bitflags` type instead of raw integer OR/AND-not.

use bitflags::bitflags;

bitflags! {
    /// A coroutine may hold several of these at once: e.g. `SLEEPING |
    /// WAIT_READ` for a timeout-bounded I/O wait.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct Status: u16 {
        const NEW        = 1 << 0;
        const READY      = 1 << 1;
        const EXITED     = 1 << 2;
        const SLEEPING   = 1 << 3;
        const EXPIRED    = 1 << 4;
        const WAIT_READ  = 1 << 5;
        const WAIT_WRITE = 1 << 6;
        const FDEOF      = 1 << 7;
        const DETACH     = 1 << 8;
    }
}

impl Status {
    /// True if the coroutine is parked on a file descriptor, with or
    /// without a timeout.
    pub fn is_waiting(&self) -> bool {
        self.intersects(Status::WAIT_READ | Status::WAIT_WRITE)
    }
}
