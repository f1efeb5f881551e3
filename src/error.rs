//! Error kinds surfaced at the core's API boundary.
//!
//! Programming errors (duplicate fd registration, parking an
//! already-parked coroutine, exceeding the maximum stack size) are
//! trapped with `panic!`/`assert!` at the call site rather than modeled
//! here — they represent broken invariants, not recoverable conditions.
//! `Error` is reserved for resource exhaustion at
//! creation time, the only class of failure the core is expected to
//! return rather than trap.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The shared coroutine stack could not be allocated (e.g. mmap
    /// failure, or the configured size couldn't be reserved).
    #[error("failed to allocate the shared coroutine stack: {0}")]
    StackAlloc(#[source] std::io::Error),

    /// The readiness poller failed to register, modify, unregister, or
    /// wait on a file descriptor.
    #[error("failed to create the readiness poller: {0}")]
    PollerCreate(#[source] std::io::Error),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
