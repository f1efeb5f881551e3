//! # nyco
//!
//! A cooperative, single-threaded coroutine runtime with an integrated
//! I/O readiness poller.
//!
//! `nyco` runs many stackful coroutines ("green threads") on one OS
//! thread, switching between them with direct context switches rather
//! than an async state machine. All coroutines on a thread share one
//! physical stack; a suspended coroutine's live frames are copied out to
//! a heap buffer and copied back in when it's resumed. Readiness-driven
//! I/O is built in: [`park`] suspends the current coroutine until a file
//! descriptor is readable/writable or a timeout elapses, backed by a
//! small poller abstraction over `mio`.
//!
//! ```no_run
//! fn main() {
//!     nyco::spawn(|| {
//!         println!("hello from a coroutine");
//!         nyco::sleep(10);
//!         println!("...and after a nap");
//!     })
//!     .unwrap();
//!     nyco::run();
//! }
//! ```
//!
//! There is no cross-thread coroutine migration, no work-stealing, and
//! no mailboxes — this is deliberately a single-thread-at-a-time core,
//! not a full async runtime. See `DESIGN.md` for what was trimmed from
//! the crate this was built from and why.

#![warn(missing_docs)]

#[macro_use]
extern crate log;

mod clock;
mod coroutine;
mod error;
mod poller;
mod ready_queue;
mod scheduler;
mod sleep_tree;
mod stack;
mod status;
mod wait_tree;

pub use coroutine::{CoroutineId, Interest};
pub use error::{Error, Result};
pub use scheduler::{
    current, current_status, detach, park, renice, run, sleep, spawn, spawn_configured, unpark,
    yield_now, Config, NO_TIMEOUT,
};
pub use status::Status;

#[cfg(test)]
mod scenario_tests;
