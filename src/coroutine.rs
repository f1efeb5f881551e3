//! The coroutine object.
//!
//! A closure folds a separate `entry` function pointer and opaque `arg`
//! into a single `FnOnce`, so there is no `argument` field here:
//! whatever the entry needs, it captures.

use context::Context;
use std::os::unix::io::RawFd;

use crate::stack::SavedStack;
use crate::status::Status;

/// Slab slot a coroutine is stored at. Not the same thing as
/// `CoroutineId`: slots are reused after a coroutine is freed, ids never
/// are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub usize);

/// Stable identity for a coroutine, assigned from the scheduler's
/// monotonic spawn counter. Unique for the lifetime of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(pub u64);

/// Read/write interest, used by `park()` and surfaced on wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub fn read() -> Self {
        Interest { readable: true, writable: false }
    }

    pub fn write() -> Self {
        Interest { readable: false, writable: true }
    }
}

pub(crate) type Entry = Box<dyn FnOnce() + 'static>;

/// A single coroutine: identity, status, its own saved stack, and
/// whatever it's currently waiting on.
pub struct Coroutine {
    pub id: CoroutineId,
    pub status: Status,

    /// Taken (and consumed) the first time this coroutine is resumed.
    pub(crate) entry: Option<Entry>,

    /// `None` until the coroutine has suspended at least once; bootstrap
    /// context is built fresh on first resume.
    pub(crate) context: Option<Context>,

    pub(crate) saved_stack: SavedStack,

    pub wait_fd: Option<RawFd>,
    pub wait_interest: Option<Interest>,
    pub sleep_deadline: Option<u64>,

    pub birth_usecs: u64,

    /// Voluntary-yield heuristic counter, bumped by `renice()`.
    pub(crate) ops: u32,
}

impl Coroutine {
    pub(crate) fn new(id: CoroutineId, entry: Entry, birth_usecs: u64) -> Self {
        Coroutine {
            id,
            status: Status::NEW,
            entry: Some(entry),
            context: None,
            saved_stack: SavedStack::new(),
            wait_fd: None,
            wait_interest: None,
            sleep_deadline: None,
            birth_usecs,
            ops: 0,
        }
    }

    pub fn is_exited(&self) -> bool {
        self.status.contains(Status::EXITED)
    }

    pub fn is_detached(&self) -> bool {
        self.status.contains(Status::DETACH)
    }
}
