//! Scheduler main loop and coroutine lifecycle operations.
//!
//! One scheduler lives per OS thread, in a thread-local slot, created
//! lazily on first spawn. Because a coroutine primitive
//! (`yield_now`, `sleep`, `park`) runs logically *inside* a call that the
//! scheduler's own `resume_key` is still "on the stack" for — just with
//! the CPU registers pointed somewhere else — plain `RefCell` borrow
//! tracking would panic on the reentrant access. A thread-local
//! `UnsafeCell`, accessed through a raw pointer, sidesteps that and is
//! justified
//! because exactly one coroutine is ever live on the shared stack at a
//! time and the reference is never allowed to escape past the closure
//! that obtains it.

use std::cell::{Cell, UnsafeCell};
use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::time::Duration;

use context::{Context, Transfer};
use log::{debug, info, trace, warn};
use slab::Slab;

use crate::clock::Clock;
use crate::coroutine::{Coroutine, CoroutineId, Entry, Interest, Key};
use crate::error::Result;
use crate::poller::{MioPoller, Poller, ReadyEvent};
use crate::ready_queue::ReadyQueue;
use crate::sleep_tree::{self, SleepTree};
use crate::stack::{SharedStack, DEFAULT_STACK_SIZE, MAX_STACK_SIZE};
use crate::status::Status;
use crate::wait_tree::WaitTree;

/// Sentinel meaning "no timeout" for `park()`.
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Scheduler configuration. Set before the first `spawn()`
/// on a thread; later calls have no effect once a scheduler exists.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    stack_size: usize,
    default_timeout_usecs: u64,
    renice_threshold: u32,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared stack size in bytes. Traps if it exceeds
    /// `MAX_STACK_SIZE` — a misconfiguration, not a runtime
    /// condition.
    pub fn stack_size(&mut self, bytes: usize) -> &mut Self {
        assert!(
            bytes <= MAX_STACK_SIZE,
            "stack_size {bytes} exceeds MAX_STACK_SIZE ({MAX_STACK_SIZE})"
        );
        self.stack_size = bytes;
        self
    }

    /// Poll timeout used when nothing constrains it via the sleep tree.
    pub fn default_timeout_ms(&mut self, ms: u64) -> &mut Self {
        self.default_timeout_usecs = ms * 1000;
        self
    }

    /// Voluntary-yield threshold for `renice()`. Policy, not contract.
    pub fn renice_threshold(&mut self, n: u32) -> &mut Self {
        self.renice_threshold = n;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            default_timeout_usecs: 3_000_000,
            renice_threshold: 5,
        }
    }
}

thread_local! {
    static SCHEDULER: UnsafeCell<Option<Scheduler>> = UnsafeCell::new(None);
    static CURRENT: Cell<Option<Key>> = Cell::new(None);
}

/// Run `f` against this thread's scheduler.
///
/// # Panics
/// If no scheduler has been created on this thread yet.
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|cell| {
        // SAFETY: single-threaded, cooperative; the only reentrancy is a
        // coroutine primitive calling back in while a resume() further up
        // the (logical) call chain is suspended mid-switch. That's fine
        // for a raw pointer deref — there is no aliasing write in flight,
        // since the "outer" frame isn't touching `Scheduler` while the
        // context is switched away. The reference must not outlive `f`.
        let slot = unsafe { &mut *cell.get() };
        let sched = slot
            .as_mut()
            .expect("no coroutine scheduler on this thread; call spawn() first");
        f(sched)
    })
}

fn scheduler_exists() -> bool {
    SCHEDULER.with(|cell| unsafe { (*cell.get()).is_some() })
}

fn ensure_scheduler(config: Config) -> Result<()> {
    SCHEDULER.with(|cell| unsafe {
        let slot = &mut *cell.get();
        if slot.is_none() {
            *slot = Some(Scheduler::new(config)?);
        }
        Ok(())
    })
}

fn current_key() -> Option<Key> {
    CURRENT.with(Cell::get)
}

fn current_key_or_panic() -> Key {
    current_key().expect("coroutine API called outside of a running coroutine")
}

/// The coroutine scheduler for one OS thread.
pub struct Scheduler {
    clock: Clock,
    shared_stack: SharedStack,
    poller: Box<dyn Poller>,
    coroutines: Slab<Coroutine>,
    ready: ReadyQueue,
    sleep_tree: SleepTree,
    wait_tree: WaitTree,
    /// All coroutines not yet freed, tracked separately from the three
    /// collections above since a running coroutine is transiently a
    /// member of none of them.
    busy: HashSet<Key>,
    spawn_counter: u64,
    default_timeout_usecs: u64,
    renice_threshold: u32,
    /// The context to jump back to in order to resume the scheduler.
    /// `Some` only while some coroutine on this scheduler is running.
    link: Option<Context>,
}

impl Scheduler {
    fn new(config: Config) -> Result<Self> {
        let poller: Box<dyn Poller> = Box::new(MioPoller::new()?);
        Self::with_poller(config, poller)
    }

    fn with_poller(config: Config, poller: Box<dyn Poller>) -> Result<Self> {
        Ok(Scheduler {
            clock: Clock::new(),
            shared_stack: SharedStack::new(config.stack_size)?,
            poller,
            coroutines: Slab::new(),
            ready: ReadyQueue::new(),
            sleep_tree: SleepTree::new(),
            wait_tree: WaitTree::new(),
            busy: HashSet::new(),
            spawn_counter: 0,
            default_timeout_usecs: config.default_timeout_usecs,
            renice_threshold: config.renice_threshold,
            link: None,
        })
    }

    fn spawn_coroutine(&mut self, entry: Entry) -> CoroutineId {
        self.spawn_counter += 1;
        let id = CoroutineId(self.spawn_counter);
        let birth = self.clock.now_usecs();
        let co = Coroutine::new(id, entry, birth);
        let idx = self.coroutines.insert(co);
        let key = Key(idx);
        self.busy.insert(key);
        self.ready.push_back(key);
        info!("Coroutine({}): spawned", id.0);
        id
    }

    /// Resume a coroutine: load its saved stack, jump in, and either
    /// stash its new suspended context or free it if it exited.
    fn resume_key(&mut self, key: Key) {
        if !self.coroutines.contains(key.0) {
            return;
        }
        unsafe {
            self.coroutines[key.0].saved_stack.load(&self.shared_stack);
        }
        CURRENT.with(|c| c.set(Some(key)));

        let first_dispatch = self.coroutines[key.0].context.is_none();
        let co_ctx = self.coroutines[key.0].context.take().unwrap_or_else(|| unsafe {
            Context::new(self.shared_stack.as_context_stack(), trampoline)
        });
        if first_dispatch {
            let co = &mut self.coroutines[key.0];
            co.status.remove(Status::NEW);
            co.status.insert(Status::READY);
        }

        trace!("Coroutine({}): resume", self.coroutines[key.0].id.0);
        let Transfer { context, .. } = unsafe { co_ctx.resume(key.0) };
        CURRENT.with(|c| c.set(None));

        if self.coroutines[key.0].is_exited() {
            if self.coroutines[key.0].is_detached() {
                self.free(key);
            }
            // Not detached: the creator owns reclaiming it. Our minimal
            // external interface exposes no separate
            // join/free call, so in practice every coroutine that runs
            // its entry to completion is freed here: the trampoline
            // unconditionally sets DETACH on normal return.
        } else {
            self.coroutines[key.0].context = Some(context);
        }
    }

    fn free(&mut self, key: Key) {
        self.busy.remove(&key);
        self.wait_tree.cancel(key);
        if let Some(deadline) = self.coroutines[key.0].sleep_deadline.take() {
            self.sleep_tree.remove(deadline);
        }
        let id = self.coroutines[key.0].id;
        self.coroutines.remove(key.0);
        debug!("Coroutine({}): freed", id.0);
    }

    /// One pass of the scheduler loop: expire sleepers, drain the ready
    /// queue, then poll. Returns `true` once all four collections are
    /// empty.
    fn run_iteration(&mut self) -> bool {
        // 1. Expire sleepers.
        let now = self.clock.now_usecs();
        for key in self.sleep_tree.drain_expired(now) {
            if !self.coroutines.contains(key.0) {
                continue;
            }
            {
                let co = &mut self.coroutines[key.0];
                co.status.remove(Status::SLEEPING);
                co.status.insert(Status::EXPIRED | Status::READY);
                co.sleep_deadline = None;
                if let Some(fd) = co.wait_fd.take() {
                    co.wait_interest = None;
                    co.status.remove(Status::WAIT_READ | Status::WAIT_WRITE);
                    self.wait_tree.remove(fd);
                    let _ = self.poller.unregister(fd);
                }
            }
            self.resume_key(key);
        }

        // 2. Drain ready queue, bounded by a snapshot of the tail so
        // coroutines added during this pass wait for the next
        // iteration.
        let last = self.ready.back();
        while let Some(key) = self.ready.pop_front() {
            if !self.coroutines.contains(key.0) {
                if Some(key) == last {
                    break;
                }
                continue;
            }
            if self.coroutines[key.0].status.contains(Status::FDEOF) {
                self.free(key);
            } else {
                self.resume_key(key);
            }
            if Some(key) == last {
                break;
            }
        }

        // 3. Poll for readiness, elided entirely if there's ready work
        // to get to first.
        if self.ready.is_empty() {
            let now = self.clock.now_usecs();
            let min_timeout = self
                .sleep_tree
                .min_deadline()
                .map(|d| d.saturating_sub(now))
                .unwrap_or(self.default_timeout_usecs);
            let events = self
                .poller
                .wait(Some(Duration::from_micros(min_timeout)))
                .expect("poller wait failed with a non-EINTR error");
            self.handle_events(events);
        }

        // 4. Termination.
        self.is_done()
    }

    fn handle_events(&mut self, events: Vec<ReadyEvent>) {
        for ev in events {
            let Some(key) = self.wait_tree.search(ev.fd) else {
                continue;
            };
            self.wait_tree.remove(ev.fd);
            if let Some(deadline) = self.coroutines[key.0].sleep_deadline.take() {
                self.sleep_tree.remove(deadline);
            }
            {
                let co = &mut self.coroutines[key.0];
                sleep_tree::clear_sleep_bits(&mut co.status);
                co.status.remove(Status::WAIT_READ | Status::WAIT_WRITE);
                co.status.insert(Status::READY);
                if ev.hangup {
                    co.status.insert(Status::FDEOF);
                }
                co.wait_fd = None;
                co.wait_interest = None;
            }
            let _ = self.poller.unregister(ev.fd);
            self.resume_key(key);
        }
    }

    fn is_done(&self) -> bool {
        self.ready.is_empty() && self.sleep_tree.is_empty() && self.wait_tree.is_empty() && self.busy.is_empty()
    }
}

/// Entered exactly once per coroutine, on its first resume. Never
/// returns: the coroutine's entry runs here, then the
/// final status bits are set, then one last `leave()` hands control back
/// for good.
extern "C" fn trampoline(t: Transfer) -> ! {
    with_scheduler(|s| s.link = Some(t.context));
    let key = Key(t.data);

    let entry = with_scheduler(|s| s.coroutines[key.0].entry.take())
        .expect("trampoline entered for a coroutine with no entry");
    entry();

    with_scheduler(|s| {
        s.coroutines[key.0]
            .status
            .insert(Status::EXITED | Status::FDEOF | Status::DETACH);
    });

    leave(key);
    unreachable!("a coroutine must never be resumed again after leave() on exit");
}

/// Save this coroutine's live stack (unless it's already exited) and
/// switch back to the scheduler. Shared by `yield_now`, `sleep`, `park`,
/// and the trampoline's final handoff.
fn leave(key: Key) {
    let probe: u8 = 0;
    with_scheduler(|s| {
        if !s.coroutines[key.0].is_exited() {
            let Scheduler { shared_stack, coroutines, .. } = s;
            unsafe {
                coroutines[key.0].saved_stack.save(shared_stack, &probe as *const u8);
            }
        }
    });

    let link = with_scheduler(|s| s.link.take().expect("leave() called with no active link back to the scheduler"));
    let Transfer { context, .. } = unsafe { link.resume(key.0) };
    with_scheduler(|s| s.link = Some(context));
}

/// Spawn a coroutine bound to this thread's scheduler, creating the
/// scheduler (with default configuration) if this is the first spawn on
/// this thread. Fails only if the scheduler didn't already exist and
/// creating one ran out of resources (`Error::StackAlloc`,
/// `Error::PollerCreate`).
pub fn spawn<F>(entry: F) -> Result<CoroutineId>
where
    F: FnOnce() + 'static,
{
    ensure_scheduler(Config::default())?;
    Ok(with_scheduler(|s| s.spawn_coroutine(Box::new(entry))))
}

/// Like `spawn`, but supplies the `Config` to create the scheduler with
/// if one doesn't exist yet on this thread. Ignored (with a log warning)
/// if a scheduler is already running.
pub fn spawn_configured<F>(config: Config, entry: F) -> Result<CoroutineId>
where
    F: FnOnce() + 'static,
{
    if scheduler_exists() {
        warn!("spawn_configured: scheduler already initialized on this thread, Config ignored");
    }
    ensure_scheduler(config)?;
    Ok(with_scheduler(|s| s.spawn_coroutine(Box::new(entry))))
}

/// The currently running coroutine, or `None` if called from outside any
/// coroutine (e.g. from the scheduler loop itself).
pub fn current() -> Option<CoroutineId> {
    let key = current_key()?;
    Some(with_scheduler(|s| s.coroutines[key.0].id))
}

/// Yield execution without blocking on anything; the coroutine is
/// immediately re-queued ready.
pub fn yield_now() {
    let key = current_key_or_panic();
    with_scheduler(|s| {
        s.coroutines[key.0].status.insert(Status::READY);
        s.ready.push_back(key);
    });
    leave(key);
}

/// Sleep for `ms` milliseconds. `ms == 0` is a fair yield: requeue ready
/// and yield immediately, equivalent to `yield_now()`.
pub fn sleep(ms: u64) {
    let key = current_key_or_panic();
    if ms == 0 {
        with_scheduler(|s| {
            s.coroutines[key.0].status.insert(Status::READY);
            s.ready.push_back(key);
        });
    } else {
        with_scheduler(|s| {
            let deadline = s.clock.deadline_in(ms * 1000);
            let actual = s.sleep_tree.insert(key, deadline);
            let co = &mut s.coroutines[key.0];
            co.sleep_deadline = Some(actual);
            co.status.remove(Status::READY);
            co.status.insert(Status::SLEEPING);
        });
    }
    leave(key);
}

/// Mark the current coroutine detached: the scheduler frees it on exit
/// instead of leaving reclamation to its creator.
///
/// In practice every coroutine that runs to completion is freed
/// regardless, since the trampoline sets `DETACH` unconditionally on
/// normal exit — calling this early only matters if the
/// coroutine is torn down before returning.
pub fn detach() {
    let key = current_key_or_panic();
    with_scheduler(|s| s.coroutines[key.0].status.insert(Status::DETACH));
}

/// Park the current coroutine on `fd` for the given interest, with an
/// optional timeout (`NO_TIMEOUT` for none). Returns when the fd becomes
/// ready or the timeout fires; the caller distinguishes the two by
/// checking `current_status()` for `EXPIRED`/`FDEOF` afterward.
///
/// # Panics
/// If the current coroutine is already parked on a descriptor.
pub fn park(fd: RawFd, interest: Interest, timeout_ms: u64) {
    let key = current_key_or_panic();
    with_scheduler(|s| {
        assert!(
            !s.coroutines[key.0].status.is_waiting(),
            "coroutine {} is already parked on a descriptor",
            s.coroutines[key.0].id.0
        );
        s.poller.register(fd, interest).expect("poller register failed");
        s.wait_tree.insert(fd, key);
        let co = &mut s.coroutines[key.0];
        co.wait_fd = Some(fd);
        co.wait_interest = Some(interest);
        co.status.remove(Status::READY);
        co.status.insert(if interest.readable { Status::WAIT_READ } else { Status::WAIT_WRITE });

        if timeout_ms != NO_TIMEOUT {
            let deadline = s.clock.deadline_in(timeout_ms * 1000);
            let actual = s.sleep_tree.insert(key, deadline);
            s.coroutines[key.0].sleep_deadline = Some(actual);
            s.coroutines[key.0].status.insert(Status::SLEEPING);
        }
    });
    leave(key);
}

/// Remove and return the waiter on `fd`, clearing any associated
/// timeout, and mark it ready.
pub fn unpark(fd: RawFd) -> Option<CoroutineId> {
    with_scheduler(|s| {
        let key = s.wait_tree.remove(fd)?;
        if let Some(deadline) = s.coroutines[key.0].sleep_deadline.take() {
            s.sleep_tree.remove(deadline);
        }
        let co = &mut s.coroutines[key.0];
        sleep_tree::clear_sleep_bits(&mut co.status);
        co.status.remove(Status::WAIT_READ | Status::WAIT_WRITE);
        co.status.insert(Status::READY);
        co.wait_fd = None;
        co.wait_interest = None;
        let id = co.id;
        let _ = s.poller.unregister(fd);
        s.ready.push_back(key);
        Some(id)
    })
}

/// Status bits of the current coroutine, for shim layers to inspect
/// after `park()` returns (e.g. to distinguish timeout from readiness).
pub fn current_status() -> Option<Status> {
    let key = current_key()?;
    Some(with_scheduler(|s| s.coroutines[key.0].status))
}

/// Voluntary-yield heuristic: call from inside a tight loop that would
/// otherwise monopolize the CPU. Every `renice_threshold` calls, requeues
/// and yields.
pub fn renice() {
    let key = current_key_or_panic();
    let should_yield = with_scheduler(|s| {
        let threshold = s.renice_threshold;
        let co = &mut s.coroutines[key.0];
        co.ops += 1;
        if co.ops >= threshold {
            co.ops = 0;
            co.status.insert(Status::READY);
            s.ready.push_back(key);
            true
        } else {
            false
        }
    });
    if should_yield {
        leave(key);
    }
}

/// Drive this thread's scheduler loop to completion.
/// A no-op if no coroutine has ever been spawned on this thread.
pub fn run() {
    if !scheduler_exists() {
        return;
    }
    loop {
        let done = with_scheduler(|s| s.run_iteration());
        if done {
            break;
        }
    }
    SCHEDULER.with(|cell| unsafe {
        *cell.get() = None;
    });
}

#[cfg(test)]
pub(crate) fn spawn_with_poller<F>(config: Config, poller: Box<dyn Poller>, entry: F) -> CoroutineId
where
    F: FnOnce() + 'static,
{
    SCHEDULER.with(|cell| unsafe {
        let slot = &mut *cell.get();
        if slot.is_none() {
            *slot = Some(Scheduler::with_poller(config, poller).expect("scheduler init"));
        }
    });
    with_scheduler(|s| s.spawn_coroutine(Box::new(entry)))
}

/// Clears any scheduler left on this (possibly pooled) test thread from a
/// previous test.
#[cfg(test)]
pub(crate) fn reset_for_tests() {
    SCHEDULER.with(|cell| unsafe {
        *cell.get() = None;
    });
}
