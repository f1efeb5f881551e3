//! Readiness poller adapter.
//!
//! The readiness backend itself — the kernel event-notification facility
//! — is named only by contract: register / modify / unregister /
//! wait-with-timeout. `Poller` is that contract as a trait; `MioPoller`
//! is this crate's concrete adapter over `mio::Poll`, kept thin (a
//! register/reregister/deregister/poll wrapper, no protocol logic).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest as MioInterest, Poll, Token};

use crate::coroutine::Interest;
use crate::error::{Error, Result};

/// A single readiness notification for one fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
}

/// The contract the scheduler needs from a readiness backend. Not bound
/// to any specific kernel API — `MioPoller` is one
/// implementation; tests use `FakePoller`.
pub trait Poller {
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()>;
    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()>;
    fn unregister(&mut self, fd: RawFd) -> Result<()>;

    /// Block for up to `timeout` (None = forever, `Some(Duration::ZERO)`
    /// = don't block), returning whatever events are ready. Must retry
    /// internally on `EINTR` — callers never see it.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>>;
}

fn to_mio_interest(interest: Interest) -> MioInterest {
    match (interest.readable, interest.writable) {
        (true, true) => MioInterest::READABLE | MioInterest::WRITABLE,
        (true, false) => MioInterest::READABLE,
        (false, true) => MioInterest::WRITABLE,
        (false, false) => MioInterest::READABLE,
    }
}

/// Adapts `mio::Poll` to the `Poller` contract.
pub struct MioPoller {
    poll: Poll,
    events: Events,
}

impl MioPoller {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().map_err(Error::PollerCreate)?;
        Ok(MioPoller { poll, events: Events::with_capacity(1024) })
    }
}

impl Poller for MioPoller {
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), to_mio_interest(interest))
            .map_err(Error::PollerCreate)
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), Token(fd as usize), to_mio_interest(interest))
            .map_err(Error::PollerCreate)
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        match self.poll.registry().deregister(&mut SourceFd(&fd)) {
            Ok(()) => Ok(()),
            // Already gone (e.g. the socket closed first) is not an error
            // the core needs to see.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::PollerCreate(e)),
        }
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::PollerCreate(e)),
            }
        }
        Ok(self
            .events
            .iter()
            .map(|ev| ReadyEvent {
                fd: ev.token().0 as RawFd,
                readable: ev.is_readable(),
                writable: ev.is_writable(),
                hangup: ev.is_hup() || ev.is_error(),
            })
            .collect())
    }
}

#[cfg(test)]
pub use fake::FakePoller;

#[cfg(test)]
mod fake {
    use super::*;
    use std::collections::HashMap;

    /// A synchronous, in-memory stand-in for a kernel poller, used in
    /// tests to drive the timed-wait and hangup scenarios without real
    /// sockets. Tests push readiness with `mark_ready`/`mark_hangup`
    /// before calling `wait`.
    #[derive(Default)]
    pub struct FakePoller {
        registered: HashMap<RawFd, Interest>,
        pending: Vec<ReadyEvent>,
    }

    impl FakePoller {
        pub fn new() -> Self {
            FakePoller { registered: HashMap::new(), pending: Vec::new() }
        }

        pub fn mark_ready(&mut self, fd: RawFd, readable: bool, writable: bool) {
            self.pending.push(ReadyEvent { fd, readable, writable, hangup: false });
        }

        pub fn mark_hangup(&mut self, fd: RawFd) {
            self.pending.push(ReadyEvent { fd, readable: true, writable: false, hangup: true });
        }
    }

    impl Poller for FakePoller {
        fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
            self.registered.insert(fd, interest);
            Ok(())
        }

        fn modify(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
            self.registered.insert(fd, interest);
            Ok(())
        }

        fn unregister(&mut self, fd: RawFd) -> Result<()> {
            self.registered.remove(&fd);
            Ok(())
        }

        fn wait(&mut self, _timeout: Option<std::time::Duration>) -> Result<Vec<ReadyEvent>> {
            Ok(std::mem::take(&mut self.pending))
        }
    }
}
