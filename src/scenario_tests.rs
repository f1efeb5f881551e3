//! End-to-end scheduler scenarios exercised against `FakePoller`, so the
//! timed-wait and hangup paths can be driven without a real socket.

use std::cell::RefCell;
use std::rc::Rc;

use crate::coroutine::Interest;
use crate::poller::FakePoller;
use crate::scheduler::{self, park, reset_for_tests, spawn_with_poller, Config, NO_TIMEOUT};
use crate::status::Status;

#[test]
fn timed_wait_fires_by_io() {
    reset_for_tests();
    let mut poller = FakePoller::new();
    poller.mark_ready(7, true, false);

    let observed = Rc::new(RefCell::new(None));
    let observed2 = observed.clone();
    spawn_with_poller(Config::new(), Box::new(poller), move || {
        park(7, Interest::read(), 5_000);
        *observed2.borrow_mut() = scheduler::current_status();
    });
    scheduler::run();

    let status = observed.borrow().expect("coroutine recorded its status");
    assert!(!status.contains(Status::EXPIRED));
    assert!(!status.contains(Status::FDEOF));
}

#[test]
fn timed_wait_fires_by_timeout() {
    reset_for_tests();
    let poller = FakePoller::new(); // never marked ready

    let observed = Rc::new(RefCell::new(None));
    let observed2 = observed.clone();
    spawn_with_poller(Config::new(), Box::new(poller), move || {
        park(11, Interest::read(), 1);
        *observed2.borrow_mut() = scheduler::current_status();
    });
    scheduler::run();

    let status = observed.borrow().expect("coroutine recorded its status");
    assert!(status.contains(Status::EXPIRED));
    assert!(!status.contains(Status::WAIT_READ));
}

#[test]
fn hangup_sets_fdeof() {
    reset_for_tests();
    let mut poller = FakePoller::new();
    poller.mark_hangup(13);

    let observed = Rc::new(RefCell::new(None));
    let observed2 = observed.clone();
    spawn_with_poller(Config::new(), Box::new(poller), move || {
        park(13, Interest::read(), NO_TIMEOUT);
        *observed2.borrow_mut() = scheduler::current_status();
    });
    scheduler::run();

    let status = observed.borrow().expect("coroutine recorded its status");
    assert!(status.contains(Status::FDEOF));
}

#[test]
fn unpark_wakes_waiter_without_touching_the_poller() {
    reset_for_tests();
    let poller = FakePoller::new();

    let woke = Rc::new(RefCell::new(false));
    let woke2 = woke.clone();
    spawn_with_poller(Config::new(), Box::new(poller), move || {
        park(21, Interest::read(), NO_TIMEOUT);
        *woke2.borrow_mut() = true;
    });
    scheduler::spawn(|| {
        scheduler::unpark(21);
    })
    .unwrap();
    scheduler::run();

    assert!(*woke.borrow());
}
