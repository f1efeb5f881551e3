//! Black-box scheduler scenarios driven purely through the public API,
//! exercised over the real `mio`-backed poller (the fd-driven scenarios
//! live in `src/scenario_tests.rs`, against `FakePoller`, since that
//! backend isn't reachable from outside the crate).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

#[test]
fn single_sleeping_coroutine_runs_to_completion() {
    let woke = Rc::new(RefCell::new(false));
    let woke2 = woke.clone();
    let start = Instant::now();
    nyco::spawn(move || {
        nyco::sleep(20);
        *woke2.borrow_mut() = true;
    })
    .unwrap();
    nyco::run();

    assert!(*woke.borrow());
    assert!(start.elapsed().as_millis() >= 15);
}

#[test]
fn two_coroutines_ping_pong_in_fifo_order() {
    let log = Rc::new(RefCell::new(Vec::new()));

    let log_a = log.clone();
    nyco::spawn(move || {
        for i in 0..5 {
            log_a.borrow_mut().push(('A', i));
            nyco::yield_now();
        }
    })
    .unwrap();
    let log_b = log.clone();
    nyco::spawn(move || {
        for i in 0..5 {
            log_b.borrow_mut().push(('B', i));
            nyco::yield_now();
        }
    })
    .unwrap();

    nyco::run();

    let order = log.borrow().clone();
    let expected: Vec<(char, i32)> = (0..5).flat_map(|i| [('A', i), ('B', i)]).collect();
    assert_eq!(order, expected);
}

#[test]
fn detached_coroutine_is_freed_without_a_join() {
    let ran = Rc::new(RefCell::new(false));
    let ran2 = ran.clone();
    nyco::spawn(move || {
        nyco::detach();
        nyco::yield_now();
        *ran2.borrow_mut() = true;
    })
    .unwrap();
    nyco::run();
    assert!(*ran.borrow());
}

#[test]
fn current_is_none_outside_a_coroutine() {
    assert_eq!(nyco::current(), None);
}

#[test]
fn nested_spawn_from_inside_a_coroutine() {
    let child_ran = Rc::new(RefCell::new(false));
    let child_ran2 = child_ran.clone();
    nyco::spawn(move || {
        nyco::spawn(move || {
            *child_ran2.borrow_mut() = true;
        })
        .unwrap();
        nyco::yield_now();
    })
    .unwrap();
    nyco::run();
    assert!(*child_ran.borrow());
}
