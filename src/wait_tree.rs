//! Ordered set of coroutines parked on a file descriptor, keyed by fd.
//!
//! Only one waiter per fd is allowed; a second `insert` for an fd already
//! present is a programming error and traps.

use std::collections::BTreeMap;
use std::os::unix::io::RawFd;

use crate::coroutine::Key;

#[derive(Default)]
pub struct WaitTree {
    by_fd: BTreeMap<RawFd, Key>,
}

impl WaitTree {
    pub fn new() -> Self {
        WaitTree { by_fd: BTreeMap::new() }
    }

    /// # Panics
    /// If `fd` already has a waiter registered.
    pub fn insert(&mut self, fd: RawFd, key: Key) {
        let prev = self.by_fd.insert(fd, key);
        assert!(prev.is_none(), "duplicate waiter registered for fd {fd}");
    }

    pub fn search(&self, fd: RawFd) -> Option<Key> {
        self.by_fd.get(&fd).copied()
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Key> {
        self.by_fd.remove(&fd)
    }

    /// Unconditional removal of whatever waiter owns `key`, used on
    /// teardown. O(n) in the number of waiters; teardown is not a hot
    /// path.
    pub fn cancel(&mut self, key: Key) {
        if let Some(fd) = self
            .by_fd
            .iter()
            .find_map(|(fd, k)| if *k == key { Some(*fd) } else { None })
        {
            self.by_fd.remove(&fd);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_fd.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_and_remove_round_trip() {
        let mut tree = WaitTree::new();
        tree.insert(7, Key(0));
        assert_eq!(tree.search(7), Some(Key(0)));
        assert_eq!(tree.remove(7), Some(Key(0)));
        assert_eq!(tree.search(7), None);
    }

    #[test]
    #[should_panic(expected = "duplicate waiter")]
    fn duplicate_fd_registration_traps() {
        let mut tree = WaitTree::new();
        tree.insert(3, Key(0));
        tree.insert(3, Key(1));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut tree = WaitTree::new();
        assert_eq!(tree.remove(9), None);
        assert_eq!(tree.remove(9), None);
    }

    #[test]
    fn cancel_removes_by_key_regardless_of_fd() {
        let mut tree = WaitTree::new();
        tree.insert(5, Key(2));
        tree.cancel(Key(2));
        assert!(tree.is_empty());
    }
}
