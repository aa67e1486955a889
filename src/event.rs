//! Manual-reset completion event
//!
//! The synchronous disposal surface hands one of these to the queue; it is
//! set exactly once, when the timer's last in-flight callback drains.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A manual-reset synchronization event.
///
/// Starts unsignaled. [`set`](Event::set) releases all current and future
/// waiters until [`reset`](Event::reset) is called.
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Signals the event, waking every waiter.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.cond.notify_all();
    }

    /// Returns the event to the unsignaled state.
    pub fn reset(&self) {
        *self.signaled.lock().unwrap() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock().unwrap()
    }

    /// Blocks until the event is signaled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap();
        }
    }

    /// Blocks until the event is signaled or `timeout` elapses.
    /// Returns true if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(signaled, deadline - now).unwrap();
            signaled = guard;
        }
        true
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
