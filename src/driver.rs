//! Platform one-shot timer adapter
//!
//! The queue arms at most one outstanding native duration at a time; the
//! default adapter realizes that contract with a single parked thread.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::queue::TimerQueue;
use crate::ticks::MAX_NATIVE_MS;

/// Single-slot one-shot wake source.
///
/// `schedule` arranges for the queue sweep to run no later than
/// `duration_ms` from now; calling it again replaces any outstanding
/// request. Implementations silently clamp to the platform maximum.
pub trait NativeTimer: Send + Sync + 'static {
    fn schedule(&self, duration_ms: u32);
}

struct DriverState {
    /// Absolute deadline of the pending request, if any.
    wake_at: Option<Instant>,
    shutdown: bool,
}

struct DriverShared {
    state: Mutex<DriverState>,
    cond: Condvar,
}

/// Dedicated-thread implementation of [`NativeTimer`].
///
/// The thread holds the queue weakly so a dropped queue (test queues,
/// embedder-owned queues) releases its driver rather than leaking it; the
/// thread also exits when its `ThreadDriver` handle is dropped.
pub struct ThreadDriver {
    shared: Arc<DriverShared>,
}

impl ThreadDriver {
    pub fn spawn(queue: Weak<TimerQueue>, thread_name: &str) -> Self {
        let shared = Arc::new(DriverShared {
            state: Mutex::new(DriverState {
                wake_at: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run(thread_shared, queue))
            .expect("failed to spawn timer driver thread");
        Self { shared }
    }
}

impl NativeTimer for ThreadDriver {
    fn schedule(&self, duration_ms: u32) {
        let duration_ms = duration_ms.min(MAX_NATIVE_MS);
        let mut state = self.shared.state.lock().unwrap();
        state.wake_at = Some(Instant::now() + Duration::from_millis(u64::from(duration_ms)));
        trace!(duration_ms, "native timer armed");
        self.shared.cond.notify_one();
    }
}

impl Drop for ThreadDriver {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.shutdown = true;
        self.shared.cond.notify_one();
    }
}

fn run(shared: Arc<DriverShared>, queue: Weak<TimerQueue>) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return;
        }
        match state.wake_at {
            None => {
                state = shared.cond.wait(state).unwrap();
            }
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    // May wake early or because the request was replaced;
                    // the loop re-reads the deadline either way.
                    let (guard, _) = shared.cond.wait_timeout(state, deadline - now).unwrap();
                    state = guard;
                } else {
                    state.wake_at = None;
                    drop(state);
                    match queue.upgrade() {
                        Some(queue) => queue.fire_next_timers(),
                        None => return,
                    }
                    state = shared.state.lock().unwrap();
                }
            }
        }
    }
}
