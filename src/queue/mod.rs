//! The managed timer queue
//!
//! A process-wide scheduler that multiplexes every live [`Timer`] onto a
//! single platform one-shot timer. Timers are created and torn down far
//! more often than they expire, so the active set is kept as a linked list
//! with O(1) insert and remove; a sweep over the whole list on each native
//! wake pays for that churn.
//!
//! One mutex guards the entry arena, the active list and the armed-native
//! state. Callbacks never run under it: the firing path records an
//! in-flight count, drops the lock, invokes, and re-acquires to settle
//! disposal bookkeeping. That keeps re-entrant timer calls from callbacks
//! legal and makes the disposal surfaces able to wait for quiescence.
//!
//! [`Timer`]: crate::Timer

mod slots;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use crate::config::QueueConfig;
use crate::driver::{NativeTimer, ThreadDriver};
use crate::error::TimerError;
use crate::event::Event;
use crate::pool::{RayonPool, WorkerPool};
use crate::ticks::{elapsed, MonotonicTicks, TickSource, MAX_NATIVE_MS, TICKS_INFINITE};
use crate::timer::Quiescence;

pub(crate) use slots::{EntryKey, FireContext};
use slots::{EntryArena, Notify};

static GLOBAL: OnceLock<Arc<TimerQueue>> = OnceLock::new();

struct QueueState {
    arena: EntryArena,
    /// Currently outstanding native duration; `TICKS_INFINITE` once the
    /// last wake has been consumed.
    armed_duration: u32,
    /// Tick at which `armed_duration` was requested.
    armed_start_tick: u32,
}

/// The timer scheduler. One lives for the whole process
/// ([`TimerQueue::global`]); tests and embedders may run their own with
/// injected collaborators.
pub struct TimerQueue {
    ticks: Arc<dyn TickSource>,
    pool: Arc<dyn WorkerPool>,
    driver: OnceLock<Arc<dyn NativeTimer>>,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl TimerQueue {
    /// The process-wide queue, created on first use.
    pub fn global() -> &'static Arc<TimerQueue> {
        GLOBAL.get_or_init(|| TimerQueue::start(QueueConfig::default()))
    }

    /// Starts a queue on the default tick source, driver and worker pool.
    pub fn start(config: QueueConfig) -> Arc<TimerQueue> {
        Self::start_with(
            Arc::new(MonotonicTicks::new()),
            Arc::new(RayonPool),
            config,
        )
    }

    /// Starts a queue with its own tick source and pool, driven by a
    /// dedicated [`ThreadDriver`].
    pub fn start_with(
        ticks: Arc<dyn TickSource>,
        pool: Arc<dyn WorkerPool>,
        config: QueueConfig,
    ) -> Arc<TimerQueue> {
        let queue = Arc::new(Self::new_inner(ticks, pool, config.clone()));
        let driver = ThreadDriver::spawn(Arc::downgrade(&queue), &config.driver_thread_name);
        let _ = queue.driver.set(Arc::new(driver));
        queue
    }

    /// Builds a queue around injected collaborators. The driver receives
    /// arming requests but nothing sweeps until `fire_next_timers` is
    /// called, which makes the queue fully deterministic under test.
    pub fn with_parts(
        ticks: Arc<dyn TickSource>,
        driver: Arc<dyn NativeTimer>,
        pool: Arc<dyn WorkerPool>,
        config: QueueConfig,
    ) -> Arc<TimerQueue> {
        let queue = Arc::new(Self::new_inner(ticks, pool, config));
        let _ = queue.driver.set(driver);
        queue
    }

    fn new_inner(
        ticks: Arc<dyn TickSource>,
        pool: Arc<dyn WorkerPool>,
        config: QueueConfig,
    ) -> Self {
        Self {
            ticks,
            pool,
            driver: OnceLock::new(),
            config,
            state: Mutex::new(QueueState {
                arena: EntryArena::new(),
                armed_duration: TICKS_INFINITE,
                armed_start_tick: 0,
            }),
        }
    }

    /// Number of timers currently scheduled (finite due).
    pub fn pending(&self) -> usize {
        self.lock_state().arena.linked_len()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap()
    }

    // ---- entry operations ------------------------------------------------

    /// Allocates an entry and, unless `due` is disabled, schedules it.
    pub(crate) fn create(&self, fire: FireContext, due: u32, period: u32) -> EntryKey {
        let mut state = self.lock_state();
        let key = state.arena.insert(fire);
        debug!(slot = key.slot, due, period, "timer created");
        if due != TICKS_INFINITE {
            self.update_locked(&mut state, key.slot, due, period);
        }
        key
    }

    /// Re-schedules (or disables) an entry.
    pub(crate) fn change(&self, key: EntryKey, due: u32, period: u32) -> Result<(), TimerError> {
        let mut state = self.lock_state();
        match state.arena.get(key) {
            None => return Err(TimerError::Disposed),
            Some(record) if record.canceled => return Err(TimerError::Disposed),
            Some(_) => {}
        }
        if due == TICKS_INFINITE {
            self.delete_locked(&mut state, key.slot);
        } else {
            self.update_locked(&mut state, key.slot, due, period);
        }
        Ok(())
    }

    /// Prompt close: detach and mark canceled. A callback already running
    /// keeps running; the entry is released once it drains.
    pub(crate) fn close(&self, key: EntryKey) {
        let mut state = self.lock_state();
        match state.arena.get(key) {
            None => return,
            Some(record) if record.canceled => return,
            Some(_) => {}
        }
        self.delete_locked(&mut state, key.slot);
        let record = state.arena.record_mut(key.slot);
        record.canceled = true;
        debug!(slot = key.slot, in_flight = record.in_flight, "timer closed");
        if record.in_flight == 0 {
            state.arena.release(key.slot);
        }
    }

    /// Close and signal `event` once no callback of this entry is
    /// executing. The event is set outside the lock.
    pub(crate) fn close_notify(&self, key: EntryKey, event: Arc<Event>) {
        let signal_now = {
            let mut state = self.lock_state();
            match state.arena.get(key) {
                // Already quiescent and released.
                None => true,
                Some(_) => {
                    let canceled = state.arena.record(key.slot).canceled;
                    if !canceled {
                        self.delete_locked(&mut state, key.slot);
                        state.arena.record_mut(key.slot).canceled = true;
                    }
                    let record = state.arena.record_mut(key.slot);
                    if record.in_flight == 0 {
                        state.arena.release(key.slot);
                        true
                    } else {
                        debug_assert!(matches!(record.notify, Notify::None));
                        record.notify = Notify::Event(event.clone());
                        false
                    }
                }
            }
        };
        if signal_now {
            event.set();
        }
    }

    /// Close and return a future resolved once no callback of this entry
    /// is executing. Repeated calls each get a future; all of them resolve
    /// at quiescence.
    pub(crate) fn close_async(&self, key: EntryKey) -> Quiescence {
        let mut state = self.lock_state();
        match state.arena.get(key) {
            None => return Quiescence::ready(),
            Some(_) => {}
        }
        let canceled = state.arena.record(key.slot).canceled;
        if !canceled {
            self.delete_locked(&mut state, key.slot);
            state.arena.record_mut(key.slot).canceled = true;
        }
        let record = state.arena.record_mut(key.slot);
        if record.in_flight == 0 {
            debug_assert!(matches!(record.notify, Notify::None));
            state.arena.release(key.slot);
            return Quiescence::ready();
        }
        let (tx, rx) = oneshot::channel();
        match &mut record.notify {
            Notify::None => record.notify = Notify::Futures(vec![tx]),
            Notify::Futures(senders) => senders.push(tx),
            // The handle rejects the async surface once the signal surface
            // has claimed the slot.
            Notify::Event(_) => unreachable!("async close after signal close"),
        }
        Quiescence::waiting(rx)
    }

    /// Runs the entry's callback, tracking the in-flight count. Stale keys
    /// and canceled entries return silently.
    pub(crate) fn fire(&self, key: EntryKey) {
        let context = {
            let mut state = self.lock_state();
            match state.arena.get_mut(key) {
                None => return,
                Some(record) if record.canceled => return,
                Some(record) => {
                    record.in_flight += 1;
                    record.fire.clone()
                }
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| match &context.span {
            Some(span) => span.in_scope(|| (context.callback)()),
            None => (context.callback)(),
        }));
        if outcome.is_err() {
            error!(slot = key.slot, "timer callback panicked");
        }

        let notify = {
            let mut state = self.lock_state();
            let record = state
                .arena
                .get_mut(key)
                .expect("in-flight timer entry released early");
            record.in_flight -= 1;
            if record.canceled && record.in_flight == 0 {
                let notify = std::mem::replace(&mut record.notify, Notify::None);
                state.arena.release(key.slot);
                Some(notify)
            } else {
                None
            }
        };
        if let Some(notify) = notify {
            release_quiescent(notify);
        }
    }

    // ---- scheduling ------------------------------------------------------

    fn update_locked(&self, state: &mut QueueState, slot: u32, due: u32, period: u32) {
        debug_assert_ne!(due, TICKS_INFINITE);
        let now = self.ticks.now_ticks();
        if state.arena.record(slot).due_offset == TICKS_INFINITE {
            state.arena.link_head(slot);
        }
        let record = state.arena.record_mut(slot);
        record.due_offset = due;
        record.period = if period == 0 { TICKS_INFINITE } else { period };
        record.start_tick = now;
        trace!(slot, due, "timer scheduled");
        self.ensure_armed_by(state, due);
    }

    fn delete_locked(&self, state: &mut QueueState, slot: u32) {
        if state.arena.record(slot).due_offset == TICKS_INFINITE {
            return;
        }
        state.arena.unlink(slot);
        let record = state.arena.record_mut(slot);
        record.due_offset = TICKS_INFINITE;
        record.period = TICKS_INFINITE;
        record.start_tick = 0;
    }

    /// Arms the native timer so a wake happens within `requested` ms.
    /// Arming is monotonic in "earliest next wake": an outstanding request
    /// that is imminent or already sooner is left alone.
    fn ensure_armed_by(&self, state: &mut QueueState, requested: u32) {
        let actual = requested.min(MAX_NATIVE_MS);
        if state.armed_duration != TICKS_INFINITE {
            let gone = elapsed(self.ticks.now_ticks(), state.armed_start_tick);
            if gone >= state.armed_duration {
                // The outstanding wake is imminent; let the sweep re-arm.
                return;
            }
            if actual >= state.armed_duration - gone {
                return;
            }
        }
        if let Some(driver) = self.driver.get() {
            driver.schedule(actual);
        }
        state.armed_duration = actual;
        state.armed_start_tick = self.ticks.now_ticks();
    }

    /// One sweep of the active list, invoked on every native wake.
    ///
    /// Expired one-shots are detached; expired periodics restart their
    /// interval shortened by the observed overrun (floored at 1 ms) so
    /// fire times do not drift. The first expired callback runs on the
    /// calling thread; the rest go to the worker pool.
    pub fn fire_next_timers(self: &Arc<Self>) {
        let mut first_to_fire: Option<EntryKey> = None;
        {
            let mut state = self.lock_state();
            state.armed_duration = TICKS_INFINITE;
            let now = self.ticks.now_ticks();
            let mut next_duration = TICKS_INFINITE;
            let mut expired = 0u32;
            let mut cursor = state.arena.head;
            while let Some(slot) = cursor {
                let (next, start_tick, due_offset, period) = {
                    let record = state.arena.record(slot);
                    (record.next, record.start_tick, record.due_offset, record.period)
                };
                // Capture before any unlink below.
                cursor = next;
                let gone = elapsed(now, start_tick);
                if gone >= due_offset {
                    if period != TICKS_INFINITE {
                        let overrun = gone - due_offset;
                        let next_due = if overrun < period { period - overrun } else { 1 };
                        let record = state.arena.record_mut(slot);
                        record.start_tick = now;
                        record.due_offset = next_due;
                        next_duration = next_duration.min(next_due);
                    } else {
                        self.delete_locked(&mut state, slot);
                    }
                    expired += 1;
                    let key = EntryKey {
                        slot,
                        generation: state.arena.generation(slot),
                    };
                    if first_to_fire.is_none() && self.config.inline_first_fire {
                        first_to_fire = Some(key);
                    } else {
                        let queue = Arc::clone(self);
                        self.pool.enqueue(Box::new(move || queue.fire(key)));
                    }
                } else {
                    next_duration = next_duration.min(due_offset - gone);
                }
            }
            if next_duration != TICKS_INFINITE {
                self.ensure_armed_by(&mut state, next_duration);
            }
            trace!(expired, next_duration, "sweep complete");
        }
        if let Some(key) = first_to_fire {
            self.fire(key);
        }
    }
}

fn release_quiescent(notify: Notify) {
    match notify {
        Notify::None => {}
        Notify::Event(event) => event.set(),
        Notify::Futures(senders) => {
            for sender in senders {
                let _ = sender.send(());
            }
        }
    }
}
