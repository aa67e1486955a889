//! Shared test doubles: a hand-advanced tick source, a recording native
//! timer, and a worker pool drained explicitly by the test.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tickmux::{Job, NativeTimer, QueueConfig, TickSource, TimerQueue, WorkerPool};

pub struct ManualTicks(AtomicU32);

impl ManualTicks {
    pub fn new(start: u32) -> Arc<Self> {
        Arc::new(Self(AtomicU32::new(start)))
    }

    pub fn advance(&self, delta: u32) {
        let now = self.0.load(Ordering::SeqCst);
        self.0.store(now.wrapping_add(delta), Ordering::SeqCst);
    }
}

impl TickSource for ManualTicks {
    fn now_ticks(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records every arming request instead of waking anything; the test
/// drives sweeps itself.
pub struct ManualDriver {
    requests: Mutex<Vec<u32>>,
}

impl ManualDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn last(&self) -> Option<u32> {
        self.requests.lock().unwrap().last().copied()
    }

    pub fn take(&self) -> Vec<u32> {
        std::mem::take(&mut self.requests.lock().unwrap())
    }
}

impl NativeTimer for ManualDriver {
    fn schedule(&self, duration_ms: u32) {
        self.requests.lock().unwrap().push(duration_ms);
    }
}

/// Buffers jobs until the test drains them.
pub struct BufferPool {
    jobs: Mutex<VecDeque<Job>>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(VecDeque::new()),
        })
    }

    pub fn run_all(&self) {
        loop {
            let job = self.jobs.lock().unwrap().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl WorkerPool for BufferPool {
    fn enqueue(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }
}

pub fn manual_queue(
    start_tick: u32,
) -> (
    Arc<TimerQueue>,
    Arc<ManualTicks>,
    Arc<ManualDriver>,
    Arc<BufferPool>,
) {
    let ticks = ManualTicks::new(start_tick);
    let driver = ManualDriver::new();
    let pool = BufferPool::new();
    let queue = TimerQueue::with_parts(
        Arc::clone(&ticks) as Arc<dyn TickSource>,
        Arc::clone(&driver) as Arc<dyn NativeTimer>,
        Arc::clone(&pool) as Arc<dyn WorkerPool>,
        QueueConfig::default(),
    );
    (queue, ticks, driver, pool)
}
