//! tickmux - managed timers multiplexed onto one platform timer
//!
//! This crate schedules an unbounded population of logical timers on a
//! single underlying one-shot wake source. Timers are one-shot or
//! periodic; callbacks are dispatched on a worker pool (the first expired
//! callback of a sweep runs on the sweeping thread). The active set is a
//! linked list rather than a priority structure: timeouts are created and
//! torn down far more often than they expire, so O(1) churn is worth an
//! O(n) sweep.
//!
//! ## Disposal
//!
//! A [`Timer`] can be stopped three ways: [`Timer::cancel`] returns
//! immediately, [`Timer::cancel_notify`] sets an [`Event`] once the
//! callback has drained, and [`Timer::cancel_async`] returns a
//! [`Quiescence`] future with the same guarantee. Dropping the handle
//! closes the timer if nothing else did.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use tickmux::Timer;
//!
//! let fired = Arc::new(AtomicU32::new(0));
//! let seen = Arc::clone(&fired);
//! let timer = Timer::spawn(20i32, 0i32, move || {
//!     seen.fetch_add(1, Ordering::SeqCst);
//! })?;
//! std::thread::sleep(std::time::Duration::from_millis(300));
//! assert_eq!(fired.load(Ordering::SeqCst), 1);
//! drop(timer);
//! # Ok::<(), tickmux::TimerError>(())
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod pool;
pub mod queue;
pub mod ticks;
pub mod timer;

pub use config::QueueConfig;
pub use driver::{NativeTimer, ThreadDriver};
pub use error::TimerError;
pub use event::Event;
pub use pool::{Job, RayonPool, WorkerPool};
pub use queue::TimerQueue;
pub use ticks::{MonotonicTicks, TickSource, MAX_NATIVE_MS, MAX_SUPPORTED_MS, TICKS_INFINITE};
pub use timer::{DueMs, Quiescence, Timer, TimerBuilder};
