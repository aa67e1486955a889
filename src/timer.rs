//! Public timer handle
//!
//! [`Timer`] is a façade over the queue: it validates and converts time
//! units, forwards mutation, and owns the close-at-most-once state that
//! the three disposal surfaces and the drop path share.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::Span;

use crate::error::TimerError;
use crate::event::Event;
use crate::queue::{EntryKey, FireContext, TimerQueue};
use crate::ticks::{MAX_SUPPORTED_MS, TICKS_INFINITE};

/// A millisecond deadline or interval accepted by the timer surfaces.
///
/// Implemented for `i32`, `i64`, `u32` and [`Duration`]. On the signed
/// surfaces `-1` disables the value and anything below `-1` is rejected;
/// on the unsigned surface `u32::MAX` disables it. Finite values above
/// [`MAX_SUPPORTED_MS`] are rejected everywhere they can be expressed.
pub trait DueMs {
    fn into_ticks(self, what: &'static str) -> Result<u32, TimerError>;
}

impl DueMs for i64 {
    fn into_ticks(self, what: &'static str) -> Result<u32, TimerError> {
        match self {
            -1 => Ok(TICKS_INFINITE),
            v if v < -1 => Err(TimerError::OutOfRange(format!(
                "{what} must be -1 or non-negative, got {v}"
            ))),
            v if v > i64::from(MAX_SUPPORTED_MS) => Err(TimerError::OutOfRange(format!(
                "{what} must be at most {MAX_SUPPORTED_MS} ms, got {v}"
            ))),
            v => Ok(v as u32),
        }
    }
}

impl DueMs for i32 {
    fn into_ticks(self, what: &'static str) -> Result<u32, TimerError> {
        i64::from(self).into_ticks(what)
    }
}

impl DueMs for u32 {
    fn into_ticks(self, _what: &'static str) -> Result<u32, TimerError> {
        // u32::MAX is the disabled sentinel; every other value fits.
        Ok(self)
    }
}

impl DueMs for Duration {
    fn into_ticks(self, what: &'static str) -> Result<u32, TimerError> {
        let ms = self.as_millis();
        if ms > u128::from(MAX_SUPPORTED_MS) {
            return Err(TimerError::OutOfRange(format!(
                "{what} must be at most {MAX_SUPPORTED_MS} ms, got {ms}"
            )));
        }
        Ok(ms as u32)
    }
}

/// Which disposal surface succeeded first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseKind {
    Prompt,
    Notify,
    Async,
}

/// Future resolved once a canceled timer's callback has drained.
pub struct Quiescence {
    rx: Option<oneshot::Receiver<()>>,
}

impl Quiescence {
    pub(crate) fn ready() -> Self {
        Self { rx: None }
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }

    /// True if quiescence had already been reached when the cancel call
    /// returned.
    pub fn is_ready(&self) -> bool {
        self.rx.is_none()
    }

    /// Blocks the current thread until the callback has drained. Must not
    /// be called from an async context.
    pub fn wait(self) {
        if let Some(rx) = self.rx {
            // A dropped sender means the entry is gone, which is the same
            // terminal state.
            let _ = rx.blocking_recv();
        }
    }
}

impl Future for Quiescence {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.rx.as_mut() {
            None => Poll::Ready(()),
            Some(rx) => Pin::new(rx).poll(cx).map(|_| ()),
        }
    }
}

/// Builder for [`Timer`].
pub struct TimerBuilder {
    due: Result<u32, TimerError>,
    period: Result<u32, TimerError>,
    capture_span: bool,
    queue: Option<Arc<TimerQueue>>,
}

impl TimerBuilder {
    fn new() -> Self {
        Self {
            due: Ok(TICKS_INFINITE),
            period: Ok(TICKS_INFINITE),
            capture_span: true,
            queue: None,
        }
    }

    /// First deadline, in milliseconds from now. Defaults to disabled.
    pub fn due(mut self, due: impl DueMs) -> Self {
        self.due = due.into_ticks("due");
        self
    }

    /// Repeat interval. Zero or disabled means one-shot.
    pub fn period(mut self, period: impl DueMs) -> Self {
        self.period = period.into_ticks("period");
        self
    }

    /// Whether the callback runs inside the tracing span current at
    /// construction. Defaults to true.
    pub fn capture_span(mut self, capture: bool) -> Self {
        self.capture_span = capture;
        self
    }

    /// Schedule on a specific queue instead of the process-wide one.
    pub fn queue(mut self, queue: Arc<TimerQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Validates the accumulated parameters and creates the timer.
    pub fn spawn<F>(self, callback: F) -> Result<Timer, TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let due = self.due?;
        let period = self.period?;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::clone(TimerQueue::global()));
        let span = if self.capture_span {
            Some(Span::current())
        } else {
            None
        };
        let fire = FireContext {
            callback: Arc::new(callback),
            span,
        };
        let key = queue.create(fire, due, period);
        Ok(Timer {
            queue,
            key,
            closed: Mutex::new(None),
        })
    }
}

/// Handle to a scheduled timer.
///
/// Dropping the handle closes the timer if no disposal surface ran first;
/// the close happens exactly once regardless of path.
pub struct Timer {
    queue: Arc<TimerQueue>,
    key: EntryKey,
    closed: Mutex<Option<CloseKind>>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer").field("key", &self.key).finish()
    }
}

impl Timer {
    pub fn builder() -> TimerBuilder {
        TimerBuilder::new()
    }

    /// One-shot or periodic timer on the process-wide queue.
    pub fn spawn<F>(due: impl DueMs, period: impl DueMs, callback: F) -> Result<Timer, TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        TimerBuilder::new().due(due).period(period).spawn(callback)
    }

    /// Re-schedules the timer. A disabled `due` detaches it without
    /// closing; a later `change` may re-arm it.
    pub fn change(&self, due: impl DueMs, period: impl DueMs) -> Result<(), TimerError> {
        let due = due.into_ticks("due")?;
        let period = period.into_ticks("period")?;
        self.queue.change(self.key, due, period)
    }

    /// Stops the timer and returns immediately. A callback that already
    /// started may still be executing.
    pub fn cancel(&self) {
        {
            let mut closed = self.closed.lock().unwrap();
            if closed.is_some() {
                return;
            }
            *closed = Some(CloseKind::Prompt);
        }
        self.queue.close(self.key);
    }

    /// Stops the timer and signals `event` once the callback has drained.
    /// Fails if any disposal surface already ran.
    pub fn cancel_notify(&self, event: Arc<Event>) -> Result<(), TimerError> {
        {
            let mut closed = self.closed.lock().unwrap();
            if closed.is_some() {
                return Err(TimerError::AlreadyClosed);
            }
            *closed = Some(CloseKind::Notify);
        }
        self.queue.close_notify(self.key, event);
        Ok(())
    }

    /// Stops the timer; the returned future resolves once the callback
    /// has drained. Legal after [`cancel`](Timer::cancel) and after a
    /// previous `cancel_async`, but not after a successful
    /// [`cancel_notify`](Timer::cancel_notify): the event there may be
    /// auto-reset and consumed before any future could observe it.
    pub fn cancel_async(&self) -> Result<Quiescence, TimerError> {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed == Some(CloseKind::Notify) {
                return Err(TimerError::InvalidOperation(
                    "cancel_async after cancel_notify",
                ));
            }
            *closed = Some(CloseKind::Async);
        }
        Ok(self.queue.close_async(self.key))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Ok(closed) = self.closed.get_mut() {
            if closed.is_none() {
                self.queue.close(self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_conversion_table() {
        assert_eq!((-1i32).into_ticks("due"), Ok(TICKS_INFINITE));
        assert_eq!(0i32.into_ticks("due"), Ok(0));
        assert_eq!(250i64.into_ticks("due"), Ok(250));
        assert!(matches!(
            (-2i32).into_ticks("due"),
            Err(TimerError::OutOfRange(_))
        ));
        assert!(matches!(
            (i64::from(MAX_SUPPORTED_MS) + 1).into_ticks("due"),
            Err(TimerError::OutOfRange(_))
        ));
        assert_eq!(i64::from(MAX_SUPPORTED_MS).into_ticks("due"), Ok(MAX_SUPPORTED_MS));
    }

    #[test]
    fn test_unsigned_conversion() {
        assert_eq!(u32::MAX.into_ticks("due"), Ok(TICKS_INFINITE));
        assert_eq!(MAX_SUPPORTED_MS.into_ticks("due"), Ok(MAX_SUPPORTED_MS));
        assert_eq!(0u32.into_ticks("due"), Ok(0));
    }

    #[test]
    fn test_duration_conversion() {
        assert_eq!(Duration::from_millis(42).into_ticks("due"), Ok(42));
        assert!(matches!(
            Duration::from_secs(60 * 60 * 24 * 365).into_ticks("due"),
            Err(TimerError::OutOfRange(_))
        ));
    }
}
