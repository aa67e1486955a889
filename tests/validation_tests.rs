//! Input validation at the public surfaces.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::manual_queue;
use tickmux::{Timer, TimerError, MAX_SUPPORTED_MS};

fn noop() -> impl Fn() + Send + Sync + 'static {
    || {}
}

#[test]
fn test_builder_rejects_negative_due() {
    let err = Timer::builder().due(-2i32).spawn(noop()).unwrap_err();
    assert!(matches!(err, TimerError::OutOfRange(_)));
}

#[test]
fn test_builder_rejects_oversized_period() {
    let err = Timer::builder()
        .due(10i64)
        .period(i64::from(MAX_SUPPORTED_MS) + 1)
        .spawn(noop())
        .unwrap_err();
    assert!(matches!(err, TimerError::OutOfRange(_)));
}

#[test]
fn test_builder_rejects_oversized_duration() {
    let err = Timer::builder()
        .due(Duration::from_secs(100 * 24 * 60 * 60))
        .spawn(noop())
        .unwrap_err();
    assert!(matches!(err, TimerError::OutOfRange(_)));
}

#[test]
fn test_minus_one_disables() {
    let (queue, _ticks, _driver, _pool) = manual_queue(0);
    let timer = Timer::builder()
        .due(-1i32)
        .period(-1i64)
        .queue(Arc::clone(&queue))
        .spawn(noop())
        .unwrap();
    assert_eq!(queue.pending(), 0);

    // A disabled timer is still live; change arms it.
    timer.change(25u32, 0u32).unwrap();
    assert_eq!(queue.pending(), 1);
}

#[test]
fn test_unsigned_max_disables() {
    let (queue, _ticks, _driver, _pool) = manual_queue(0);
    let _timer = Timer::builder()
        .due(u32::MAX)
        .queue(Arc::clone(&queue))
        .spawn(noop())
        .unwrap();
    assert_eq!(queue.pending(), 0);
}

#[test]
fn test_change_validates_before_touching_the_timer() {
    let (queue, ticks, _driver, _pool) = manual_queue(0);
    let timer = Timer::builder()
        .due(50u32)
        .queue(Arc::clone(&queue))
        .spawn(noop())
        .unwrap();
    assert!(matches!(
        timer.change(-7i64, 0i64),
        Err(TimerError::OutOfRange(_))
    ));

    // The original schedule is untouched by the failed change.
    ticks.advance(50);
    queue.fire_next_timers();
    assert_eq!(queue.pending(), 0);
}

#[test]
fn test_zero_period_is_one_shot() {
    let (queue, ticks, _driver, pool) = manual_queue(0);
    let _timer = Timer::builder()
        .due(10u32)
        .period(0u32)
        .queue(Arc::clone(&queue))
        .spawn(noop())
        .unwrap();
    ticks.advance(10);
    queue.fire_next_timers();
    pool.run_all();
    // One-shot: detached after firing instead of rescheduling.
    assert_eq!(queue.pending(), 0);
}
