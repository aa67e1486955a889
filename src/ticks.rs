//! Monotonic millisecond tick source
//!
//! All scheduling arithmetic in the queue works on a wrapping 32-bit
//! millisecond counter. A span of up to ~49.7 days is representable; the
//! counter wrapping past zero is normal operation, so ticks are never
//! compared directly; consumers go through [`elapsed`].

use std::time::Instant;

/// Sentinel tick value meaning "disabled" / "not scheduled".
pub const TICKS_INFINITE: u32 = u32::MAX;

/// Largest duration ever requested from the platform one-shot timer
/// (~74 hours). Longer deadlines under-arm deliberately: the sweep finds
/// nothing due and re-arms with the recomputed remainder.
pub const MAX_NATIVE_MS: u32 = 0x0FFF_FFFF;

/// Largest finite due/period value accepted by the public surfaces.
pub const MAX_SUPPORTED_MS: u32 = 0xFFFF_FFFE;

/// Wrapping distance from `since` to `now` on the 32-bit tick circle.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Source of monotonic 32-bit millisecond ticks.
///
/// Implementations must be monotonic modulo wrap; the epoch is arbitrary.
pub trait TickSource: Send + Sync + 'static {
    /// Current tick count in milliseconds.
    fn now_ticks(&self) -> u32;
}

/// Tick source backed by [`Instant`].
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn now_ticks(&self) -> u32 {
        // Truncation to u32 is the wrap.
        self.origin.elapsed().as_millis() as u32
    }
}
