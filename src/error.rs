//! Timer-specific error types

use thiserror::Error;

/// Errors returned by timer construction, mutation and disposal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Timer has been disposed")]
    Disposed,

    #[error("Timer already closed")]
    AlreadyClosed,

    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
}
