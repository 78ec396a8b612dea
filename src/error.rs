// src/error.rs
//
// Error taxonomy for the scheduling core.
//
// Invalid ranges and use-after-dispose fail fast at the public API.
// Missing resources (unknown ids) are never errors; callers get `false`/`None`.

use thiserror::Error;

/// Error raised when a time expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("empty time expression")]
    Empty,

    #[error("unrecognized time expression '{0}'")]
    Unrecognized(String),

    #[error("note value '{0}' must be a power of two between 1 and 256")]
    Subdivision(String),
}

/// Error raised by clock, transport and draw operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    /// A time argument was negative, NaN or infinite.
    #[error("time must be finite and non-negative, got {0}")]
    InvalidTime(f64),

    /// A numeric argument was outside its valid range.
    #[error("{name} must be {expected}, got {value}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },

    /// Loop end does not come after loop start.
    #[error("loop end ({end} ticks) must be after loop start ({start} ticks)")]
    InvalidLoop { start: u64, end: u64 },

    /// The component was used after `dispose()`.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error(transparent)]
    Parse(#[from] TimeParseError),
}

pub type TimingResult<T> = Result<T, TimingError>;

/// Validate an absolute time in seconds.
#[inline]
pub(crate) fn check_time(time: f64) -> TimingResult<f64> {
    if time.is_finite() && time >= 0.0 {
        Ok(time)
    } else {
        Err(TimingError::InvalidTime(time))
    }
}

/// Validate a strictly positive, finite value.
#[inline]
pub(crate) fn check_positive(name: &'static str, value: f64) -> TimingResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(TimingError::InvalidValue {
            name,
            expected: "positive and finite",
            value,
        })
    }
}
