// src/clock.rs

// clock abstraction shared by every time-based decision in the gate

// dependencies
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub(crate) const NANOS_PER_SECOND: u64 = 1_000_000_000;
pub(crate) const NANOS_PER_MINUTE: u64 = 60 * NANOS_PER_SECOND;
pub(crate) const NANOS_PER_HOUR: u64 = 60 * NANOS_PER_MINUTE;

/// Source of wall-clock time, in nanoseconds since the Unix epoch.
///
/// Block expiry, sliding windows and period rollover all read time through
/// this trait so that tests can drive them deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<u64, ClockError>;
}

/// Clock error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("system clock is set before the Unix epoch")]
    SystemTimeError,
}

/// Clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<u64, ClockError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .map_err(|_| ClockError::SystemTimeError)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Result<u64, ClockError> {
        (**self).now()
    }
}

/// Whole minutes until `deadline`, rounded up so a client never sees "0 minutes"
/// while still blocked.
pub(crate) fn minutes_until(now: u64, deadline: u64) -> u64 {
    deadline.saturating_sub(now).div_ceil(NANOS_PER_MINUTE)
}
