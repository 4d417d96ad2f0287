// src/errors.rs

// error handling for the gate and its collaborators

// dependencies
use thiserror::Error;

use crate::clock::ClockError;

/// Internal failures of the gate.
///
/// Blocks and quota denials are not errors; they are ordinary decisions.
/// Everything here is either a configuration mistake caught at construction
/// or a collaborator failure that the gate logs and absorbs.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GateError {
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("usage store error: {0}")]
    Store(String),

    #[error("subscription lookup error: {0}")]
    Subscription(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}
