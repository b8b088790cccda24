//! Timer Manager errors.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::util::ids::TimerId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer {0} not found")]
    NotFound(TimerId),
    #[error("timer {0} already cancelled")]
    AlreadyCancelled(TimerId),
}
