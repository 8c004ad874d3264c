//! Runtime error types
//!
//! Three small enums, one per failure surface:
//! - `RuntimeError` for handle operations that require a specific lifecycle state
//! - `JoinError` for the outcome of awaiting a value-bearing task
//! - `RunError` for the outcome of a blocking run

use std::fmt;

/// Error from a handle operation attempted in the wrong lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The operation is only valid from a state the task has already left
    InvalidState(&'static str),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::InvalidState(msg) => write!(f, "invalid task state: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Outcome of awaiting a `Deferred` that did not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The task was cancelled before its body produced a value
    Cancelled,
    /// The task body failed; carries the captured failure message
    Failed(String),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Cancelled => write!(f, "task was cancelled"),
            JoinError::Failed(msg) => write!(f, "task body failed: {}", msg),
        }
    }
}

impl std::error::Error for JoinError {}

/// Outcome of a blocking run whose root task did not complete normally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The root task ended cancelled
    Cancelled,
    /// The root task failed; carries the first captured failure message
    Failed(String),
    /// No task is runnable and no timer is pending, but the root task is not
    /// terminal. On a single scheduler thread nothing can ever wake again, so
    /// the run reports the stall instead of parking forever.
    Stalled,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Cancelled => write!(f, "root task was cancelled"),
            RunError::Failed(msg) => write!(f, "root task failed: {}", msg),
            RunError::Stalled => {
                write!(f, "scheduler stalled: tasks are waiting but no timer is pending")
            }
        }
    }
}

impl std::error::Error for RunError {}
