use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetpulseError {
    /// A poll for this connector is already queued or running.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backpressure: {queued} tasks queued (bound {bound})")]
    Backpressure { queued: usize, bound: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NetpulseError {
    /// Convert a poisoned lock into an `Internal` error.
    pub fn poisoned<T>(what: &str, err: std::sync::PoisonError<T>) -> Self {
        NetpulseError::Internal(format!("{} lock poisoned: {}", what, err))
    }
}

pub type Result<T> = std::result::Result<T, NetpulseError>;
