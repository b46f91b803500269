//! Error types for eventcal.

use thiserror::Error;

/// Errors that can occur while expanding or exchanging calendars.
///
/// `InvalidRule` and `InvalidDateTime` only ever invalidate a single record; callers in
/// [`crate::publish`] and [`crate::ics`] turn them into skipped records. `MalformedDocument`
/// is fatal for a whole parse.
#[derive(Error, Debug)]
pub enum EventCalError {
    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid date-time: {0}")]
    InvalidDateTime(String),

    #[error("Malformed calendar document: {0}")]
    MalformedDocument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for eventcal operations.
pub type EventCalResult<T> = Result<T, EventCalError>;
