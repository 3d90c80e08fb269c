//! Shared error type
//!
//! Library crates define their own error enums where the failure surface is
//! local (config loading, persistence). This type is the common currency at
//! the orchestration boundary where those surfaces meet.

use thiserror::Error;

/// Orchestrator-level errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("NLU error: {0}")]
    Nlu(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Turn deadline exceeded after {0}ms")]
    DeadlineExceeded(u64),

    #[error("Concurrent turn in flight for session {0}")]
    TurnInFlight(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error is user-fixable (surfaced directly) as opposed to a
    /// system fault (surfaced as a generic message).
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_classification() {
        assert!(Error::InvalidInput("empty".into()).is_user_error());
        assert!(!Error::Store("down".into()).is_user_error());
        assert!(!Error::TurnInFlight("s1".into()).is_user_error());
    }

    #[test]
    fn test_display() {
        let err = Error::DeadlineExceeded(30000);
        assert!(err.to_string().contains("30000"));
    }
}
