//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Event store operation failed.
    #[error("event store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    /// Journal line could not be decoded.
    #[error("journal line {line} is corrupt: {reason}")]
    CorruptJournal { line: usize, reason: String },

    /// Invalid event data.
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// Channel closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// Subscriber fell behind and missed events.
    #[error("subscriber lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Object name is not a valid DNS-1123 label.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt journal error.
    pub fn corrupt_journal(line: usize, reason: impl Into<String>) -> Self {
        Self::CorruptJournal {
            line,
            reason: reason.into(),
        }
    }

    /// Create an invalid event error.
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store_failed("append", "disk full");
        assert!(err.to_string().contains("append"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_corrupt_journal_names_line() {
        let err = Error::corrupt_journal(7, "expected value");
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_invalid_name_display() {
        let err = Error::invalid_name("Web", "uppercase");
        assert!(err.to_string().contains("'Web'"));
    }
}
