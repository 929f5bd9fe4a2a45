//! Error types for row streaming

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for row streaming operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shared handle to a foreign error raised by a row source
pub type SourceError = Arc<dyn StdError + Send + Sync + 'static>;

/// Error type for row streaming operations
///
/// Errors are cheap to clone because a fault recorded when a channel
/// completes is handed to every reader that tries to read past it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Invalid argument supplied at construction time
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested columns are absent from the active result set
    #[error("Missing columns: {}", .missing.join(", "))]
    MissingColumns {
        /// Every requested name that had no matching column
        missing: Vec<String>,
    },

    /// A mapping or row was used against a result set it was not built for
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Column lookup by name failed
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Column lookup by ordinal failed
    #[error("Column ordinal {ordinal} out of range for {field_count} columns")]
    OrdinalOutOfRange {
        /// Requested ordinal
        ordinal: usize,
        /// Number of columns in the result set
        field_count: usize,
    },

    /// Row does not have the width its result set implies
    #[error("Row width mismatch: expected {expected} values, found {actual}")]
    RowWidthMismatch {
        /// Width implied by the mapping or schema
        expected: usize,
        /// Width of the offending row
        actual: usize,
    },

    /// The underlying cursor raised an error while advancing or reading
    #[error("Cursor fault: {0}")]
    Cursor(#[source] SourceError),

    /// The operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// A column value could not be assigned to a record member
    #[error("Type mismatch converting column '{column}' into member '{member}': {reason}")]
    TypeMismatch {
        /// Column the value was read from
        column: String,
        /// Record member the value was destined for
        member: String,
        /// Conversion failure detail
        reason: String,
    },

    /// Every writer went away without completing the channel
    #[error("Channel writer dropped before completing the channel")]
    WriterDropped,

    /// Invalid pipeline configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background stage panicked or was aborted
    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Wrap a foreign error raised by a row source as a cursor fault
    pub fn cursor<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Cursor(Arc::new(error))
    }

    /// Build a cursor fault from a plain message
    pub fn cursor_message(message: impl Into<String>) -> Self {
        Self::cursor(CursorMessage(message.into()))
    }

    /// Whether this error records a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error was raised by the row source itself
    pub fn is_cursor_fault(&self) -> bool {
        matches!(self, Self::Cursor(_))
    }
}

/// Message-only cursor failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorMessage(pub String);

impl fmt::Display for CursorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for CursorMessage {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_lists_every_name() {
        let err = Error::MissingColumns {
            missing: vec!["Ghost".into(), "Phantom".into()],
        };
        assert_eq!(err.to_string(), "Missing columns: Ghost, Phantom");
    }

    #[test]
    fn cursor_fault_keeps_source() {
        let err = Error::cursor(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert!(err.is_cursor_fault());
        assert!(!err.is_cancelled());
        assert!(StdError::source(&err).is_some());
        assert_eq!(err.clone().to_string(), "Cursor fault: disk gone");
    }

    #[test]
    fn cancellation_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::cursor_message("boom").is_cancelled());
    }
}
