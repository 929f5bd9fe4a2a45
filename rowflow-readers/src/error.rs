//! Error types for row source readers

use thiserror::Error;

/// Error type for row source readers
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] rowflow_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV format error
    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Cell text that does not parse as its column type
    #[error("Cannot parse {text:?} in column '{column}' as {data_type}")]
    Parse {
        /// Column name
        column: String,
        /// Declared column type
        data_type: rowflow_core::DataType,
        /// Offending cell text
        text: String,
    },

    /// Schema error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for row source readers
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for rowflow_core::Error {
    /// Reader failures surface as cursor faults at the row source boundary
    fn from(error: Error) -> Self {
        match error {
            Error::Core(inner) => inner,
            Error::InvalidArgument(message) => rowflow_core::Error::InvalidArgument(message),
            other => rowflow_core::Error::cursor(other),
        }
    }
}
