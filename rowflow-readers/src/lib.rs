//! Row source implementations for rowflow pipelines
//!
//! This crate provides blocking cursors that implement
//! [`RowSource`](rowflow_core::RowSource): an in-memory source used for
//! fixtures and fault injection, and a CSV source behind the `csv` feature.

#![warn(missing_docs)]

mod error;
pub mod memory;

#[cfg(feature = "csv")]
pub mod csv;

pub use error::{Error, Result};
pub use memory::MemoryRowSource;

#[cfg(feature = "csv")]
pub use csv::{CsvReaderOptions, CsvRowSource};

// Re-export core types
pub use rowflow_core::{DataType, Field, RowSource, Schema, Value};
