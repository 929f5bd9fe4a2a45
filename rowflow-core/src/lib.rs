//! Core values, rows, schemas and traits for streaming tabular cursors
//!
//! This crate provides the foundational pieces every other rowflow crate
//! builds on: column values with an explicit database-null sentinel, rows
//! whose storage can be pooled, schema snapshots with case-insensitive
//! ordinal lookup, the row source traits that wrap a blocking cursor, and
//! the row transform seam used by typed pipelines.

#![warn(missing_docs)]

pub mod buffer;
pub mod error;
pub mod mapping;
pub mod memory;
pub mod row;
pub mod schema;
pub mod source;
pub mod transform;
pub mod value;

// Re-export key types for convenience
pub use buffer::QueryResultQueue;
pub use error::{Error, Result};
pub use mapping::{ColumnOrdinal, ColumnOrdinalMapping, MappingOrder, OrdinalMapper};
pub use memory::{RowPool, RowPoolStats};
pub use row::Row;
pub use schema::{fold_name, names_match, DataType, Field, Schema};
pub use source::{AsyncRowSource, RowSource};
pub use transform::{FnTransform, PassThrough, RowTransform};
pub use value::Value;

pub use tokio_util::sync::CancellationToken;
