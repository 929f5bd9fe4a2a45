//! Typed materialization of rows for rowflow pipelines
//!
//! A [`Record`] publishes a static table of settable members. A
//! [`RecordTransformer`] binds that table to the ordinals of one result set
//! once, then fills new records from rows without any per-row name lookup.

#![warn(missing_docs)]

pub mod convert;
pub mod materializer;
pub mod record;

pub use convert::{ConversionError, FromValue};
pub use materializer::{RecordTransformer, TransformerCache, TransformerOptions};
pub use record::{Member, Record, Setter};
