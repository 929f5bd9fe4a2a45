//! CSV row source
//!
//! Wraps the `csv` crate's record reader as a blocking [`RowSource`](rowflow_core::RowSource),
//! parsing each cell into its declared column type.

mod parser;
mod reader;

pub use parser::CellParser;
pub use reader::{CsvReaderOptions, CsvRowSource};
