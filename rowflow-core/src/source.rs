//! Row source traits for forward-only tabular cursors

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::schema::{fold_name, DataType, Schema};
use crate::value::Value;

/// A forward-only, single-pass cursor over the rows of a result set
///
/// A row source is owned by exactly one reader at a time. While a pump is
/// running against it nothing else may advance or read it, which the pump
/// enforces by taking the source by value.
pub trait RowSource: Send {
    /// Number of columns in the active result set
    fn field_count(&self) -> usize;

    /// Name of the column at `ordinal`
    fn name(&self, ordinal: usize) -> Result<&str>;

    /// Data type of the column at `ordinal`
    fn data_type(&self, ordinal: usize) -> Result<DataType>;

    /// Move to the next row, blocking if needed
    ///
    /// Returns `false` once the result set is exhausted. Exhaustion is not an
    /// error; errors are reserved for genuine cursor faults.
    fn advance(&mut self) -> Result<bool>;

    /// Value of the column at `ordinal` in the current row
    fn value(&self, ordinal: usize) -> Result<Value>;

    /// Ordinal of a column, trying a case-sensitive match first
    fn ordinal(&self, name: &str) -> Result<usize> {
        let field_count = self.field_count();
        let wanted = fold_name(name);
        let mut folded = None;
        for ordinal in 0..field_count {
            let column = self.name(ordinal)?;
            if column == name {
                return Ok(ordinal);
            }
            if folded.is_none() && fold_name(column) == wanted {
                folded = Some(ordinal);
            }
        }
        folded.ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Copy every column of the current row into `values`
    ///
    /// `values` must be exactly [`RowSource::field_count`] long. On error the
    /// contents of `values` are unspecified and must not be forwarded.
    fn read_values(&self, values: &mut [Value]) -> Result<()> {
        let field_count = self.field_count();
        if values.len() != field_count {
            return Err(Error::RowWidthMismatch {
                expected: field_count,
                actual: values.len(),
            });
        }
        for (ordinal, slot) in values.iter_mut().enumerate() {
            *slot = self.value(ordinal)?;
        }
        Ok(())
    }

    /// Snapshot of the active result set's columns
    fn schema(&self) -> Result<Schema> {
        Schema::from_source(self)
    }
}

/// A row source that can also advance without blocking the calling thread
pub trait AsyncRowSource: RowSource {
    /// Move to the next row without blocking
    ///
    /// Implementations should observe `cancel` only before a row has been
    /// fetched; a row that was fetched must be reported with `Ok(true)`.
    fn advance_async<'a>(&'a mut self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<bool>>;
}

impl<S: RowSource + ?Sized> RowSource for Box<S> {
    fn field_count(&self) -> usize {
        (**self).field_count()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        (**self).name(ordinal)
    }

    fn data_type(&self, ordinal: usize) -> Result<DataType> {
        (**self).data_type(ordinal)
    }

    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        (**self).value(ordinal)
    }

    fn ordinal(&self, name: &str) -> Result<usize> {
        (**self).ordinal(name)
    }

    fn read_values(&self, values: &mut [Value]) -> Result<()> {
        (**self).read_values(values)
    }

    fn schema(&self) -> Result<Schema> {
        (**self).schema()
    }
}
