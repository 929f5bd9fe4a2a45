//! In-memory row source

use futures::future::{self, BoxFuture, FutureExt};
use rowflow_core::{AsyncRowSource, DataType, Error as CoreError, Field, RowSource, Schema, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A forward-only cursor over rows held in memory
///
/// Besides serving fixed data it can simulate a failing cursor: with
/// [`MemoryRowSource::fail_after`] the advance following the given number of
/// rows raises a cursor fault instead of moving on.
#[derive(Debug, Clone)]
pub struct MemoryRowSource {
    schema: Schema,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
    fail_after: Option<(usize, String)>,
    advances: usize,
}

impl MemoryRowSource {
    /// Create a source over `rows`, each exactly as wide as `schema`
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        if schema.is_empty() {
            return Err(Error::InvalidArgument("row source needs at least one column".into()));
        }
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != schema.len())
        {
            return Err(Error::Schema(format!(
                "row {index} has {} values but the schema has {} columns",
                row.len(),
                schema.len()
            )));
        }

        Ok(Self {
            schema,
            rows,
            position: None,
            fail_after: None,
            advances: 0,
        })
    }

    /// Create a source with untyped, nullable columns
    pub fn from_names<I, S>(names: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Schema::from_names(names), rows)
    }

    /// Create a source whose column types are taken from the first row
    pub fn with_inferred_types<I, S>(names: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let fields = names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| {
                let data_type = rows
                    .iter()
                    .map(|row| row.get(ordinal).map_or(DataType::Null, Value::data_type))
                    .find(|data_type| *data_type != DataType::Null)
                    .unwrap_or(DataType::Null);
                Field::new(name, data_type, true)
            })
            .collect();
        Self::new(Schema::new(fields), rows)
    }

    /// Raise a cursor fault on the advance after `rows` successful ones
    pub fn fail_after(mut self, rows: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((rows, message.into()));
        self
    }

    /// Number of successful advances so far
    pub fn advances(&self) -> usize {
        self.advances
    }

    /// Rows not yet advanced past
    pub fn remaining(&self) -> usize {
        let consumed = self.position.map_or(0, |p| p + 1);
        self.rows.len().saturating_sub(consumed)
    }

    fn current(&self) -> rowflow_core::Result<&[Value]> {
        self.position
            .and_then(|p| self.rows.get(p))
            .map(Vec::as_slice)
            .ok_or_else(|| CoreError::cursor_message("no current row; call advance first"))
    }
}

impl RowSource for MemoryRowSource {
    fn field_count(&self) -> usize {
        self.schema.len()
    }

    fn name(&self, ordinal: usize) -> rowflow_core::Result<&str> {
        Ok(self.schema.field(ordinal)?.name())
    }

    fn data_type(&self, ordinal: usize) -> rowflow_core::Result<DataType> {
        Ok(self.schema.field(ordinal)?.data_type())
    }

    fn ordinal(&self, name: &str) -> rowflow_core::Result<usize> {
        self.schema.ordinal(name)
    }

    fn advance(&mut self) -> rowflow_core::Result<bool> {
        if let Some((after, message)) = &self.fail_after {
            if self.advances == *after {
                return Err(CoreError::cursor_message(message.clone()));
            }
        }

        let next = self.position.map_or(0, |p| p + 1);
        if next >= self.rows.len() {
            self.position = Some(self.rows.len());
            return Ok(false);
        }
        self.position = Some(next);
        self.advances += 1;
        Ok(true)
    }

    fn value(&self, ordinal: usize) -> rowflow_core::Result<Value> {
        let row = self.current()?;
        row.get(ordinal).cloned().ok_or(CoreError::OrdinalOutOfRange {
            ordinal,
            field_count: row.len(),
        })
    }

    fn read_values(&self, values: &mut [Value]) -> rowflow_core::Result<()> {
        let row = self.current()?;
        if values.len() != row.len() {
            return Err(CoreError::RowWidthMismatch {
                expected: row.len(),
                actual: values.len(),
            });
        }
        values.clone_from_slice(row);
        Ok(())
    }

    fn schema(&self) -> rowflow_core::Result<Schema> {
        Ok(self.schema.clone())
    }
}

impl AsyncRowSource for MemoryRowSource {
    fn advance_async<'a>(&'a mut self, cancel: &'a CancellationToken) -> BoxFuture<'a, rowflow_core::Result<bool>> {
        if cancel.is_cancelled() {
            return future::ready(Err(CoreError::Cancelled)).boxed();
        }
        future::ready(self.advance()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> MemoryRowSource {
        MemoryRowSource::with_inferred_types(
            ["Id", "Name"],
            vec![
                vec![Value::Int64(1), Value::from("A")],
                vec![Value::Int64(2), Value::Null],
                vec![Value::Int64(3), Value::from("C")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn walks_rows_in_order() {
        let mut source = people();
        let mut ids = Vec::new();
        while source.advance().unwrap() {
            ids.push(source.value(0).unwrap().as_i64().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(!source.advance().unwrap());
        assert_eq!(source.advances(), 3);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn infers_types_past_nulls() {
        let source = people();
        assert_eq!(source.data_type(0).unwrap(), DataType::Int64);
        assert_eq!(source.data_type(1).unwrap(), DataType::String);
        assert_eq!(source.ordinal("name").unwrap(), 1);
    }

    #[test]
    fn reading_before_advance_is_a_cursor_fault() {
        let source = people();
        assert!(source.value(0).unwrap_err().is_cursor_fault());
    }

    #[test]
    fn injected_fault_fires_after_rows() {
        let mut source = people().fail_after(2, "connection reset");
        assert!(source.advance().unwrap());
        assert!(source.advance().unwrap());
        let err = source.advance().unwrap_err();
        assert_eq!(err.to_string(), "Cursor fault: connection reset");
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = MemoryRowSource::from_names(["a", "b"], vec![vec![Value::Null]]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(MemoryRowSource::from_names(Vec::<String>::new(), vec![]).is_err());
    }

    #[tokio::test]
    async fn async_advance_honours_cancellation() {
        let mut source = people();
        let cancel = CancellationToken::new();
        assert!(source.advance_async(&cancel).await.unwrap());
        cancel.cancel();
        assert!(source.advance_async(&cancel).await.unwrap_err().is_cancelled());
        assert_eq!(source.advances(), 1);
    }
}
