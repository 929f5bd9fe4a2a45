//! In-memory queue of buffered rows paired with their ordinal mapping

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::mapping::ColumnOrdinalMapping;
use crate::memory::RowPool;
use crate::row::Row;
use crate::source::RowSource;

/// Rows of one result set, buffered in source order, with the mapping used to read them
#[derive(Debug)]
pub struct QueryResultQueue {
    mapping: ColumnOrdinalMapping,
    rows: VecDeque<Row>,
}

impl QueryResultQueue {
    /// Create an empty queue for rows of the mapping's result set
    pub fn new(mapping: ColumnOrdinalMapping) -> Self {
        Self {
            mapping,
            rows: VecDeque::new(),
        }
    }

    /// Mapping the buffered rows are read through
    pub fn mapping(&self) -> &ColumnOrdinalMapping {
        &self.mapping
    }

    /// Append a row, rejecting rows of the wrong width
    pub fn push(&mut self, row: Row) -> Result<()> {
        if row.len() != self.mapping.field_count() {
            return Err(Error::RowWidthMismatch {
                expected: self.mapping.field_count(),
                actual: row.len(),
            });
        }
        self.rows.push_back(row);
        Ok(())
    }

    /// Remove the oldest buffered row
    pub fn pop(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// Peek at the oldest buffered row
    pub fn front(&self) -> Option<&Row> {
        self.rows.front()
    }

    /// Number of buffered rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate the buffered rows in source order
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Buffer rows from `source` until it is exhausted or `limit` rows were read
    ///
    /// The source must still expose the result set the mapping was resolved
    /// against. Returns the number of rows buffered by this call. A cursor
    /// fault stops buffering; rows buffered before it stay queued.
    pub fn fill_from<S: RowSource + ?Sized>(
        &mut self,
        source: &mut S,
        pool: Option<&RowPool>,
        limit: Option<usize>,
    ) -> Result<usize> {
        self.mapping.check_schema(&source.schema()?)?;

        let mut buffered = 0;
        while limit.map_or(true, |limit| buffered < limit) {
            if !source.advance()? {
                break;
            }
            let row = Row::read_from(&*source, pool)?;
            self.push(row)?;
            buffered += 1;
        }

        tracing::trace!(buffered, total = self.rows.len(), "buffered result rows");
        Ok(buffered)
    }
}

impl IntoIterator for QueryResultQueue {
    type Item = Row;
    type IntoIter = std::collections::vec_deque::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Schema};
    use crate::value::Value;

    struct Counter {
        remaining: usize,
        next: i64,
        fail_at: Option<i64>,
    }

    impl RowSource for Counter {
        fn field_count(&self) -> usize {
            2
        }

        fn name(&self, ordinal: usize) -> Result<&str> {
            Ok(["Id", "Square"][ordinal])
        }

        fn data_type(&self, _ordinal: usize) -> Result<DataType> {
            Ok(DataType::Int64)
        }

        fn advance(&mut self) -> Result<bool> {
            if self.fail_at == Some(self.next + 1) {
                return Err(Error::cursor_message("cursor lost"));
            }
            if self.remaining == 0 {
                return Ok(false);
            }
            self.remaining -= 1;
            self.next += 1;
            Ok(true)
        }

        fn value(&self, ordinal: usize) -> Result<Value> {
            Ok(Value::Int64(if ordinal == 0 { self.next } else { self.next * self.next }))
        }
    }

    fn counter(remaining: usize) -> Counter {
        Counter {
            remaining,
            next: 0,
            fail_at: None,
        }
    }

    fn mapping_for(source: &Counter) -> ColumnOrdinalMapping {
        ColumnOrdinalMapping::all(&source.schema().unwrap())
    }

    #[test]
    fn fill_preserves_source_order() {
        let mut source = counter(4);
        let mut queue = QueryResultQueue::new(mapping_for(&source));
        let pool = RowPool::new(8);

        assert_eq!(queue.fill_from(&mut source, Some(&pool), Some(3)).unwrap(), 3);
        assert_eq!(queue.fill_from(&mut source, Some(&pool), None).unwrap(), 1);

        let ids: Vec<i64> = queue.iter().map(|row| row[0].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(pool.stats().outstanding, 4);

        drop(queue);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn push_rejects_wrong_width() {
        let source = counter(0);
        let mut queue = QueryResultQueue::new(mapping_for(&source));
        let err = queue.push(Row::new(vec![Value::Null])).unwrap_err();
        assert!(matches!(err, Error::RowWidthMismatch { expected: 2, actual: 1 }));
        assert!(queue.is_empty());
    }

    #[test]
    fn fault_keeps_rows_already_buffered() {
        let mut source = Counter {
            remaining: 10,
            next: 0,
            fail_at: Some(3),
        };
        let mut queue = QueryResultQueue::new(mapping_for(&source));
        assert!(queue.fill_from(&mut source, None, None).unwrap_err().is_cursor_fault());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap()[1], Value::Int64(1));
    }

    #[test]
    fn refuses_foreign_result_set() {
        let mut source = counter(1);
        let other = Schema::from_names(["Id"]);
        let mut queue = QueryResultQueue::new(ColumnOrdinalMapping::all(&other));
        assert!(matches!(
            queue.fill_from(&mut source, None, None),
            Err(Error::SchemaMismatch(_))
        ));
    }
}
