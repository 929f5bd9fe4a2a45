//! Rows of column values with owned, poolable storage

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memory::{PoolShared, RowPool};
use crate::source::RowSource;
use crate::value::Value;

/// An ordered, fixed-width sequence of column values indexed by ordinal
///
/// A row rented from a [`RowPool`] returns its storage to that pool when it
/// is dropped. Ownership moves with the row at every hand-off, so storage is
/// returned exactly once, by whoever holds the row last.
pub struct Row {
    values: Vec<Value>,
    home: Option<Arc<PoolShared>>,
}

impl Row {
    /// Create an unpooled row from values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, home: None }
    }

    pub(crate) fn pooled(values: Vec<Value>, home: Arc<PoolShared>) -> Self {
        Self {
            values,
            home: Some(home),
        }
    }

    /// Read the current row of `source`, renting storage from `pool` if given
    ///
    /// On a read error the partially filled storage is returned to the pool
    /// and no row escapes.
    pub fn read_from<S: RowSource + ?Sized>(source: &S, pool: Option<&RowPool>) -> Result<Self> {
        let width = source.field_count();
        let mut row = match pool {
            Some(pool) => pool.rent(width),
            None => Row::new(vec![Value::Null; width]),
        };
        source.read_values(&mut row.values)?;
        Ok(row)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `ordinal`, if in range
    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    /// Value at `ordinal` or an [`Error::OrdinalOutOfRange`]
    pub fn value(&self, ordinal: usize) -> Result<&Value> {
        self.values.get(ordinal).ok_or(Error::OrdinalOutOfRange {
            ordinal,
            field_count: self.values.len(),
        })
    }

    /// Move the value at `ordinal` out, leaving the database-null sentinel behind
    pub fn take(&mut self, ordinal: usize) -> Result<Value> {
        let field_count = self.values.len();
        self.values
            .get_mut(ordinal)
            .map(std::mem::take)
            .ok_or(Error::OrdinalOutOfRange {
                ordinal,
                field_count,
            })
    }

    /// All values in ordinal order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Mutable access to the values
    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    /// Whether the storage will go back to a pool on drop
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    /// Detach the values from any pool and take them
    pub fn into_values(mut self) -> Vec<Value> {
        if let Some(home) = self.home.take() {
            home.forget();
        }
        std::mem::take(&mut self.values)
    }
}

impl Drop for Row {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            home.give_back(std::mem::take(&mut self.values));
        }
    }
}

impl Clone for Row {
    /// Clones are never pooled
    fn clone(&self) -> Self {
        Row::new(self.values.clone())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, ordinal: usize) -> &Value {
        &self.values[ordinal]
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.values).finish()
    }
}

static_assertions::assert_impl_all!(Row: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_leaves_null_behind() {
        let mut row = Row::new(vec![Value::Int64(1), Value::from("A")]);
        assert_eq!(row.take(1).unwrap(), Value::from("A"));
        assert_eq!(row[1], Value::Null);
        assert!(row.take(2).is_err());
    }

    #[test]
    fn dropped_row_returns_to_pool() {
        let pool = RowPool::new(4);
        let row = pool.rent(3);
        assert!(row.is_pooled());
        assert_eq!(pool.stats().outstanding, 1);
        drop(row);

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.returned, 1);
        assert_eq!(pool.retained(3), 1);
    }

    #[test]
    fn detached_values_never_return() {
        let pool = RowPool::new(4);
        let mut row = pool.rent(2);
        row.values_mut()[0] = Value::Int32(9);
        let values = row.into_values();
        assert_eq!(values[0], Value::Int32(9));

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.returned, 0);
        assert_eq!(pool.retained(2), 0);
    }

    #[test]
    fn clone_is_unpooled() {
        let pool = RowPool::new(4);
        let row = pool.rent(1);
        let copy = row.clone();
        assert!(!copy.is_pooled());
        assert_eq!(copy, row);
    }
}
