//! Row transform trait applied between the cursor and the consumer

use std::sync::Arc;

use crate::error::Result;
use crate::row::Row;

/// Turns a raw row into the item a consumer sees
///
/// The transform takes the row by value. Pooled row storage goes back to
/// its pool when the row is dropped, so a transform that drops the row
/// before returning frees the buffer before the item is forwarded.
pub trait RowTransform: Send + Sync {
    /// Item produced per row
    type Output: Send + 'static;

    /// Transform one row
    fn transform(&self, row: Row) -> Result<Self::Output>;
}

/// Forwards rows untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl RowTransform for PassThrough {
    type Output = Row;

    fn transform(&self, row: Row) -> Result<Row> {
        Ok(row)
    }
}

/// Adapts a closure into a [`RowTransform`]
#[derive(Clone)]
pub struct FnTransform<F> {
    f: F,
}

impl<F> FnTransform<F> {
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, O> RowTransform for FnTransform<F>
where
    F: Fn(Row) -> Result<O> + Send + Sync,
    O: Send + 'static,
{
    type Output = O;

    fn transform(&self, row: Row) -> Result<O> {
        (self.f)(row)
    }
}

impl<T: RowTransform + ?Sized> RowTransform for Arc<T> {
    type Output = T::Output;

    fn transform(&self, row: Row) -> Result<Self::Output> {
        (**self).transform(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn closures_transform_rows() {
        let first = Arc::new(FnTransform::new(|mut row: Row| row.take(0)));
        let out = first
            .transform(Row::new(vec![Value::Int64(3), Value::Null]))
            .unwrap();
        assert_eq!(out, Value::Int64(3));
    }

    #[test]
    fn pass_through_keeps_values() {
        let row = Row::new(vec![Value::from("x")]);
        assert_eq!(PassThrough.transform(row.clone()).unwrap(), row);
    }
}
