//! Conversions from column values into record member types

use rowflow_core::{DataType, Value};
use thiserror::Error;

/// A column value that cannot be assigned to a member type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// The value's type does not widen into the member type
    #[error("cannot convert {actual} into {expected}")]
    Incompatible {
        /// Member type
        expected: DataType,
        /// Column value type
        actual: DataType,
    },
}

/// A member type that can be filled from a column value
///
/// The database-null sentinel converts to the member's null-equivalent:
/// `None` for `Option<T>`, [`Value::Null`] for raw values, and the type's
/// default for everything else. Values of a different type convert only
/// when the conversion is a lossless widening.
pub trait FromValue: Sized {
    /// Column type this member expects
    const DATA_TYPE: DataType;

    /// Whether the member can represent the database-null sentinel directly
    const NULLABLE: bool = false;

    /// Convert a value, consuming it
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

fn incompatible<T>(expected: DataType, value: &Value) -> Result<T, ConversionError> {
    Err(ConversionError::Incompatible {
        expected,
        actual: value.data_type(),
    })
}

impl FromValue for bool {
    const DATA_TYPE: DataType = DataType::Boolean;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(false),
            Value::Boolean(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for i16 {
    const DATA_TYPE: DataType = DataType::Int16;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(0),
            Value::Int16(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for i32 {
    const DATA_TYPE: DataType = DataType::Int32;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(0),
            Value::Int16(v) => Ok(i32::from(v)),
            Value::Int32(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for i64 {
    const DATA_TYPE: DataType = DataType::Int64;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(0),
            Value::Int16(v) => Ok(i64::from(v)),
            Value::Int32(v) => Ok(i64::from(v)),
            Value::Int64(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(0.0),
            Value::Int16(v) => Ok(f32::from(v)),
            Value::Float32(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(0.0),
            Value::Int16(v) => Ok(f64::from(v)),
            Value::Int32(v) => Ok(f64::from(v)),
            Value::Float32(v) => Ok(f64::from(v)),
            Value::Float64(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for String {
    const DATA_TYPE: DataType = DataType::String;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for Vec<u8> {
    const DATA_TYPE: DataType = DataType::Binary;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Binary(v) => Ok(v),
            other => incompatible(Self::DATA_TYPE, &other),
        }
    }
}

impl FromValue for Value {
    const DATA_TYPE: DataType = DataType::Null;
    const NULLABLE: bool = true;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const DATA_TYPE: DataType = T::DATA_TYPE;
    const NULLABLE: bool = true;

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
