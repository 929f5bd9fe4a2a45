//! Typed parsing of CSV cell text

use rowflow_core::{DataType, Field, Value};

use crate::error::{Error, Result};

/// Converts cell text into values of a declared column type
#[derive(Debug, Clone)]
pub struct CellParser {
    null_text: Option<String>,
}

impl CellParser {
    /// Create a parser that reads `null_text` as the database-null sentinel
    pub fn new(null_text: Option<String>) -> Self {
        Self { null_text }
    }

    /// Whether `text` spells a null cell
    pub fn is_null(&self, text: &str) -> bool {
        self.null_text.as_deref() == Some(text)
    }

    /// Parse one cell of `field`
    pub fn parse(&self, field: &Field, text: &str) -> Result<Value> {
        if self.is_null(text) {
            return Ok(Value::Null);
        }

        let fail = || Error::Parse {
            column: field.name().to_string(),
            data_type: field.data_type(),
            text: text.to_string(),
        };

        let value = match field.data_type() {
            DataType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => return Err(fail()),
            },
            DataType::Int16 => Value::Int16(text.parse().map_err(|_| fail())?),
            DataType::Int32 => Value::Int32(text.parse().map_err(|_| fail())?),
            DataType::Int64 => Value::Int64(text.parse().map_err(|_| fail())?),
            DataType::Float32 => Value::Float32(text.parse().map_err(|_| fail())?),
            DataType::Float64 => Value::Float64(text.parse().map_err(|_| fail())?),
            DataType::String => Value::String(text.to_string()),
            DataType::Binary => Value::Binary(text.as_bytes().to_vec()),
            DataType::Null => Value::Null,
        };
        Ok(value)
    }
}

impl Default for CellParser {
    fn default() -> Self {
        Self::new(Some(String::new()))
    }
}
