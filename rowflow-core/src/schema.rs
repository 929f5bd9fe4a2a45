//! Schema snapshot of a row source's active result set

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::source::RowSource;

/// Fold a column or member name for case-insensitive comparison
///
/// Every case-insensitive name match in rowflow goes through this.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

/// Whether two names are equal once folded
pub fn names_match(left: &str, right: &str) -> bool {
    left == right || fold_name(left) == fold_name(right)
}

/// Data type of a column value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean
    Boolean,

    /// 16-bit signed integer
    Int16,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 32-bit floating point
    Float32,

    /// 64-bit floating point
    Float64,

    /// UTF-8 encoded string
    String,

    /// Binary data
    Binary,

    /// Type carried only by the database-null sentinel, or an untyped column
    Null,
}

impl DataType {
    /// Get the size of this type in bytes, zero for variable-size types
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Boolean => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
            DataType::String | DataType::Binary | DataType::Null => 0,
        }
    }

    /// Check if this type is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
        )
    }

    /// Check if a value of this type widens losslessly into `target`
    pub fn widens_to(&self, target: &DataType) -> bool {
        if self == target {
            return true;
        }

        matches!(
            (self, target),
            (DataType::Int16, DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64)
                | (DataType::Int32, DataType::Int64 | DataType::Float64)
                | (DataType::Float32, DataType::Float64)
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "Boolean",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::String => "String",
            DataType::Binary => "Binary",
            DataType::Null => "Null",
        };
        f.write_str(name)
    }
}

/// A column in a result set, with a name, data type, and nullability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Name of the column
    pub name: String,

    /// Data type of the column
    pub data_type: DataType,

    /// Whether the column can hold the database-null sentinel
    pub nullable: bool,
}

impl Field {
    /// Create a new field
    pub fn new(name: &str, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable,
        }
    }

    /// Get the name of this field
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the data type of this field
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Check if this field is nullable
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}: {} (nullable)", self.name, self.data_type)
        } else {
            write!(f, "{}: {} (non-nullable)", self.name, self.data_type)
        }
    }
}

/// Columns of one result set, with a case-insensitive name index built once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Fields in ordinal order
    fields: Vec<Field>,

    /// Exact name to ordinal, first occurrence wins
    exact: HashMap<String, usize>,

    /// Lowercased name to ordinal, first occurrence wins
    folded: HashMap<String, usize>,
}

impl Schema {
    /// Create a new schema with the given fields
    pub fn new(fields: Vec<Field>) -> Self {
        let mut exact = HashMap::with_capacity(fields.len());
        let mut folded = HashMap::with_capacity(fields.len());
        for (ordinal, field) in fields.iter().enumerate() {
            exact.entry(field.name.clone()).or_insert(ordinal);
            folded.entry(fold_name(&field.name)).or_insert(ordinal);
        }

        Self {
            fields,
            exact,
            folded,
        }
    }

    /// Create an untyped, nullable schema from column names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| Field::new(name.as_ref(), DataType::Null, true))
                .collect(),
        )
    }

    /// Snapshot the columns a row source currently exposes
    pub fn from_source<S: RowSource + ?Sized>(source: &S) -> Result<Self> {
        let field_count = source.field_count();
        let mut fields = Vec::with_capacity(field_count);
        for ordinal in 0..field_count {
            fields.push(Field::new(
                source.name(ordinal)?,
                source.data_type(ordinal)?,
                true,
            ));
        }
        Ok(Self::new(fields))
    }

    /// Get all fields in this schema
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Get a field by ordinal
    pub fn field(&self, ordinal: usize) -> Result<&Field> {
        self.fields.get(ordinal).ok_or(Error::OrdinalOutOfRange {
            ordinal,
            field_count: self.fields.len(),
        })
    }

    /// Find the ordinal of a column, trying a case-sensitive match first
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&fold_name(name)))
            .copied()
    }

    /// Get the ordinal of a column or fail with [`Error::ColumnNotFound`]
    pub fn ordinal(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Get the number of columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if this schema has no columns
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stable hash of the column names and types, used to tell result sets apart
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.fields.len().hash(&mut hasher);
        for field in &self.fields {
            field.name.hash(&mut hasher);
            field.data_type.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schema: {} fields", self.fields.len())?;
        for field in &self.fields {
            writeln!(f, "  {}", field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_folded() {
        let schema = Schema::from_names(["id", "ID", "Name"]);
        assert_eq!(schema.index_of("ID"), Some(1));
        assert_eq!(schema.index_of("id"), Some(0));
        assert_eq!(schema.index_of("Id"), Some(0));
        assert_eq!(schema.index_of("NAME"), Some(2));
        assert_eq!(schema.index_of("ghost"), None);
    }

    #[test]
    fn ordinal_reports_missing_column() {
        let schema = Schema::from_names(["Id"]);
        assert!(matches!(schema.ordinal("Name"), Err(Error::ColumnNotFound(name)) if name == "Name"));
        assert!(matches!(
            schema.field(3),
            Err(Error::OrdinalOutOfRange { ordinal: 3, field_count: 1 })
        ));
    }

    #[test]
    fn fingerprint_tracks_names_and_types() {
        let a = Schema::new(vec![Field::new("Id", DataType::Int64, false)]);
        let b = Schema::new(vec![Field::new("Id", DataType::Int64, false)]);
        let c = Schema::new(vec![Field::new("Id", DataType::String, false)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn widening_is_lossless_only() {
        assert!(DataType::Int16.widens_to(&DataType::Int64));
        assert!(DataType::Int32.widens_to(&DataType::Float64));
        assert!(!DataType::Int64.widens_to(&DataType::Int32));
        assert!(!DataType::Int64.widens_to(&DataType::Float64));
        assert!(!DataType::String.widens_to(&DataType::Binary));
    }
}
