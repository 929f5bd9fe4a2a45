//! Record types and their member setter tables

use std::fmt;

use rowflow_core::{DataType, Value};

use crate::convert::ConversionError;

/// Assigns one converted column value to a member of `T`
pub type Setter<T> = fn(&mut T, Value) -> Result<(), ConversionError>;

/// A settable member of a record type
pub struct Member<T> {
    /// Member name, matched case-insensitively against column names
    pub name: &'static str,

    /// Column to read instead of the one named like the member
    pub column: Option<&'static str>,

    /// Column type the member expects
    pub data_type: DataType,

    /// Whether the member can hold the database-null sentinel directly
    pub nullable: bool,

    /// Setter that converts and assigns the value
    pub set: Setter<T>,
}

impl<T> Member<T> {
    /// Column this member reads by default
    pub fn column_name(&self) -> &'static str {
        self.column.unwrap_or(self.name)
    }
}

impl<T> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("column", &self.column_name())
            .field("data_type", &self.data_type)
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// A type that rows can be materialized into
///
/// The member table is static, so binding a record to a result set only
/// has to pair each member with an ordinal; no per-row lookup happens.
/// Implement it with the [`record!`](crate::record!) macro.
pub trait Record: Default + Send + 'static {
    /// Settable members in declaration order
    fn members() -> &'static [Member<Self>];
}

/// Implement [`Record`] for a struct with public, defaultable fields
///
/// ```
/// use rowflow_transforms::record;
///
/// #[derive(Debug, Default)]
/// struct Customer {
///     id: i64,
///     name: Option<String>,
///     balance: f64,
/// }
///
/// record!(Customer {
///     id: i64,
///     name: Option<String> => "FullName",
///     balance: f64,
/// });
/// ```
///
/// A `=> "Column"` suffix reads the member from a differently named column.
#[macro_export]
macro_rules! record {
    (@column) => { None };
    (@column $column:literal) => { Some($column) };
    ($ty:ty { $($field:ident : $fty:ty $(=> $column:literal)?),* $(,)? }) => {
        impl $crate::Record for $ty {
            fn members() -> &'static [$crate::Member<Self>] {
                const MEMBERS: &[$crate::Member<$ty>] = &[
                    $(
                        $crate::Member {
                            name: stringify!($field),
                            column: $crate::record!(@column $($column)?),
                            data_type: <$fty as $crate::FromValue>::DATA_TYPE,
                            nullable: <$fty as $crate::FromValue>::NULLABLE,
                            set: |record: &mut $ty, value| {
                                record.$field = <$fty as $crate::FromValue>::from_value(value)?;
                                Ok(())
                            },
                        },
                    )*
                ];
                MEMBERS
            }
        }
    };
}
