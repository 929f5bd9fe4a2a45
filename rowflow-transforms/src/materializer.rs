//! Compiled row-to-record materializers and their cache

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rowflow_core::{
    names_match, ColumnOrdinalMapping, Error, MappingOrder, OrdinalMapper, Result, Row, RowTransform, Schema,
};
use serde::{Deserialize, Serialize};

use crate::record::{Member, Record};

/// How record members are matched to columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerOptions {
    /// Member name to column name overrides, applied on top of the record's own
    pub overrides: BTreeMap<String, String>,

    /// Fail when a member has no matching column
    pub strict: bool,
}

impl TransformerOptions {
    /// Read `member` from `column`
    pub fn with_override(mut self, member: impl Into<String>, column: impl Into<String>) -> Self {
        self.overrides.insert(member.into(), column.into());
        self
    }

    /// Require every member to match a column
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// One member paired with the ordinal it is read from
struct Binding<T: 'static> {
    ordinal: usize,
    column: String,
    member: &'static Member<T>,
    /// A later binding reads the same ordinal, so the value is cloned
    shared: bool,
}

/// A per-type materializer bound to one result set
///
/// All member lookup happens when the transformer is built. Materializing a
/// row walks a precomputed list of (ordinal, setter) pairs.
pub struct RecordTransformer<T: Record> {
    bindings: Vec<Binding<T>>,
    mapping: ColumnOrdinalMapping,
}

impl<T: Record> RecordTransformer<T> {
    /// Resolve the members of `T` against a result set's schema
    pub fn for_schema(schema: &Schema, options: &TransformerOptions) -> Result<Self> {
        let members = T::members();
        let defaults = members
            .iter()
            .filter(|member| member.column.is_some())
            .map(|member| (member.name, member.column_name()));

        let mapping = OrdinalMapper::new(schema)
            .with_overrides(defaults)
            .with_overrides(options.overrides.clone())
            .order(MappingOrder::Ordinal)
            .strict(options.strict)
            .map(members.iter().map(|member| member.name))?;

        Self::from_mapping(mapping)
    }

    /// Bind the members of `T` to an already resolved mapping
    ///
    /// Mapping entries whose name matches no member are ignored.
    pub fn from_mapping(mapping: ColumnOrdinalMapping) -> Result<Self> {
        let members = T::members();
        let mut bindings = Vec::with_capacity(mapping.len());

        for entry in &mapping {
            let member = members
                .iter()
                .find(|member| member.name == entry.name)
                .or_else(|| {
                    members
                        .iter()
                        .find(|member| names_match(member.name, &entry.name))
                });
            if let Some(member) = member {
                if entry.ordinal >= mapping.field_count() {
                    return Err(Error::OrdinalOutOfRange {
                        ordinal: entry.ordinal,
                        field_count: mapping.field_count(),
                    });
                }
                bindings.push(Binding {
                    ordinal: entry.ordinal,
                    column: entry.column.clone(),
                    member,
                    shared: false,
                });
            }
        }

        for index in 0..bindings.len() {
            let ordinal = bindings[index].ordinal;
            bindings[index].shared = bindings[index + 1..].iter().any(|later| later.ordinal == ordinal);
        }

        tracing::debug!(
            record = std::any::type_name::<T>(),
            bound = bindings.len(),
            members = members.len(),
            "compiled record transformer"
        );

        Ok(Self { bindings, mapping })
    }

    /// Mapping this transformer was built from
    pub fn mapping(&self) -> &ColumnOrdinalMapping {
        &self.mapping
    }

    /// Number of members that are filled per row
    pub fn bound_members(&self) -> usize {
        self.bindings.len()
    }

    /// Build a new `T` from a row without consuming it
    pub fn materialize(&self, row: &Row) -> Result<T> {
        self.check_width(row)?;
        let mut record = T::default();
        for binding in &self.bindings {
            let value = row[binding.ordinal].clone();
            self.assign(&mut record, binding, value)?;
        }
        Ok(record)
    }

    /// Build a new `T`, moving values out of the row
    ///
    /// A column read by several members is cloned for all but the last.
    pub fn materialize_owned(&self, mut row: Row) -> Result<T> {
        self.check_width(&row)?;
        let mut record = T::default();
        for binding in &self.bindings {
            let value = if binding.shared {
                row.value(binding.ordinal)?.clone()
            } else {
                row.take(binding.ordinal)?
            };
            self.assign(&mut record, binding, value)?;
        }
        Ok(record)
    }

    fn check_width(&self, row: &Row) -> Result<()> {
        if row.len() != self.mapping.field_count() {
            return Err(Error::RowWidthMismatch {
                expected: self.mapping.field_count(),
                actual: row.len(),
            });
        }
        Ok(())
    }

    fn assign(&self, record: &mut T, binding: &Binding<T>, value: rowflow_core::Value) -> Result<()> {
        (binding.member.set)(record, value).map_err(|e| Error::TypeMismatch {
            column: binding.column.clone(),
            member: binding.member.name.to_string(),
            reason: e.to_string(),
        })
    }
}

impl<T: Record> RowTransform for RecordTransformer<T> {
    type Output = T;

    /// The row is dropped, and its pooled storage returned, before the record is handed on
    fn transform(&self, row: Row) -> Result<T> {
        self.materialize_owned(row)
    }
}

impl<T: Record> fmt::Debug for RecordTransformer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordTransformer")
            .field("record", &std::any::type_name::<T>())
            .field("mapping", &self.mapping.pairs())
            .finish()
    }
}

/// Compiled transformers keyed by record type and mapping
#[derive(Default)]
pub struct TransformerCache {
    entries: Mutex<HashMap<(TypeId, u64), Arc<dyn Any + Send + Sync>>>,
}

impl TransformerCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the transformer for `T` over `mapping`, compiling it on first use
    pub fn get_or_build<T: Record>(&self, mapping: &ColumnOrdinalMapping) -> Result<Arc<RecordTransformer<T>>> {
        let key = (TypeId::of::<T>(), mapping.fingerprint());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = entries.get(&key) {
            if let Ok(transformer) = Arc::clone(cached).downcast::<RecordTransformer<T>>() {
                return Ok(transformer);
            }
        }

        let transformer = Arc::new(RecordTransformer::<T>::from_mapping(mapping.clone())?);
        entries.insert(key, transformer.clone());
        Ok(transformer)
    }

    /// Number of cached transformers
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::{DataType, Field, RowPool, Value};
    use proptest::prelude::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Account {
        id: i64,
        owner: Option<String>,
        balance: f64,
        flags: Value,
    }

    crate::record!(Account {
        id: i64,
        owner: Option<String> => "OwnerName",
        balance: f64,
        flags: Value,
    });

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("ID", DataType::Int32, false),
            Field::new("Balance", DataType::Float64, false),
            Field::new("OwnerName", DataType::String, true),
            Field::new("Flags", DataType::Null, true),
        ])
    }

    fn row(id: i32, balance: f64, owner: Option<&str>) -> Row {
        Row::new(vec![
            Value::Int32(id),
            Value::Float64(balance),
            Value::from_option(owner),
            Value::Null,
        ])
    }

    #[test]
    fn materializes_with_widening_and_nulls() {
        let transformer = RecordTransformer::<Account>::for_schema(&schema(), &TransformerOptions::default()).unwrap();
        assert_eq!(transformer.bound_members(), 4);

        let account = transformer.materialize(&row(7, 12.5, None)).unwrap();
        assert_eq!(
            account,
            Account {
                id: 7,
                owner: None,
                balance: 12.5,
                flags: Value::Null,
            }
        );
    }

    #[test]
    fn missing_members_are_skipped_unless_strict() {
        let schema = Schema::from_names(["id"]);
        let lenient = RecordTransformer::<Account>::for_schema(&schema, &TransformerOptions::default()).unwrap();
        assert_eq!(lenient.bound_members(), 1);

        let err = RecordTransformer::<Account>::for_schema(&schema, &TransformerOptions::default().strict(true))
            .unwrap_err();
        match err {
            Error::MissingColumns { missing } => assert_eq!(missing, vec!["owner", "balance", "flags"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn caller_overrides_win() {
        let schema = Schema::from_names(["id", "Holder"]);
        let options = TransformerOptions::default().with_override("owner", "Holder");
        let transformer = RecordTransformer::<Account>::for_schema(&schema, &options).unwrap();
        let account = transformer
            .materialize(&Row::new(vec![Value::Int64(1), Value::from("Grace")]))
            .unwrap();
        assert_eq!(account.owner.as_deref(), Some("Grace"));
    }

    #[test]
    fn type_mismatch_names_column_and_member() {
        let transformer = RecordTransformer::<Account>::for_schema(&schema(), &TransformerOptions::default()).unwrap();
        let bad = Row::new(vec![
            Value::from("seven"),
            Value::Float64(1.0),
            Value::Null,
            Value::Null,
        ]);
        match transformer.materialize(&bad).unwrap_err() {
            Error::TypeMismatch { column, member, .. } => {
                assert_eq!(column, "ID");
                assert_eq!(member, "id");
            }
            other => panic!("unexpected error: {other}"),
        }

        let good = transformer.materialize(&row(1, 2.0, Some("x"))).unwrap();
        assert_eq!(good.id, 1);
    }

    #[test]
    fn transform_returns_storage_before_forwarding() {
        let pool = RowPool::new(4);
        let transformer = RecordTransformer::<Account>::for_schema(&schema(), &TransformerOptions::default()).unwrap();

        let mut pooled = pool.rent(4);
        pooled.values_mut()[0] = Value::Int16(3);
        let account = transformer.transform(pooled).unwrap();

        assert_eq!(account.id, 3);
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.retained(4), 1);
    }

    #[test]
    fn rejects_rows_of_another_width() {
        let transformer = RecordTransformer::<Account>::for_schema(&schema(), &TransformerOptions::default()).unwrap();
        assert!(matches!(
            transformer.materialize(&Row::new(vec![Value::Int32(1)])),
            Err(Error::RowWidthMismatch { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn cache_compiles_once_per_type_and_mapping() {
        let cache = TransformerCache::new();
        let mapping = ColumnOrdinalMapping::all(&schema());
        let first = cache.get_or_build::<Account>(&mapping).unwrap();
        let second = cache.get_or_build::<Account>(&mapping).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = ColumnOrdinalMapping::all(&Schema::from_names(["id"]));
        let third = cache.get_or_build::<Account>(&other).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 2);
    }

    #[derive(Debug, Default, PartialEq)]
    struct Keyed {
        id: i64,
        key: i64,
        copy: i64,
        label: Option<String>,
    }

    crate::record!(Keyed {
        id: i64,
        key: i64 => "Id",
        copy: i64,
        label: Option<String>,
    });

    #[test]
    fn members_sharing_a_column_all_receive_it() {
        let schema = Schema::from_names(["Id", "Label"]);
        let options = TransformerOptions::default().with_override("copy", "ID");
        let transformer = RecordTransformer::<Keyed>::for_schema(&schema, &options).unwrap();
        assert_eq!(transformer.bound_members(), 4);

        let source = Row::new(vec![Value::Int64(42), Value::from("answer")]);
        let borrowed = transformer.materialize(&source).unwrap();
        let owned = transformer.transform(source).unwrap();

        assert_eq!(borrowed, owned);
        assert_eq!(
            owned,
            Keyed {
                id: 42,
                key: 42,
                copy: 42,
                label: Some("answer".into()),
            }
        );
    }

    proptest! {
        #[test]
        fn materialized_members_read_back_raw_values(
            id in any::<i32>(),
            balance in -1.0e9f64..1.0e9,
            owner in proptest::option::of("[a-zA-Z ]{0,12}"),
        ) {
            let transformer = RecordTransformer::<Account>::for_schema(&schema(), &TransformerOptions::default()).unwrap();
            let source = row(id, balance, owner.as_deref());
            let account = transformer.materialize(&source).unwrap();

            prop_assert_eq!(Value::Int64(account.id), Value::Int64(i64::from(id)));
            prop_assert_eq!(Value::Float64(account.balance), source[1].clone());
            prop_assert_eq!(Value::from_option(account.owner.clone()), source[2].clone());
            prop_assert_eq!(account.flags, source[3].clone());
        }
    }
}
