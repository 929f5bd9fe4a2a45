//! Column name to ordinal resolution for the active result set

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{fold_name, names_match, Schema};

/// Order of the entries in a resolved mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingOrder {
    /// Keep the order the fields were requested in
    #[default]
    Requested,

    /// Sort by ascending column ordinal
    Ordinal,
}

/// One resolved field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnOrdinal {
    /// Requested field name
    pub name: String,

    /// Column name as the result set spells it
    pub column: String,

    /// Zero-based column position
    pub ordinal: usize,
}

/// Ordered (name, ordinal) pairs resolved once for one result set
///
/// A mapping is immutable and cheap to clone. It remembers the schema it was
/// resolved against and refuses to be checked against a different one.
#[derive(Debug, Clone)]
pub struct ColumnOrdinalMapping {
    entries: Arc<[ColumnOrdinal]>,
    field_count: usize,
    schema_fingerprint: u64,
}

impl ColumnOrdinalMapping {
    /// Map every column of `schema` in ordinal order
    pub fn all(schema: &Schema) -> Self {
        let entries = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(ordinal, field)| ColumnOrdinal {
                name: field.name.clone(),
                column: field.name.clone(),
                ordinal,
            })
            .collect();
        Self {
            entries,
            field_count: schema.len(),
            schema_fingerprint: schema.fingerprint(),
        }
    }

    /// Resolved entries
    pub fn entries(&self) -> &[ColumnOrdinal] {
        &self.entries
    }

    /// Iterate the resolved entries
    pub fn iter(&self) -> std::slice::Iter<'_, ColumnOrdinal> {
        self.entries.iter()
    }

    /// Number of mapped fields
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no requested field matched
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Width of the rows of the result set this mapping belongs to
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// (name, ordinal) pairs in mapping order
    pub fn pairs(&self) -> Vec<(&str, usize)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.ordinal))
            .collect()
    }

    /// Ordinal mapped for a requested field name, case-insensitively
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| names_match(&entry.name, name))
            })
            .map(|entry| entry.ordinal)
    }

    /// Fail unless this mapping was resolved against `schema`
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        if schema.len() != self.field_count || schema.fingerprint() != self.schema_fingerprint {
            return Err(Error::SchemaMismatch(format!(
                "mapping resolved for {} columns cannot be reused on a result set of {} columns with a different shape",
                self.field_count,
                schema.len()
            )));
        }
        Ok(())
    }

    /// Hash of the entries and the schema, used as a cache key
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.schema_fingerprint.hash(&mut hasher);
        self.entries.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for ColumnOrdinalMapping {
    fn eq(&self, other: &Self) -> bool {
        self.field_count == other.field_count
            && self.schema_fingerprint == other.schema_fingerprint
            && self.entries == other.entries
    }
}

impl Eq for ColumnOrdinalMapping {}

impl<'a> IntoIterator for &'a ColumnOrdinalMapping {
    type Item = &'a ColumnOrdinal;
    type IntoIter = std::slice::Iter<'a, ColumnOrdinal>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Resolves requested field names to column ordinals
///
/// Lookup goes through the schema's name index, built once, so resolution
/// is linear in the number of columns plus requested fields.
#[derive(Debug, Clone)]
pub struct OrdinalMapper<'a> {
    schema: &'a Schema,
    overrides: BTreeMap<String, String>,
    order: MappingOrder,
    strict: bool,
}

impl<'a> OrdinalMapper<'a> {
    /// Create a mapper over a schema snapshot
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            overrides: BTreeMap::new(),
            order: MappingOrder::default(),
            strict: false,
        }
    }

    /// Read `field` from `column` instead of the column of the same name
    pub fn with_override(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.overrides.insert(field.into(), column.into());
        self
    }

    /// Add several field to column overrides
    pub fn with_overrides<I, F, C>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<String>,
    {
        self.overrides
            .extend(overrides.into_iter().map(|(f, c)| (f.into(), c.into())));
        self
    }

    /// Choose the entry order of the resolved mapping
    pub fn order(mut self, order: MappingOrder) -> Self {
        self.order = order;
        self
    }

    /// Fail on unmatched fields instead of dropping them
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Column for `field`: an exact override, else the first override in
    /// name order that matches once folded, else the field itself
    fn column_for<'f>(&'f self, field: &'f str) -> &'f str {
        if let Some(column) = self.overrides.get(field) {
            return column;
        }
        self.overrides
            .iter()
            .find(|(name, _)| names_match(name, field))
            .map_or(field, |(_, column)| column.as_str())
    }

    /// Resolve `fields` into a mapping
    ///
    /// Unmatched fields are dropped unless the mapper is strict, in which
    /// case every unmatched name is reported in one
    /// [`Error::MissingColumns`]. A field requested twice maps once.
    pub fn map<I, S>(&self, fields: I) -> Result<ColumnOrdinalMapping>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut missing = Vec::new();

        for field in fields {
            let field = field.as_ref();
            if !seen.insert(fold_name(field)) {
                continue;
            }

            let column = self.column_for(field);
            match self.schema.index_of(column) {
                Some(ordinal) => entries.push(ColumnOrdinal {
                    name: field.to_string(),
                    column: self.schema.fields()[ordinal].name.clone(),
                    ordinal,
                }),
                None => missing.push(field.to_string()),
            }
        }

        if !missing.is_empty() {
            if self.strict {
                return Err(Error::MissingColumns { missing });
            }
            tracing::debug!(?missing, "dropping unmatched fields from ordinal mapping");
        }

        if self.order == MappingOrder::Ordinal {
            entries.sort_by_key(|entry| entry.ordinal);
        }

        Ok(ColumnOrdinalMapping {
            entries: entries.into(),
            field_count: self.schema.len(),
            schema_fingerprint: self.schema.fingerprint(),
        })
    }
}
