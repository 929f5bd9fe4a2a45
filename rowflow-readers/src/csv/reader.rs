//! CSV row source

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use rowflow_core::{DataType, Error as CoreError, Field, RowSource, Schema, Value};

use crate::error::{Error, Result};

use super::parser::CellParser;

/// Options for CSV row sources
#[derive(Debug, Clone)]
pub struct CsvReaderOptions {
    /// Whether the CSV has a header row
    pub has_header: bool,

    /// Delimiter character
    pub delimiter: u8,

    /// Quote character
    pub quote: u8,

    /// Escape character
    pub escape: Option<u8>,

    /// Comment character
    pub comment: Option<u8>,

    /// Whether to trim whitespace
    pub trim: bool,

    /// Cell text read as the database-null sentinel
    pub null_text: Option<String>,
}

impl Default for CsvReaderOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            quote: b'"',
            escape: None,
            comment: None,
            trim: false,
            null_text: Some(String::new()),
        }
    }
}

impl CsvReaderOptions {
    fn builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(self.has_header)
            .flexible(true)
            .escape(self.escape)
            .comment(self.comment)
            .trim(if self.trim { Trim::All } else { Trim::None });
        builder
    }
}

/// A forward-only cursor over CSV records
///
/// Records are parsed into the declared column types lazily, one cell per
/// [`RowSource::value`] call. Without an explicit schema every column is a
/// nullable string named after the header, or `column_<n>` when there is
/// no header.
pub struct CsvRowSource<R: Read + Send> {
    reader: csv::Reader<R>,
    schema: Schema,
    parser: CellParser,
    record: StringRecord,
    pending: Option<StringRecord>,
    positioned: bool,
    rows_read: u64,
}

impl<R: Read + Send> CsvRowSource<R> {
    /// Create a source with string columns named from the header
    pub fn new(reader: R, options: CsvReaderOptions) -> Result<Self> {
        let mut reader = options.builder().from_reader(reader);
        let mut pending = None;

        let names: Vec<String> = if options.has_header {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            let mut first = StringRecord::new();
            let names = if reader.read_record(&mut first)? {
                (0..first.len()).map(|i| format!("column_{i}")).collect()
            } else {
                Vec::new()
            };
            pending = Some(first).filter(|record| !record.is_empty());
            names
        };

        let fields = names
            .iter()
            .map(|name| Field::new(name, DataType::String, true))
            .collect();
        Self::build(reader, Schema::new(fields), &options, pending)
    }

    /// Create a source whose cells are parsed per `schema`
    ///
    /// A header, if present, must have as many columns as the schema; the
    /// schema's names win.
    pub fn with_schema(reader: R, schema: Schema, options: CsvReaderOptions) -> Result<Self> {
        let mut reader = options.builder().from_reader(reader);
        if options.has_header {
            let header_len = reader.headers()?.len();
            if header_len != schema.len() {
                return Err(Error::Schema(format!(
                    "CSV header has {header_len} columns but the schema has {}",
                    schema.len()
                )));
            }
        }
        Self::build(reader, schema, &options, None)
    }

    fn build(
        reader: csv::Reader<R>,
        schema: Schema,
        options: &CsvReaderOptions,
        pending: Option<StringRecord>,
    ) -> Result<Self> {
        if schema.is_empty() {
            return Err(Error::InvalidArgument("CSV input has no columns".into()));
        }
        tracing::debug!(columns = schema.len(), "opened CSV row source");
        Ok(Self {
            reader,
            schema,
            parser: CellParser::new(options.null_text.clone()),
            record: StringRecord::new(),
            pending,
            positioned: false,
            rows_read: 0,
        })
    }

    /// Records advanced past so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn read_next(&mut self) -> Result<bool> {
        if let Some(record) = self.pending.take() {
            self.record = record;
        } else if !self.reader.read_record(&mut self.record)? {
            return Ok(false);
        }

        if self.record.len() != self.schema.len() {
            let line = self.record.position().map_or(0, csv::Position::line);
            return Err(Error::Schema(format!(
                "record on line {line} has {} fields, expected {}",
                self.record.len(),
                self.schema.len()
            )));
        }
        Ok(true)
    }
}

impl CsvRowSource<File> {
    /// Open a CSV file
    pub fn from_path(path: impl AsRef<Path>, options: CsvReaderOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(file, options)
    }
}

impl<R: Read + Send> RowSource for CsvRowSource<R> {
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
        let advanced = self.read_next()?;
        self.positioned = advanced;
        if advanced {
            self.rows_read += 1;
        }
        Ok(advanced)
    }

    fn value(&self, ordinal: usize) -> rowflow_core::Result<Value> {
        if !self.positioned {
            return Err(CoreError::cursor_message("no current record; call advance first"));
        }
        let field = self.schema.field(ordinal)?;
        let text = self.record.get(ordinal).ok_or(CoreError::OrdinalOutOfRange {
            ordinal,
            field_count: self.record.len(),
        })?;
        Ok(self.parser.parse(field, text)?)
    }

    fn schema(&self) -> rowflow_core::Result<Schema> {
        Ok(self.schema.clone())
    }
}
