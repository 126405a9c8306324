//! Columnar decoder: Parquet file → ordered order records.
//!
//! Decoding happens in three steps:
//!
//! 1. **Resolve**: every logical field is mapped to a top-level column of the
//!    file, either by declared name or by position ([`FieldResolution`]). The
//!    mapping is validated once, before any column data is read.
//! 2. **Read**: the six resolved columns are read into [`ColumnSequence`]s of
//!    raw values, one entry per row.
//! 3. **Zip**: row `i` is built from element `i` of every sequence, coercing
//!    each value to its field type. Any mismatch rejects the whole file.
//!
//! # Column addressing
//!
//! Some writers emit order files whose column names are unreliable for a
//! subset of fields, so the default resolution addresses those fields by
//! position:
//!
//! | field         | address          |
//! |---------------|------------------|
//! | `order_id`    | index 0          |
//! | `first_name`  | name `FirstName` |
//! | `last_name`   | name `LastName`  |
//! | `email`       | name `Email`     |
//! | `quantity`    | index 4          |
//! | `order_total` | index 5          |

use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, Schema,
    UInt8Type, UInt16Type,
};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use pqload_core::{Error, FieldKind, LoadBatch, OrderField, OrderRecord, Result};

/// File extension the decoder accepts.
pub const PARQUET_EXTENSION: &str = "parquet";

const DEFAULT_BATCH_SIZE: usize = 8192;

/// How a logical field locates its column in the file schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnAddress {
    /// By declared column name.
    Name(String),
    /// By zero-based position among the top-level columns.
    Index(usize),
}

impl fmt::Display for ColumnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(idx) => write!(f, "#{idx}"),
        }
    }
}

impl FromStr for ColumnAddress {
    type Err = Error;

    /// `#N` addresses by index, anything else by name.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("empty column address"));
        }
        match s.strip_prefix('#') {
            Some(idx) => idx
                .parse()
                .map(Self::Index)
                .map_err(|e| Error::config(format!("invalid column index '{s}': {e}"))),
            None => Ok(Self::Name(s.to_string())),
        }
    }
}

/// Per-field column resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResolution {
    addresses: [ColumnAddress; 6],
}

impl Default for FieldResolution {
    fn default() -> Self {
        Self {
            addresses: [
                ColumnAddress::Index(0),
                ColumnAddress::Name("FirstName".to_string()),
                ColumnAddress::Name("LastName".to_string()),
                ColumnAddress::Name("Email".to_string()),
                ColumnAddress::Index(4),
                ColumnAddress::Index(5),
            ],
        }
    }
}

impl FieldResolution {
    /// Replaces the address of one field.
    #[must_use]
    pub fn with(mut self, field: OrderField, address: ColumnAddress) -> Self {
        self.addresses[field.position()] = address;
        self
    }

    /// Address used for `field`.
    #[must_use]
    pub fn address(&self, field: OrderField) -> &ColumnAddress {
        &self.addresses[field.position()]
    }

    /// Applies an override of the form `field=address` (e.g. `quantity=#4`,
    /// `email=Email`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the override is malformed or names an
    /// unknown field.
    pub fn apply_override(&mut self, spec: &str) -> Result<()> {
        let (field, address) = spec
            .split_once('=')
            .ok_or_else(|| Error::config(format!("column override '{spec}' is not field=address")))?;
        let field: OrderField = field.trim().parse()?;
        self.addresses[field.position()] = address.parse()?;
        Ok(())
    }

    /// Resolves every field against `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if a named column does not exist or an index
    /// is out of range.
    pub fn resolve(&self, schema: &Schema) -> Result<ResolvedColumns> {
        let width = schema.fields().len();
        let mut indices = [0_usize; 6];
        for field in OrderField::ALL {
            let idx = match self.address(field) {
                ColumnAddress::Name(name) => schema.index_of(name).map_err(|_| {
                    Error::schema(format!("field '{field}': no column named '{name}'"))
                })?,
                ColumnAddress::Index(idx) if *idx < width => *idx,
                ColumnAddress::Index(idx) => {
                    return Err(Error::schema(format!(
                        "field '{field}': column index {idx} out of range (file has {width} columns)"
                    )));
                }
            };
            indices[field.position()] = idx;
        }
        Ok(ResolvedColumns { indices })
    }
}

/// Column positions resolved for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    indices: [usize; 6],
}

impl ResolvedColumns {
    /// Top-level column index feeding `field`.
    #[must_use]
    pub const fn index(&self, field: OrderField) -> usize {
        self.indices[field.position()]
    }
}

/// A value as stored in the file, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Absent value.
    Null,
    /// Native INT32.
    Int32(i32),
    /// Native INT64.
    Int64(i64),
    /// Native FLOAT.
    Float(f32),
    /// Native DOUBLE.
    Double(f64),
    /// Native BOOLEAN.
    Boolean(bool),
    /// UTF-8 annotated byte array.
    Text(String),
    /// Byte array without a string annotation.
    Bytes(Vec<u8>),
    /// Any other native type, by name.
    Unsupported(String),
}

impl RawValue {
    /// Name of the native type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Int32(_) => "int32".to_string(),
            Self::Int64(_) => "int64".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Double(_) => "double".to_string(),
            Self::Boolean(_) => "boolean".to_string(),
            Self::Text(_) => "text".to_string(),
            Self::Bytes(_) => "binary".to_string(),
            Self::Unsupported(name) => name.clone(),
        }
    }

    fn mismatch(&self, field: OrderField, row: usize) -> Error {
        Error::Coercion {
            field,
            row,
            expected: field.kind().as_str(),
            found: self.type_name(),
        }
    }

    fn into_i32(self, field: OrderField, row: usize) -> Result<i32> {
        match self {
            Self::Int32(v) => Ok(v),
            other => Err(other.mismatch(field, row)),
        }
    }

    fn into_text(self, field: OrderField, row: usize) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Bytes(bytes) => String::from_utf8(bytes).map_err(|_| Error::Coercion {
                field,
                row,
                expected: FieldKind::Text.as_str(),
                found: "binary (invalid utf-8)".to_string(),
            }),
            other => Err(other.mismatch(field, row)),
        }
    }

    fn into_f64(self, field: OrderField, row: usize) -> Result<f64> {
        match self {
            Self::Double(v) => Ok(v),
            other => Err(other.mismatch(field, row)),
        }
    }
}

/// One field's values across all rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSequence {
    /// Field the sequence feeds.
    pub field: OrderField,
    /// Raw values, one per row.
    pub values: Vec<RawValue>,
}

/// The six column sequences of one file, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSet {
    columns: [ColumnSequence; 6],
}

impl ColumnSet {
    /// Builds a set from raw values given in [`OrderField::ALL`] order.
    #[must_use]
    pub fn new(values: [Vec<RawValue>; 6]) -> Self {
        let mut values = values.into_iter();
        Self {
            columns: OrderField::ALL.map(|field| ColumnSequence {
                field,
                values: values.next().unwrap_or_default(),
            }),
        }
    }

    /// Sequence feeding `field`.
    #[must_use]
    pub fn column(&self, field: OrderField) -> &ColumnSequence {
        &self.columns[field.position()]
    }

    /// Zips the sequences into records.
    ///
    /// Every sequence must hold exactly `declared_rows` values. Record `i` is
    /// built solely from element `i` of each sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowCountMismatch`] if a sequence has the wrong length
    /// and [`Error::Coercion`] on the first value of the wrong native type.
    pub fn zip(self, declared_rows: usize) -> Result<LoadBatch> {
        for column in &self.columns {
            if column.values.len() != declared_rows {
                return Err(Error::RowCountMismatch {
                    field: column.field,
                    expected: declared_rows,
                    actual: column.values.len(),
                });
            }
        }

        let [ids, first_names, last_names, emails, quantities, totals] =
            self.columns.map(|column| column.values);
        let rows = ids
            .into_iter()
            .zip(first_names)
            .zip(last_names)
            .zip(emails)
            .zip(quantities)
            .zip(totals)
            .enumerate();

        let mut records = Vec::with_capacity(declared_rows);
        for (row, (((((id, first), last), email), quantity), total)) in rows {
            records.push(OrderRecord {
                order_id: id.into_i32(OrderField::OrderId, row)?,
                first_name: first.into_text(OrderField::FirstName, row)?,
                last_name: last.into_text(OrderField::LastName, row)?,
                email: email.into_text(OrderField::Email, row)?,
                quantity: quantity.into_i32(OrderField::Quantity, row)?,
                order_total: total.into_f64(OrderField::OrderTotal, row)?,
            });
        }
        Ok(LoadBatch::new(records))
    }
}

/// Decodes order files.
#[derive(Debug, Clone)]
pub struct ColumnarDecoder {
    resolution: FieldResolution,
    batch_size: usize,
}

impl Default for ColumnarDecoder {
    fn default() -> Self {
        Self::new(FieldResolution::default())
    }
}

impl ColumnarDecoder {
    /// Creates a decoder with the given resolution strategy.
    #[must_use]
    pub fn new(resolution: FieldResolution) -> Self {
        Self {
            resolution,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the number of rows read per batch.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The resolution strategy in use.
    #[must_use]
    pub fn resolution(&self) -> &FieldResolution {
        &self.resolution
    }

    /// Decodes the file at `path` into a load batch.
    ///
    /// The file handle is released before this returns, on every path.
    ///
    /// # Errors
    ///
    /// - [`Error::FormatMismatch`] if the path lacks the `.parquet` extension
    ///   (checked before the file is touched) or the file is not Parquet
    /// - [`Error::Schema`] if a field cannot be resolved
    /// - [`Error::RowCountMismatch`] / [`Error::Coercion`] from zipping
    pub fn decode(&self, path: &Path) -> Result<LoadBatch> {
        ensure_parquet_extension(path)?;

        let session = ColumnReaderSession::open(path)?;
        let declared_rows = session.declared_rows()?;
        let resolved = self.resolution.resolve(session.schema())?;
        tracing::debug!(
            declared_rows,
            columns = ?OrderField::ALL.map(|f| resolved.index(f)),
            "resolved order columns"
        );

        let columns = session.read_columns(&resolved, self.batch_size)?;
        let batch = ColumnSet::new(columns).zip(declared_rows)?;

        tracing::debug!(rows = batch.len(), "decoded order file");
        Ok(batch)
    }
}

fn ensure_parquet_extension(path: &Path) -> Result<()> {
    if path.extension().and_then(OsStr::to_str) == Some(PARQUET_EXTENSION) {
        Ok(())
    } else {
        Err(Error::format_mismatch(
            path.display().to_string(),
            format!("expected a .{PARQUET_EXTENSION} file"),
        ))
    }
}

/// Open reader over one file. Dropping it closes the file.
struct ColumnReaderSession {
    builder: ParquetRecordBatchReaderBuilder<File>,
    path: String,
}

impl ColumnReaderSession {
    fn open(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| Error::io(format!("cannot open {display}"), e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::format_mismatch(display.clone(), format!("not a readable parquet file: {e}"))
        })?;
        Ok(Self {
            builder,
            path: display,
        })
    }

    fn declared_rows(&self) -> Result<usize> {
        let rows = self.builder.metadata().file_metadata().num_rows();
        usize::try_from(rows).map_err(|_| {
            Error::format_mismatch(self.path.clone(), format!("invalid declared row count {rows}"))
        })
    }

    fn schema(&self) -> &Schema {
        self.builder.schema()
    }

    fn read_columns(
        self,
        resolved: &ResolvedColumns,
        batch_size: usize,
    ) -> Result<[Vec<RawValue>; 6]> {
        // Projected batches carry the selected roots in ascending schema order.
        let mut roots = resolved.indices.to_vec();
        roots.sort_unstable();
        roots.dedup();
        let positions = resolved
            .indices
            .map(|idx| roots.partition_point(|&root| root < idx));

        let mask = ProjectionMask::roots(self.builder.parquet_schema(), roots.iter().copied());
        let path = self.path;
        let reader = self
            .builder
            .with_projection(mask)
            .with_batch_size(batch_size)
            .build()
            .map_err(|e| Error::format_mismatch(path.clone(), format!("reader build failed: {e}")))?;

        let mut columns: [Vec<RawValue>; 6] = Default::default();
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::format_mismatch(path.clone(), format!("batch read failed: {e}")))?;
            for (values, &pos) in columns.iter_mut().zip(&positions) {
                append_values(batch.column(pos), values);
            }
        }
        Ok(columns)
    }
}

/// Appends the values of one column chunk as raw values.
///
/// Values are classified by how the file stores them: dictionary-encoded
/// columns by their value type, and the narrow integer types Parquet keeps
/// in `INT32` as `int32`.
fn append_values(array: &ArrayRef, out: &mut Vec<RawValue>) {
    if let DataType::Dictionary(_, value_type) = array.data_type() {
        match cast(array, value_type) {
            Ok(values) => return append_values(&values, out),
            Err(e) => tracing::debug!(error = %e, "cannot unpack dictionary column"),
        }
    }

    let len = array.len();
    out.reserve(len);
    let mut push = |value_at: &dyn Fn(usize) -> RawValue| {
        for row in 0..len {
            out.push(if array.is_null(row) {
                RawValue::Null
            } else {
                value_at(row)
            });
        }
    };

    match array.data_type() {
        DataType::Int8 => {
            let values = array.as_primitive::<Int8Type>();
            push(&|row| RawValue::Int32(i32::from(values.value(row))));
        }
        DataType::Int16 => {
            let values = array.as_primitive::<Int16Type>();
            push(&|row| RawValue::Int32(i32::from(values.value(row))));
        }
        DataType::UInt8 => {
            let values = array.as_primitive::<UInt8Type>();
            push(&|row| RawValue::Int32(i32::from(values.value(row))));
        }
        DataType::UInt16 => {
            let values = array.as_primitive::<UInt16Type>();
            push(&|row| RawValue::Int32(i32::from(values.value(row))));
        }
        DataType::Int32 => {
            let values = array.as_primitive::<Int32Type>();
            push(&|row| RawValue::Int32(values.value(row)));
        }
        DataType::Int64 => {
            let values = array.as_primitive::<Int64Type>();
            push(&|row| RawValue::Int64(values.value(row)));
        }
        DataType::Float32 => {
            let values = array.as_primitive::<Float32Type>();
            push(&|row| RawValue::Float(values.value(row)));
        }
        DataType::Float64 => {
            let values = array.as_primitive::<Float64Type>();
            push(&|row| RawValue::Double(values.value(row)));
        }
        DataType::Boolean => {
            let values = array.as_boolean();
            push(&|row| RawValue::Boolean(values.value(row)));
        }
        DataType::Utf8 => {
            let values = array.as_string::<i32>();
            push(&|row| RawValue::Text(values.value(row).to_string()));
        }
        DataType::LargeUtf8 => {
            let values = array.as_string::<i64>();
            push(&|row| RawValue::Text(values.value(row).to_string()));
        }
        DataType::Utf8View => {
            let values = array.as_string_view();
            push(&|row| RawValue::Text(values.value(row).to_string()));
        }
        DataType::Binary => {
            let values = array.as_binary::<i32>();
            push(&|row| RawValue::Bytes(values.value(row).to_vec()));
        }
        DataType::LargeBinary => {
            let values = array.as_binary::<i64>();
            push(&|row| RawValue::Bytes(values.value(row).to_vec()));
        }
        other => {
            let name = other.to_string();
            push(&|_| RawValue::Unsupported(name.clone()));
        }
    }
}
