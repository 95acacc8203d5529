//! In-memory tables.
//!
//! A [`Table`] is an Arrow [`RecordBatch`] whose columns have each been tagged
//! with a [`ColumnType`] when the table was built. The tag is what the store
//! reasons about: numeric columns carry their exact [`NumericType`], and any
//! UTF-8 or binary column is `Text`. Arrow types outside that set are rejected
//! up front, so the rest of the crate never has to inspect a column's runtime
//! type again.

use std::{collections::HashSet, fmt, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray, RecordBatch, RecordBatchOptions},
    compute::{cast, concat_batches},
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Broad numeric family, ordered from "lowest" to "highest".
///
/// The ordering is the one the same-kind cast rule walks: a value may move to
/// its own family or any family above it, never below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumericKind {
    /// Booleans.
    Bool,
    /// Unsigned integers.
    Unsigned,
    /// Signed integers.
    Signed,
    /// IEEE floating point.
    Float,
}

/// Concrete numeric column type (kind plus width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericType {
    /// Boolean.
    Bool,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
}

impl NumericType {
    /// Map an Arrow data type onto a numeric type, if it is one.
    pub fn from_arrow(data_type: &DataType) -> Option<Self> {
        Some(match data_type {
            DataType::Boolean => NumericType::Bool,
            DataType::UInt8 => NumericType::UInt8,
            DataType::UInt16 => NumericType::UInt16,
            DataType::UInt32 => NumericType::UInt32,
            DataType::UInt64 => NumericType::UInt64,
            DataType::Int8 => NumericType::Int8,
            DataType::Int16 => NumericType::Int16,
            DataType::Int32 => NumericType::Int32,
            DataType::Int64 => NumericType::Int64,
            DataType::Float32 => NumericType::Float32,
            DataType::Float64 => NumericType::Float64,
            _ => return None,
        })
    }

    /// The Arrow data type used to hold values of this type.
    pub fn to_arrow(self) -> DataType {
        match self {
            NumericType::Bool => DataType::Boolean,
            NumericType::UInt8 => DataType::UInt8,
            NumericType::UInt16 => DataType::UInt16,
            NumericType::UInt32 => DataType::UInt32,
            NumericType::UInt64 => DataType::UInt64,
            NumericType::Int8 => DataType::Int8,
            NumericType::Int16 => DataType::Int16,
            NumericType::Int32 => DataType::Int32,
            NumericType::Int64 => DataType::Int64,
            NumericType::Float32 => DataType::Float32,
            NumericType::Float64 => DataType::Float64,
        }
    }

    /// Numeric family of this type.
    pub fn kind(self) -> NumericKind {
        match self {
            NumericType::Bool => NumericKind::Bool,
            NumericType::UInt8 | NumericType::UInt16 | NumericType::UInt32 | NumericType::UInt64 => {
                NumericKind::Unsigned
            }
            NumericType::Int8 | NumericType::Int16 | NumericType::Int32 | NumericType::Int64 => {
                NumericKind::Signed
            }
            NumericType::Float32 | NumericType::Float64 => NumericKind::Float,
        }
    }

    /// Whether values of `self` may be stored into a `target` column under the
    /// same-kind rule.
    ///
    /// Any width change inside a family is allowed, narrowing included, and so
    /// is a move to a higher family (`bool < unsigned < signed < float`).
    pub fn can_cast_same_kind(self, target: NumericType) -> bool {
        self.kind() <= target.kind()
    }

    /// Smallest type that both `self` and `other` convert into without
    /// overflow, following NumPy's promotion table.
    ///
    /// `uint64` combined with any signed type has no such integer type and
    /// promotes to `float64`; so does any integer wider than 16 bits combined
    /// with `float32`.
    pub fn promote(self, other: NumericType) -> NumericType {
        if self == other {
            return self;
        }
        let (lo, hi) = if self.kind() <= other.kind() {
            (self, other)
        } else {
            (other, self)
        };
        let wider = |a: NumericType, b: NumericType| if a.width() >= b.width() { a } else { b };

        match (lo.kind(), hi.kind()) {
            (NumericKind::Bool, _) => hi,
            (a, b) if a == b => wider(lo, hi),
            (NumericKind::Unsigned, NumericKind::Signed) => {
                signed_of_width(hi.width().max(lo.width() * 2)).unwrap_or(NumericType::Float64)
            }
            (_, _) => {
                if hi == NumericType::Float32 && lo.width() <= 2 {
                    NumericType::Float32
                } else {
                    NumericType::Float64
                }
            }
        }
    }

    fn width(self) -> usize {
        match self {
            NumericType::Bool | NumericType::UInt8 | NumericType::Int8 => 1,
            NumericType::UInt16 | NumericType::Int16 => 2,
            NumericType::UInt32 | NumericType::Int32 | NumericType::Float32 => 4,
            NumericType::UInt64 | NumericType::Int64 | NumericType::Float64 => 8,
        }
    }
}

fn signed_of_width(width: usize) -> Option<NumericType> {
    match width {
        1 => Some(NumericType::Int8),
        2 => Some(NumericType::Int16),
        4 => Some(NumericType::Int32),
        8 => Some(NumericType::Int64),
        _ => None,
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NumericType::Bool => "bool",
            NumericType::UInt8 => "uint8",
            NumericType::UInt16 => "uint16",
            NumericType::UInt32 => "uint32",
            NumericType::UInt64 => "uint64",
            NumericType::Int8 => "int8",
            NumericType::Int16 => "int16",
            NumericType::Int32 => "int32",
            NumericType::Int64 => "int64",
            NumericType::Float32 => "float32",
            NumericType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Semantic type of an in-memory column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Numeric column of the given native type.
    Numeric(NumericType),
    /// Text held as UTF-8 strings or raw bytes.
    Text,
}

impl ColumnType {
    /// Classify an Arrow data type; `None` for unsupported types.
    pub fn from_arrow(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
                Some(ColumnType::Text)
            }
            other => NumericType::from_arrow(other).map(ColumnType::Numeric),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Numeric(t) => write!(f, "{t}"),
            ColumnType::Text => f.write_str("text"),
        }
    }
}

/// Errors raised while building or combining in-memory tables.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// A column has an Arrow type the store cannot represent.
    #[snafu(display("Unsupported type {data_type} for column {column}"))]
    UnsupportedColumnType {
        /// Column name.
        column: String,
        /// Offending Arrow type.
        data_type: DataType,
    },

    /// Two columns share a name.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicated name.
        column: String,
    },

    /// Tables being concatenated do not share the same columns and types.
    #[snafu(display("Cannot concatenate tables: expected columns [{expected}], found [{found}]"))]
    SchemaDiffers {
        /// Layout of the first table.
        expected: String,
        /// Layout of the offending table.
        found: String,
    },

    /// Arrow rejected the columns (for example, ragged lengths).
    #[snafu(display("Arrow error while building table: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// Ordered, named, homogeneously typed columns with a uniform row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    batch: RecordBatch,
    column_types: Vec<ColumnType>,
}

impl Table {
    /// Wrap a record batch, tagging each column.
    pub fn try_new(batch: RecordBatch) -> Result<Self, TableError> {
        let mut seen = HashSet::with_capacity(batch.num_columns());
        let mut column_types = Vec::with_capacity(batch.num_columns());

        for field in batch.schema().fields() {
            ensure!(
                seen.insert(field.name().clone()),
                DuplicateColumnSnafu {
                    column: field.name().clone(),
                }
            );
            let column_type =
                ColumnType::from_arrow(field.data_type()).context(UnsupportedColumnTypeSnafu {
                    column: field.name().clone(),
                    data_type: field.data_type().clone(),
                })?;
            column_types.push(column_type);
        }

        Ok(Self {
            batch,
            column_types,
        })
    }

    /// Build a table from `(name, array)` pairs, in order.
    ///
    /// All columns are declared nullable. An empty iterator yields a table with
    /// no columns and no rows.
    pub fn try_from_columns<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, ArrayRef)>,
        S: Into<String>,
    {
        let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns
            .into_iter()
            .map(|(name, array)| {
                let field = Field::new(name, array.data_type().clone(), true);
                (field, array)
            })
            .unzip();

        let rows = arrays.first().map_or(0, |a| a.len());
        let batch = batch_with_rows(Arc::new(Schema::new(fields)), arrays, rows)
            .context(ArrowSnafu)?;
        Self::try_new(batch)
    }

    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
            column_types: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.batch.schema_ref().fields().iter().map(|f| f.name().as_str())
    }

    /// Iterate `(name, type, values)` for every column, in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType, &ArrayRef)> + '_ {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .zip(&self.column_types)
            .zip(self.batch.columns())
            .map(|((field, ty), array)| (field.name().as_str(), *ty, array))
    }

    /// Values of the named column.
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// Semantic type of the named column.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        let idx = self.batch.schema_ref().index_of(name).ok()?;
        self.column_types.get(idx).copied()
    }

    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema_ref().column_with_name(name).is_some()
    }

    /// Arrow schema of the table.
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Borrow the underlying record batch.
    pub fn as_record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Unwrap into the underlying record batch.
    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    /// Concatenate tables with the same column names into one, in order.
    ///
    /// Columns are matched by name and laid out in the first table's order.
    /// Numeric columns whose types differ between inputs are converted to
    /// their promoted type ([`NumericType::promote`]); any other type
    /// difference is [`TableError::SchemaDiffers`]. Row positions are
    /// renumbered from zero. Returns an empty table for empty input.
    pub fn concat(tables: &[Table]) -> Result<Table, TableError> {
        let Some(first) = tables.first() else {
            return Ok(Table::empty());
        };

        let names: Vec<&str> = first.column_names().collect();
        let mut targets: Vec<(DataType, ColumnType, bool)> = first
            .batch
            .schema_ref()
            .fields()
            .iter()
            .zip(&first.column_types)
            .map(|(f, ty)| (f.data_type().clone(), *ty, f.is_nullable()))
            .collect();

        for t in &tables[1..] {
            let differs = || SchemaDiffersSnafu {
                expected: first.layout(),
                found: t.layout(),
            };
            ensure!(t.num_columns() == names.len(), differs());

            for (name, target) in names.iter().zip(targets.iter_mut()) {
                let (idx, field) = t.batch.schema_ref().column_with_name(name).context(differs())?;
                target.2 |= field.is_nullable();
                if field.data_type() == &target.0 {
                    continue;
                }
                match (target.1, t.column_types[idx]) {
                    (ColumnType::Numeric(a), ColumnType::Numeric(b)) => {
                        let promoted = a.promote(b);
                        target.0 = promoted.to_arrow();
                        target.1 = ColumnType::Numeric(promoted);
                    }
                    _ => return differs().fail(),
                }
            }
        }

        let rows: usize = tables.iter().map(Table::num_rows).sum();
        if names.is_empty() {
            let batch = batch_with_rows(first.schema(), Vec::new(), rows).context(ArrowSnafu)?;
            return Table::try_new(batch);
        }

        let schema: SchemaRef = Arc::new(Schema::new(
            names
                .iter()
                .zip(&targets)
                .map(|(name, (data_type, _, nullable))| Field::new(*name, data_type.clone(), *nullable))
                .collect::<Vec<_>>(),
        ));

        let mut batches = Vec::with_capacity(tables.len());
        for t in tables {
            let mut columns = Vec::with_capacity(names.len());
            for (name, (data_type, _, _)) in names.iter().zip(&targets) {
                let values = t.batch.column_by_name(name).context(SchemaDiffersSnafu {
                    expected: first.layout(),
                    found: t.layout(),
                })?;
                columns.push(if values.data_type() == data_type {
                    values.clone()
                } else {
                    cast(values, data_type).context(ArrowSnafu)?
                });
            }
            batches.push(RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)?);
        }
        let batch = concat_batches(&schema, &batches).context(ArrowSnafu)?;

        Ok(Table {
            batch,
            column_types: targets.into_iter().map(|(_, ty, _)| ty).collect(),
        })
    }

    fn layout(&self) -> String {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| format!("{}: {}", f.name(), f.data_type()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Build a record batch with an explicit row count (needed for zero columns).
pub(crate) fn batch_with_rows(
    schema: SchemaRef,
    columns: Vec<ArrayRef>,
    rows: usize,
) -> Result<RecordBatch, ArrowError> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    RecordBatch::try_new_with_options(schema, columns, &options)
}

/// Byte view of every value of a text column (`None` for nulls).
///
/// Returns `None` when the array is not a text type.
pub(crate) fn text_bytes(array: &dyn Array) -> Option<Vec<Option<&[u8]>>> {
    Some(match array.data_type() {
        DataType::Utf8 => array
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(str::as_bytes))
            .collect(),
        DataType::LargeUtf8 => array
            .as_string::<i64>()
            .iter()
            .map(|v| v.map(str::as_bytes))
            .collect(),
        DataType::Binary => array.as_binary::<i32>().iter().collect(),
        DataType::LargeBinary => array.as_binary::<i64>().iter().collect(),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BinaryArray, Date32Array, Float64Array, Int32Array, Int64Array, StringArray};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample() -> Result<Table, TableError> {
        Table::try_from_columns([
            ("event", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
            ("S1e", Arc::new(Float64Array::from(vec![1.5, 2.5, 3.5])) as ArrayRef),
            ("label", Arc::new(StringArray::from(vec!["a", "bb", "ccc"])) as ArrayRef),
        ])
    }

    #[test]
    fn columns_are_tagged_at_construction() -> TestResult {
        let table = sample()?;
        assert_eq!(table.num_rows(), 3);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["event", "S1e", "label"]
        );
        assert_eq!(
            table.column_type("event"),
            Some(ColumnType::Numeric(NumericType::Int64))
        );
        assert_eq!(
            table.column_type("S1e"),
            Some(ColumnType::Numeric(NumericType::Float64))
        );
        assert_eq!(table.column_type("label"), Some(ColumnType::Text));
        assert_eq!(table.column_type("missing"), None);
        Ok(())
    }

    #[test]
    fn binary_columns_are_text() -> TestResult {
        let table = Table::try_from_columns([(
            "raw",
            Arc::new(BinaryArray::from_vec(vec![b"xy".as_slice()])) as ArrayRef,
        )])?;
        assert_eq!(table.column_type("raw"), Some(ColumnType::Text));
        Ok(())
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let err = Table::try_from_columns([(
            "day",
            Arc::new(Date32Array::from(vec![1, 2])) as ArrayRef,
        )])
        .unwrap_err();
        assert!(
            matches!(&err, TableError::UnsupportedColumnType { column, .. } if column == "day"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Table::try_from_columns([
            ("x", Arc::new(Int32Array::from(vec![1])) as ArrayRef),
            ("x", Arc::new(Int32Array::from(vec![2])) as ArrayRef),
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::DuplicateColumn { column } if column == "x"));
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = Table::try_from_columns([
            ("a", Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef),
            ("b", Arc::new(Int32Array::from(vec![1])) as ArrayRef),
        ])
        .unwrap_err();
        assert!(matches!(err, TableError::Arrow { .. }));
    }

    #[test]
    fn same_kind_ordering() {
        use NumericType::*;
        assert!(Int64.can_cast_same_kind(Int8));
        assert!(Int32.can_cast_same_kind(Float64));
        assert!(UInt64.can_cast_same_kind(Int16));
        assert!(Bool.can_cast_same_kind(UInt8));
        assert!(Float64.can_cast_same_kind(Float32));
        assert!(!Float32.can_cast_same_kind(Int64));
        assert!(!Int8.can_cast_same_kind(UInt64));
        assert!(!UInt8.can_cast_same_kind(Bool));
    }

    #[test]
    fn concat_renumbers_rows_and_keeps_order() -> TestResult {
        let a = sample()?;
        let b = Table::try_from_columns([
            ("event", Arc::new(Int64Array::from(vec![9])) as ArrayRef),
            ("S1e", Arc::new(Float64Array::from(vec![9.5])) as ArrayRef),
            ("label", Arc::new(StringArray::from(vec!["z"])) as ArrayRef),
        ])?;

        let joined = Table::concat(&[a, b])?;
        assert_eq!(joined.num_rows(), 4);
        let events = joined
            .column("event")
            .ok_or("event column")?
            .as_primitive::<arrow::datatypes::Int64Type>()
            .values()
            .to_vec();
        assert_eq!(events, vec![1, 2, 3, 9]);
        Ok(())
    }

    #[test]
    fn concat_rejects_different_layouts() -> TestResult {
        let a = sample()?;
        let b = Table::try_from_columns([(
            "event",
            Arc::new(Int64Array::from(vec![9])) as ArrayRef,
        )])?;
        let err = Table::concat(&[a, b]).unwrap_err();
        assert!(matches!(err, TableError::SchemaDiffers { .. }));
        Ok(())
    }

    #[test]
    fn promotion_follows_numpy_table() {
        use NumericType::*;
        assert_eq!(Int32.promote(Int64), Int64);
        assert_eq!(UInt8.promote(UInt32), UInt32);
        assert_eq!(Bool.promote(Int8), Int8);
        assert_eq!(UInt8.promote(Int8), Int16);
        assert_eq!(UInt32.promote(Int16), Int64);
        assert_eq!(UInt64.promote(Int64), Float64);
        assert_eq!(Int16.promote(Float32), Float32);
        assert_eq!(Int32.promote(Float32), Float64);
        assert_eq!(Float32.promote(Float64), Float64);
        assert_eq!(Int64.promote(Int32), Int32.promote(Int64));
    }

    #[test]
    fn concat_promotes_numeric_columns() -> TestResult {
        let wide = Table::try_from_columns([
            ("event", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            ("S1e", Arc::new(Float64Array::from(vec![0.5, 1.0])) as ArrayRef),
        ])?;
        let narrow = Table::try_from_columns([
            ("S1e", Arc::new(Float64Array::from(vec![1.5])) as ArrayRef),
            ("event", Arc::new(Int32Array::from(vec![3])) as ArrayRef),
        ])?;

        let joined = Table::concat(&[narrow, wide])?;
        assert_eq!(joined.column_names().collect::<Vec<_>>(), vec!["S1e", "event"]);
        assert_eq!(
            joined.column_type("event"),
            Some(ColumnType::Numeric(NumericType::Int64))
        );
        let events = joined
            .column("event")
            .ok_or("event column")?
            .as_primitive::<arrow::datatypes::Int64Type>()
            .values()
            .to_vec();
        assert_eq!(events, vec![3, 1, 2]);
        Ok(())
    }

    #[test]
    fn concat_rejects_text_against_numbers() -> TestResult {
        let numbers = Table::try_from_columns([(
            "label",
            Arc::new(Int64Array::from(vec![1])) as ArrayRef,
        )])?;
        let text = Table::try_from_columns([(
            "label",
            Arc::new(StringArray::from(vec!["a"])) as ArrayRef,
        )])?;
        let err = Table::concat(&[numbers, text]).unwrap_err();
        assert!(matches!(err, TableError::SchemaDiffers { .. }));
        Ok(())
    }

    #[test]
    fn text_bytes_views_values() -> TestResult {
        let table = sample()?;
        let label = table.column("label").ok_or("label column")?;
        let bytes = text_bytes(label.as_ref()).ok_or("text column")?;
        assert_eq!(
            bytes,
            vec![Some(b"a".as_slice()), Some(b"bb".as_slice()), Some(b"ccc".as_slice())]
        );
        assert!(text_bytes(table.column("event").ok_or("event")?.as_ref()).is_none());
        Ok(())
    }
}
