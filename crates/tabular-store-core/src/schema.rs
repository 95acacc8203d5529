//! Persisted table schemas.
//!
//! A [`TableSchema`] is the ordered column contract a persisted table is bound
//! to when it is created. Each [`SchemaField`] records the column's name, its
//! position, and a [`ColumnDescriptor`]: either a numeric type or fixed-width
//! text. Positions are part of the on-disk contract; rows are always written
//! in schema order regardless of the order of the incoming columns.
//!
//! Text has two Arrow representations: bytes on disk ([`DataType::Binary`],
//! truncated to the declared width) and decoded strings in memory
//! ([`DataType::Utf8`]).

use std::{collections::HashSet, fmt, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::table::{ColumnType, NumericType, Table};

/// Default maximum byte width of text columns.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 32;

/// Semantic type of a persisted column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColumnDescriptor {
    /// Numeric column of a fixed native type.
    Numeric(NumericType),
    /// Fixed-width text; values longer than `max_len` bytes are truncated.
    Text {
        /// Declared width in bytes.
        max_len: usize,
    },
}

impl ColumnDescriptor {
    /// Arrow type of the column as stored in row blocks.
    pub fn storage_type(&self) -> DataType {
        match self {
            ColumnDescriptor::Numeric(t) => t.to_arrow(),
            ColumnDescriptor::Text { .. } => DataType::Binary,
        }
    }

    /// Arrow type of the column once read back into memory.
    pub fn decoded_type(&self) -> DataType {
        match self {
            ColumnDescriptor::Numeric(t) => t.to_arrow(),
            ColumnDescriptor::Text { .. } => DataType::Utf8,
        }
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDescriptor::Numeric(t) => write!(f, "{t}"),
            ColumnDescriptor::Text { max_len } => write!(f, "text[{max_len}]"),
        }
    }
}

/// One column of a persisted schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaField {
    /// Column name.
    pub name: String,
    /// Zero-based position of the column on disk.
    pub position: usize,
    /// Semantic type.
    pub descriptor: ColumnDescriptor,
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}: {}", self.name, self.position, self.descriptor)
    }
}

/// Errors raised when assembling a schema by hand.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum SchemaError {
    /// Two fields share a name.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateName {
        /// The duplicated name.
        column: String,
    },

    /// Positions must be exactly `0..n`.
    #[snafu(display("Column positions must be 0..{len} without gaps; found {position} for {column}"))]
    InvalidPosition {
        /// Column with the offending position.
        column: String,
        /// The offending position.
        position: usize,
        /// Number of fields in the schema.
        len: usize,
    },
}

/// Ordered column contract of a persisted table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    fields: Vec<SchemaField>,
}

impl TableSchema {
    /// Construct a validated schema; fields are sorted by position.
    pub fn new(mut fields: Vec<SchemaField>) -> Result<Self, SchemaError> {
        let len = fields.len();
        let mut names = HashSet::with_capacity(len);
        let mut positions = HashSet::with_capacity(len);

        for field in &fields {
            ensure!(
                names.insert(field.name.clone()),
                DuplicateNameSnafu {
                    column: field.name.clone(),
                }
            );
            ensure!(
                field.position < len && positions.insert(field.position),
                InvalidPositionSnafu {
                    column: field.name.clone(),
                    position: field.position,
                    len,
                }
            );
        }

        fields.sort_by_key(|f| f.position);
        Ok(Self { fields })
    }

    /// Fields in position order.
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column names in position order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Arrow schema used for row blocks on disk.
    pub fn storage_arrow_schema(&self) -> SchemaRef {
        self.arrow_schema(ColumnDescriptor::storage_type)
    }

    /// Arrow schema of tables materialized by reads.
    pub fn decoded_arrow_schema(&self) -> SchemaRef {
        self.arrow_schema(ColumnDescriptor::decoded_type)
    }

    fn arrow_schema(&self, to_type: fn(&ColumnDescriptor) -> DataType) -> SchemaRef {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|f| Field::new(f.name.clone(), to_type(&f.descriptor), true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "}}")
    }
}

/// Derive a schema from an in-memory table.
///
/// Text columns become `Text { max_len: max_text_length }`; numeric columns
/// keep their native type. Positions follow the table's column order.
pub fn infer_schema(table: &Table, max_text_length: usize) -> TableSchema {
    let fields = table
        .columns()
        .enumerate()
        .map(|(position, (name, column_type, _))| SchemaField {
            name: name.to_string(),
            position,
            descriptor: match column_type {
                ColumnType::Numeric(t) => ColumnDescriptor::Numeric(t),
                ColumnType::Text => ColumnDescriptor::Text {
                    max_len: max_text_length,
                },
            },
        })
        .collect();

    // Names are unique and positions contiguous by construction of `Table`.
    TableSchema { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float32Array, StringArray, UInt16Array};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn infer_schema_preserves_order_and_types() -> TestResult {
        let table = Table::try_from_columns([
            ("nS2", Arc::new(UInt16Array::from(vec![1, 2])) as ArrayRef),
            ("name", Arc::new(StringArray::from(vec!["x", "y"])) as ArrayRef),
            ("Z", Arc::new(Float32Array::from(vec![0.5, 1.5])) as ArrayRef),
        ])?;

        let schema = infer_schema(&table, 16);
        assert_eq!(
            schema.fields(),
            &[
                SchemaField {
                    name: "nS2".to_string(),
                    position: 0,
                    descriptor: ColumnDescriptor::Numeric(NumericType::UInt16),
                },
                SchemaField {
                    name: "name".to_string(),
                    position: 1,
                    descriptor: ColumnDescriptor::Text { max_len: 16 },
                },
                SchemaField {
                    name: "Z".to_string(),
                    position: 2,
                    descriptor: ColumnDescriptor::Numeric(NumericType::Float32),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn storage_and_decoded_schemas_differ_only_for_text() -> TestResult {
        let schema = TableSchema::new(vec![
            SchemaField {
                name: "event".to_string(),
                position: 0,
                descriptor: ColumnDescriptor::Numeric(NumericType::Int64),
            },
            SchemaField {
                name: "label".to_string(),
                position: 1,
                descriptor: ColumnDescriptor::Text { max_len: 8 },
            },
        ])?;

        let storage = schema.storage_arrow_schema();
        let decoded = schema.decoded_arrow_schema();
        assert_eq!(storage.field(0).data_type(), &DataType::Int64);
        assert_eq!(decoded.field(0).data_type(), &DataType::Int64);
        assert_eq!(storage.field(1).data_type(), &DataType::Binary);
        assert_eq!(decoded.field(1).data_type(), &DataType::Utf8);
        Ok(())
    }

    #[test]
    fn new_sorts_by_position() -> TestResult {
        let schema = TableSchema::new(vec![
            SchemaField {
                name: "b".to_string(),
                position: 1,
                descriptor: ColumnDescriptor::Numeric(NumericType::Int8),
            },
            SchemaField {
                name: "a".to_string(),
                position: 0,
                descriptor: ColumnDescriptor::Numeric(NumericType::Int8),
            },
        ])?;
        assert_eq!(schema.column_names().collect::<Vec<_>>(), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn new_rejects_duplicates_and_gaps() {
        let dup = TableSchema::new(vec![
            SchemaField {
                name: "a".to_string(),
                position: 0,
                descriptor: ColumnDescriptor::Numeric(NumericType::Int8),
            },
            SchemaField {
                name: "a".to_string(),
                position: 1,
                descriptor: ColumnDescriptor::Numeric(NumericType::Int8),
            },
        ]);
        assert_eq!(
            dup.unwrap_err(),
            SchemaError::DuplicateName {
                column: "a".to_string()
            }
        );

        let gap = TableSchema::new(vec![SchemaField {
            name: "a".to_string(),
            position: 3,
            descriptor: ColumnDescriptor::Numeric(NumericType::Int8),
        }]);
        assert!(matches!(
            gap.unwrap_err(),
            SchemaError::InvalidPosition { position: 3, len: 1, .. }
        ));
    }

    #[test]
    fn schema_json_roundtrip() -> TestResult {
        let schema = TableSchema::new(vec![SchemaField {
            name: "label".to_string(),
            position: 0,
            descriptor: ColumnDescriptor::Text { max_len: 32 },
        }])?;
        let json = serde_json::to_string(&schema)?;
        let back: TableSchema = serde_json::from_str(&json)?;
        assert_eq!(back, schema);
        Ok(())
    }
}
