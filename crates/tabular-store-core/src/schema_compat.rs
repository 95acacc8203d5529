//! Compatibility of an incoming table with a persisted schema.
//!
//! Rules applied before any row is appended:
//! - The incoming column-name set must equal the schema's set (order is free).
//! - Text must land in text and numbers in numbers.
//! - Numeric columns must pass the same-kind cast rule
//!   ([`NumericType::can_cast_same_kind`]).
//! - Text longer than the declared width is allowed but reported as an
//!   [`Advisory::TextTruncated`].

use std::collections::BTreeSet;

use log::warn;
use snafu::prelude::*;

use crate::{
    advisory::Advisory,
    schema::{ColumnDescriptor, TableSchema},
    table::{ColumnType, NumericType, Table, text_bytes},
};

/// Ways an incoming table can be incompatible with a persisted schema.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum CastError {
    /// The column-name sets differ.
    #[snafu(display(
        "table differs from existing table structure: missing columns {missing:?}, unexpected columns {extra:?}"
    ))]
    ColumnSetMismatch {
        /// Columns in the schema but not in the incoming table.
        missing: Vec<String>,
        /// Columns in the incoming table but not in the schema.
        extra: Vec<String>,
    },

    /// Text values for a numeric column.
    #[snafu(display("column {column} holds text but the table stores {target}"))]
    TextIntoNumeric {
        /// Column name.
        column: String,
        /// Persisted numeric type.
        target: NumericType,
    },

    /// Numeric values for a text column.
    #[snafu(display("column {column} holds {source_type} but the table stores text"))]
    NumericIntoText {
        /// Column name.
        column: String,
        /// Incoming numeric type.
        source_type: NumericType,
    },

    /// Numeric cast that crosses into a lower family.
    #[snafu(display(
        "numeric type of column {column} not consistent with the existing table: cannot store {source_type} as {target}"
    ))]
    UnsafeNumericCast {
        /// Column name.
        column: String,
        /// Incoming numeric type.
        source_type: NumericType,
        /// Persisted numeric type.
        target: NumericType,
    },
}

/// Check that `incoming` can be appended to a table bound to `schema`.
///
/// On success returns the advisories raised (text truncation), each of which
/// has already been logged.
pub fn check_castable(incoming: &Table, schema: &TableSchema) -> Result<Vec<Advisory>, CastError> {
    let incoming_names: BTreeSet<&str> = incoming.column_names().collect();
    let schema_names: BTreeSet<&str> = schema.column_names().collect();

    if incoming_names != schema_names {
        return ColumnSetMismatchSnafu {
            missing: schema_names
                .difference(&incoming_names)
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
            extra: incoming_names
                .difference(&schema_names)
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        }
        .fail();
    }

    let mut advisories = Vec::new();

    for (name, column_type, values) in incoming.columns() {
        // Name sets are equal, so every incoming column has a field.
        let Some(field) = schema.field(name) else {
            continue;
        };

        match (column_type, field.descriptor) {
            (ColumnType::Text, ColumnDescriptor::Text { max_len }) => {
                let longest = text_bytes(values.as_ref())
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .map(<[u8]>::len)
                    .max()
                    .unwrap_or(0);

                if longest > max_len {
                    let advisory = Advisory::TextTruncated {
                        column: name.to_string(),
                        longest,
                        width: max_len,
                    };
                    warn!("{advisory}");
                    advisories.push(advisory);
                }
            }
            (ColumnType::Text, ColumnDescriptor::Numeric(target)) => {
                return TextIntoNumericSnafu {
                    column: name.to_string(),
                    target,
                }
                .fail();
            }
            (ColumnType::Numeric(source_type), ColumnDescriptor::Text { .. }) => {
                return NumericIntoTextSnafu {
                    column: name.to_string(),
                    source_type,
                }
                .fail();
            }
            (ColumnType::Numeric(source_type), ColumnDescriptor::Numeric(target)) => {
                ensure!(
                    source_type.can_cast_same_kind(target),
                    UnsafeNumericCastSnafu {
                        column: name.to_string(),
                        source_type,
                        target,
                    }
                );
            }
        }
    }

    Ok(advisories)
}
