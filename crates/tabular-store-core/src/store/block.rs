//! Row blocks: one Parquet file per non-empty append.
//!
//! Blocks hold columns in schema order with their storage types (text as
//! bytes truncated to the declared width). Reading converts back to the
//! decoded representation (text as UTF-8, lossy).

use std::{collections::HashSet, ops::Range, path::Path, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray, BinaryArray, RecordBatch, StringArray},
    compute::{cast, concat_batches},
    datatypes::{DataType, Float64Type, Int64Type},
};
use bytes::Bytes;
use log::warn;
use parquet::{
    arrow::{
        ArrowWriter, ProjectionMask,
        arrow_reader::{ParquetRecordBatchReaderBuilder, RowSelection},
    },
    errors::ParquetError,
};
use snafu::prelude::*;

use crate::{
    advisory::Advisory,
    compression::Compression,
    schema::{ColumnDescriptor, TableSchema},
    storage::{self, StorageError, StorageLocation},
    table::{NumericKind, Table, batch_with_rows, text_bytes},
};

use super::{
    read::{ArrowSnafu, ReadError, StorageSnafu},
    write::{AssembleSnafu, ConvertSnafu, MissingColumnSnafu, WriteError},
};

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// Reorder and convert `table` into the storage layout of `schema`.
///
/// Every schema column must be present in `table`. Numeric values that do
/// not fit the persisted type become null and are reported as
/// [`Advisory::ValueOutOfRange`].
pub(crate) fn conform(
    table: &Table,
    schema: &TableSchema,
) -> Result<(RecordBatch, Vec<Advisory>), WriteError> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    let mut advisories = Vec::new();

    for field in schema.fields() {
        let values = table.column(&field.name).context(MissingColumnSnafu {
            column: field.name.clone(),
        })?;

        let converted = match field.descriptor {
            ColumnDescriptor::Numeric(target) => {
                let converted = cast(values, &target.to_arrow()).context(ConvertSnafu {
                    column: field.name.clone(),
                })?;
                let lost = converted.null_count().saturating_sub(values.null_count());
                if lost > 0 {
                    let advisory = Advisory::ValueOutOfRange {
                        column: field.name.clone(),
                        count: lost,
                    };
                    warn!("{advisory}");
                    advisories.push(advisory);
                }
                converted
            }
            ColumnDescriptor::Text { max_len } => {
                let truncated: Vec<Option<&[u8]>> = text_bytes(values.as_ref())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| v.map(|b| &b[..b.len().min(max_len)]))
                    .collect();
                Arc::new(BinaryArray::from_opt_vec(truncated)) as ArrayRef
            }
        };
        columns.push(converted);
    }

    let batch = batch_with_rows(schema.storage_arrow_schema(), columns, table.num_rows())
        .context(AssembleSnafu)?;
    Ok((batch, advisories))
}

/// Encode a conformed batch as a standalone Parquet file.
pub(crate) fn encode(batch: &RecordBatch, compression: Compression) -> Result<Vec<u8>, ParquetError> {
    let props = compression.writer_properties()?;
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buf)
}

fn corrupted(path: &str, detail: impl Into<String>) -> ReadError {
    ReadError::StoreCorrupted {
        path: path.to_string(),
        detail: detail.into(),
    }
}

/// Consecutive runs of ascending row positions.
pub(crate) fn ranges_from_positions(positions: &[usize]) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for &pos in positions {
        match ranges.last_mut() {
            Some(last) if last.end == pos => last.end = pos + 1,
            _ => ranges.push(pos..pos + 1),
        }
    }
    ranges
}

/// Integer key equal to `value`, if it has one. Fractional and out-of-range
/// floats never match a key.
fn integral_key(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64)
        .then_some(value as i64)
}

/// Load one block and return it in the decoded layout of `schema`.
///
/// With `keys`, only rows whose `event_column` value is in the set are read.
/// A missing, truncated or undecodable block is reported as
/// [`ReadError::StoreCorrupted`].
pub(crate) async fn load(
    location: &StorageLocation,
    rel_path: &Path,
    schema: &TableSchema,
    keys: Option<(&str, &HashSet<i64>)>,
) -> Result<RecordBatch, ReadError> {
    let path_str = location.root().join(rel_path).display().to_string();

    let probe = match storage::read_head_tail_4(location, rel_path).await {
        Ok(p) => p,
        Err(StorageError::NotFound { .. }) => {
            return Err(corrupted(&path_str, "block listed in metadata is missing"));
        }
        Err(source) => return Err(ReadError::Storage { source }),
    };
    if probe.len < 8 || &probe.head != PARQUET_MAGIC || &probe.tail != PARQUET_MAGIC {
        return Err(corrupted(&path_str, "block is not a Parquet file"));
    }

    let bytes = Bytes::from(
        storage::read_all_bytes(location, rel_path)
            .await
            .context(StorageSnafu)?,
    );
    let bad_block = |e: ParquetError| corrupted(&path_str, format!("undecodable block: {e}"));

    let selection = match keys {
        None => None,
        Some((event_column, keys)) => {
            let float_events = schema.fields().iter().any(|f| {
                f.name == event_column
                    && matches!(
                        f.descriptor,
                        ColumnDescriptor::Numeric(t) if t.kind() == NumericKind::Float
                    )
            });
            let builder =
                ParquetRecordBatchReaderBuilder::try_new(bytes.clone()).map_err(bad_block)?;
            let total_rows = usize::try_from(builder.metadata().file_metadata().num_rows())
                .map_err(|_| corrupted(&path_str, "negative row count"))?;
            let mask = ProjectionMask::columns(builder.parquet_schema(), [event_column]);
            let reader = builder.with_projection(mask).build().map_err(bad_block)?;

            let mut positions = Vec::new();
            let mut offset = 0usize;
            for batch in reader {
                let batch = batch.context(ArrowSnafu)?;
                let events = batch
                    .column_by_name(event_column)
                    .ok_or_else(|| corrupted(&path_str, "block lacks the event column"))?;
                if float_events {
                    let events = cast(events, &DataType::Float64).context(ArrowSnafu)?;
                    positions.extend(
                        events
                            .as_primitive::<Float64Type>()
                            .iter()
                            .enumerate()
                            .filter(|(_, v)| {
                                v.and_then(integral_key).is_some_and(|v| keys.contains(&v))
                            })
                            .map(|(i, _)| offset + i),
                    );
                } else {
                    let events = cast(events, &DataType::Int64).context(ArrowSnafu)?;
                    positions.extend(
                        events
                            .as_primitive::<Int64Type>()
                            .iter()
                            .enumerate()
                            .filter(|(_, v)| v.is_some_and(|v| keys.contains(&v)))
                            .map(|(i, _)| offset + i),
                    );
                }
                offset += batch.num_rows();
            }

            if positions.is_empty() {
                return RecordBatch::try_new(
                    schema.decoded_arrow_schema(),
                    schema
                        .fields()
                        .iter()
                        .map(|f| arrow::array::new_empty_array(&f.descriptor.decoded_type()))
                        .collect(),
                )
                .context(ArrowSnafu);
            }
            Some(RowSelection::from_consecutive_ranges(
                ranges_from_positions(&positions).into_iter(),
                total_rows,
            ))
        }
    };

    let mut builder = ParquetRecordBatchReaderBuilder::try_new(bytes).map_err(bad_block)?;
    let storage_schema = builder.schema().clone();
    if let Some(selection) = selection {
        builder = builder.with_row_selection(selection);
    }
    let reader = builder.build().map_err(bad_block)?;

    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu)?;
    let stored = concat_batches(&storage_schema, &batches).context(ArrowSnafu)?;

    decode(&stored, schema).map_err(|detail| corrupted(&path_str, detail))
}

/// Convert a stored batch into the decoded layout of `schema`.
fn decode(stored: &RecordBatch, schema: &TableSchema) -> Result<RecordBatch, String> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let values = stored
            .column_by_name(&field.name)
            .ok_or_else(|| format!("block lacks column {}", field.name))?;
        let expected = field.descriptor.storage_type();
        if values.data_type() != &expected {
            return Err(format!(
                "column {} is stored as {} instead of {expected}",
                field.name,
                values.data_type()
            ));
        }

        let decoded = match field.descriptor {
            ColumnDescriptor::Numeric(_) => values.clone(),
            ColumnDescriptor::Text { .. } => {
                let strings: StringArray = values
                    .as_binary::<i32>()
                    .iter()
                    .map(|v| v.map(String::from_utf8_lossy))
                    .collect();
                Arc::new(strings) as ArrayRef
            }
        };
        columns.push(decoded);
    }

    batch_with_rows(schema.decoded_arrow_schema(), columns, stored.num_rows())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema::infer_schema, table::Table};
    use arrow::{
        array::{Float64Array, Int8Array, Int16Array, Int64Array},
        datatypes::Int8Type,
    };
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample() -> Result<Table, crate::table::TableError> {
        Table::try_from_columns([
            ("event", Arc::new(Int64Array::from(vec![1, 3, 5, 7, 9])) as ArrayRef),
            (
                "S1e",
                Arc::new(Float64Array::from(vec![0.1, 0.3, 0.5, 0.7, 0.9])) as ArrayRef,
            ),
            (
                "label",
                Arc::new(StringArray::from(vec!["a", "bbbbbb", "c", "d", "e"])) as ArrayRef,
            ),
        ])
    }

    async fn write_block(tmp: &TempDir, table: &Table, schema: &TableSchema) -> TestResult {
        let (batch, _) = conform(table, schema)?;
        let bytes = encode(&batch, Compression::default())?;
        tokio::fs::write(tmp.path().join("block.parquet"), bytes).await?;
        Ok(())
    }

    #[test]
    fn ranges_merge_consecutive_positions() {
        assert_eq!(ranges_from_positions(&[]), Vec::<Range<usize>>::new());
        assert_eq!(ranges_from_positions(&[1, 2, 3, 7, 9, 10]), vec![1..4, 7..8, 9..11]);
    }

    #[test]
    fn conform_reorders_casts_and_truncates() -> TestResult {
        let schema = infer_schema(&sample()?, 3);
        let incoming = Table::try_from_columns([
            ("label", Arc::new(StringArray::from(vec!["abcdef"])) as ArrayRef),
            ("S1e", Arc::new(Float64Array::from(vec![1.0])) as ArrayRef),
            ("event", Arc::new(Int16Array::from(vec![4])) as ArrayRef),
        ])?;

        let (batch, advisories) = conform(&incoming, &schema)?;
        assert!(advisories.is_empty());
        assert_eq!(batch.schema(), schema.storage_arrow_schema());
        assert_eq!(batch.column(0).as_primitive::<Int64Type>().value(0), 4);
        assert_eq!(batch.column(2).as_binary::<i32>().value(0), b"abc");
        Ok(())
    }

    #[test]
    fn conform_reports_values_that_do_not_fit() -> TestResult {
        let narrow = Table::try_from_columns([(
            "event",
            Arc::new(Int8Array::from(vec![1])) as ArrayRef,
        )])?;
        let schema = infer_schema(&narrow, 32);
        let incoming = Table::try_from_columns([(
            "event",
            Arc::new(Int64Array::from(vec![Some(300), Some(-5), None, Some(-1000)])) as ArrayRef,
        )])?;

        let (batch, advisories) = conform(&incoming, &schema)?;
        assert_eq!(
            advisories,
            vec![Advisory::ValueOutOfRange {
                column: "event".to_string(),
                count: 2,
            }]
        );
        let stored = batch.column(0).as_primitive::<Int8Type>();
        assert_eq!(stored.iter().collect::<Vec<_>>(), vec![None, Some(-5), None, None]);
        Ok(())
    }

    #[test]
    fn conform_requires_every_schema_column() -> TestResult {
        let schema = infer_schema(&sample()?, 32);
        let partial = Table::try_from_columns([(
            "event",
            Arc::new(Int64Array::from(vec![1])) as ArrayRef,
        )])?;

        let err = conform(&partial, &schema).unwrap_err();
        assert!(
            matches!(&err, WriteError::MissingColumn { column } if column == "S1e"),
            "unexpected error: {err}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn float_events_match_only_whole_keys() -> TestResult {
        let tmp = TempDir::new()?;
        let table = Table::try_from_columns([(
            "event",
            Arc::new(Float64Array::from(vec![3.7, 5.0, -0.5])) as ArrayRef,
        )])?;
        let schema = infer_schema(&table, 32);
        write_block(&tmp, &table, &schema).await?;
        let location = StorageLocation::local(tmp.path());

        let keys: HashSet<i64> = [3, 0].into_iter().collect();
        let batch = load(
            &location,
            Path::new("block.parquet"),
            &schema,
            Some(("event", &keys)),
        )
        .await?;
        assert_eq!(batch.num_rows(), 0);

        let keys: HashSet<i64> = [5].into_iter().collect();
        let batch = load(
            &location,
            Path::new("block.parquet"),
            &schema,
            Some(("event", &keys)),
        )
        .await?;
        let events = batch.column(0).as_primitive::<Float64Type>().values().to_vec();
        assert_eq!(events, vec![5.0]);
        Ok(())
    }

    #[tokio::test]
    async fn load_without_filter_decodes_everything() -> TestResult {
        let tmp = TempDir::new()?;
        let table = sample()?;
        let schema = infer_schema(&table, 4);
        write_block(&tmp, &table, &schema).await?;

        let location = StorageLocation::local(tmp.path());
        let batch = load(&location, Path::new("block.parquet"), &schema, None).await?;
        assert_eq!(batch.num_rows(), 5);
        let labels = batch.column(2).as_string::<i32>();
        assert_eq!(labels.value(1), "bbbb");
        Ok(())
    }

    #[tokio::test]
    async fn load_with_keys_selects_matching_rows_in_order() -> TestResult {
        let tmp = TempDir::new()?;
        let table = sample()?;
        let schema = infer_schema(&table, 32);
        write_block(&tmp, &table, &schema).await?;

        let location = StorageLocation::local(tmp.path());
        let keys: HashSet<i64> = [7, 3, 42].into_iter().collect();
        let batch = load(
            &location,
            Path::new("block.parquet"),
            &schema,
            Some(("event", &keys)),
        )
        .await?;

        let events = batch.column(0).as_primitive::<Int64Type>().values().to_vec();
        assert_eq!(events, vec![3, 7]);
        let energies = batch.column(1).as_primitive::<arrow::datatypes::Float64Type>();
        assert_eq!(energies.values().to_vec(), vec![0.3, 0.7]);
        Ok(())
    }

    #[tokio::test]
    async fn load_with_unmatched_keys_is_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let table = sample()?;
        let schema = infer_schema(&table, 32);
        write_block(&tmp, &table, &schema).await?;

        let location = StorageLocation::local(tmp.path());
        let keys: HashSet<i64> = [2, 4].into_iter().collect();
        let batch = load(
            &location,
            Path::new("block.parquet"),
            &schema,
            Some(("event", &keys)),
        )
        .await?;
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema.decoded_arrow_schema());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_block_is_corrupted() -> TestResult {
        let tmp = TempDir::new()?;
        tokio::fs::write(tmp.path().join("block.parquet"), b"definitely not parquet").await?;
        let schema = infer_schema(&sample()?, 32);

        let location = StorageLocation::local(tmp.path());
        let err = load(&location, Path::new("block.parquet"), &schema, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::StoreCorrupted { .. }));

        let err = load(&location, Path::new("absent.parquet"), &schema, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::StoreCorrupted { .. }));
        Ok(())
    }
}
