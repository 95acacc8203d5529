use std::sync::Arc;

use arrow::{
    array::{ArrayRef, AsArray, Float64Array, Int64Array, StringArray},
    datatypes::Int64Type,
};

use crate::table::{Table, TableError};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// `event` (i64) plus a derived `S1e` (f64) energy column.
pub fn events_table(events: &[i64]) -> Result<Table, TableError> {
    let energies: Vec<f64> = events.iter().map(|e| *e as f64 * 0.5).collect();
    Table::try_from_columns([
        ("event", Arc::new(Int64Array::from(events.to_vec())) as ArrayRef),
        ("S1e", Arc::new(Float64Array::from(energies)) as ArrayRef),
    ])
}

/// A single text column named `label`.
pub fn labelled_table(labels: &[&str]) -> Result<Table, TableError> {
    Table::try_from_columns([(
        "label",
        Arc::new(StringArray::from(labels.to_vec())) as ArrayRef,
    )])
}

pub fn event_values(table: &Table) -> Result<Vec<i64>, Box<dyn std::error::Error>> {
    let column = table.column("event").ok_or("no event column")?;
    Ok(column.as_primitive::<Int64Type>().values().to_vec())
}
