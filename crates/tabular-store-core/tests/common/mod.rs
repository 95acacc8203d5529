#![allow(dead_code)]

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, AsArray, Float64Array, Int64Array, StringArray},
    datatypes::{Float64Type, Int64Type},
};
use tabular_store_core::{Table, TableError};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A DST-like table: `event`, `time`, `S1e` and a `label` text column.
pub fn dst_table(events: &[i64]) -> Result<Table, TableError> {
    let times: Vec<f64> = events.iter().map(|e| *e as f64 * 1e3).collect();
    let s1e: Vec<f64> = events.iter().map(|e| 10.0 + *e as f64).collect();
    let labels: Vec<String> = events.iter().map(|e| format!("evt{e}")).collect();

    Table::try_from_columns([
        ("event", Arc::new(Int64Array::from(events.to_vec())) as ArrayRef),
        ("time", Arc::new(Float64Array::from(times)) as ArrayRef),
        ("S1e", Arc::new(Float64Array::from(s1e)) as ArrayRef),
        ("label", Arc::new(StringArray::from(labels)) as ArrayRef),
    ])
}

pub fn i64_column(table: &Table, name: &str) -> Result<Vec<i64>, Box<dyn std::error::Error>> {
    let column = table.column(name).ok_or_else(|| format!("no column {name}"))?;
    Ok(column.as_primitive::<Int64Type>().values().to_vec())
}

pub fn f64_column(table: &Table, name: &str) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    let column = table.column(name).ok_or_else(|| format!("no column {name}"))?;
    Ok(column.as_primitive::<Float64Type>().values().to_vec())
}

pub fn text_column(table: &Table, name: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let column = table.column(name).ok_or_else(|| format!("no column {name}"))?;
    Ok(column
        .as_string::<i32>()
        .iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}
