//! Converts buffered [`FlatRecord`]s into a polars `DataFrame` and writes it
//! as a compressed parquet file.

use crate::batch::error::FlushError;
use crate::config::Compression;
use crate::flatten::record::{FlatRecord, Scalar};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Null,
    Bool,
    Int,
    Float,
    Str,
}

impl ColumnType {
    fn of(value: &Scalar) -> Self {
        match value {
            Scalar::Null => ColumnType::Null,
            Scalar::Bool(_) => ColumnType::Bool,
            Scalar::Int(_) => ColumnType::Int,
            Scalar::Float(_) => ColumnType::Float,
            Scalar::Str(_) => ColumnType::Str,
        }
    }

    fn merge(self, other: ColumnType) -> Self {
        match (self, other) {
            (ColumnType::Null, t) | (t, ColumnType::Null) => t,
            (a, b) if a == b => a,
            (ColumnType::Int, ColumnType::Float) | (ColumnType::Float, ColumnType::Int) => {
                ColumnType::Float
            }
            _ => ColumnType::Str,
        }
    }
}

/// Union of all columns in first-seen order.
pub(crate) fn schema_of(records: &[FlatRecord]) -> Vec<&str> {
    let mut columns: Vec<&str> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for record in records {
        for column in record.columns() {
            if !seen.contains_key(column) {
                seen.insert(column, columns.len());
                columns.push(column);
            }
        }
    }
    columns
}

fn build_series(name: &str, cells: &[Option<&Scalar>]) -> Series {
    let column_type = cells
        .iter()
        .flatten()
        .map(|value| ColumnType::of(value))
        .fold(ColumnType::Null, ColumnType::merge);

    match column_type {
        ColumnType::Bool => {
            let values: Vec<Option<bool>> = cells.iter().map(|c| c.and_then(Scalar::as_bool)).collect();
            Series::new(name.into(), values)
        }
        ColumnType::Int => {
            let values: Vec<Option<i64>> = cells.iter().map(|c| c.and_then(Scalar::as_i64)).collect();
            Series::new(name.into(), values)
        }
        ColumnType::Float => {
            let values: Vec<Option<f64>> = cells.iter().map(|c| c.and_then(Scalar::as_f64)).collect();
            Series::new(name.into(), values)
        }
        ColumnType::Str | ColumnType::Null => {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|c| c.filter(|v| !v.is_null()).map(Scalar::to_string))
                .collect();
            Series::new(name.into(), values)
        }
    }
}

/// Builds a frame whose columns are the union of the records' keys. Absent
/// keys become nulls; each column's type is inferred from its values.
pub fn records_to_dataframe(records: &[FlatRecord]) -> PolarsResult<DataFrame> {
    let columns = schema_of(records);
    let index: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();

    let mut cells: Vec<Vec<Option<&Scalar>>> = vec![vec![None; records.len()]; columns.len()];
    for (row, record) in records.iter().enumerate() {
        for (name, value) in record.iter() {
            if let Some(&col) = index.get(name) {
                cells[col][row] = Some(value);
            }
        }
    }

    let series: Vec<Column> = columns
        .iter()
        .zip(cells.iter())
        .map(|(name, column_cells)| build_series(name, column_cells).into())
        .collect();

    DataFrame::new(series)
}

/// Writes a DataFrame to a parquet file. Blocking; call from `spawn_blocking`.
/// A partially written file is removed on failure.
pub(crate) fn write_parquet(
    mut df: DataFrame,
    path: &Path,
    compression: Compression,
) -> Result<u64, FlushError> {
    let file = std::fs::File::create(path)
        .map_err(|e| FlushError::ParquetWriteIo(path.to_path_buf(), e))?;
    match ParquetWriter::new(file)
        .with_compression(compression.to_parquet())
        .finish(&mut df)
    {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            let _ = std::fs::remove_file(path);
            Err(FlushError::ParquetWritePolars(path.to_path_buf(), e))
        }
    }
}
