//! Flat-file exports of cleaned records.

use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::sanitize::clean_unnecessary_headers;
use crate::domain::Record;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Nothing to export after cleaning")]
    Empty,
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Union of keys across records, in first-seen order.
fn columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Writes cleaned records as CSV with a header row. Returns the row count.
///
/// An empty result still produces a (blank) file.
pub fn export_to_csv(records: &[Record], path: &Path) -> Result<usize, ExportError> {
    let cleaned = clean_unnecessary_headers(records.to_vec());
    if cleaned.is_empty() {
        std::fs::write(path, b"").map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(0);
    }

    let columns = columns(&cleaned);
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&columns)?;
    for record in &cleaned {
        writer.write_record(
            columns
                .iter()
                .map(|column| cell_text(record.get(column)).unwrap_or_default()),
        )?;
    }
    writer.flush().map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), rows = cleaned.len(), "Exported CSV");
    Ok(cleaned.len())
}

/// Narrowest Arrow type holding every non-null value of a column.
fn infer_type(records: &[Record], column: &str) -> DataType {
    let values: Vec<&Value> = records
        .iter()
        .filter_map(|record| record.get(column))
        .filter(|value| !value.is_null())
        .collect();

    if values.is_empty() {
        DataType::Utf8
    } else if values.iter().all(|v| v.as_i64().is_some()) {
        DataType::Int64
    } else if values.iter().all(|v| v.is_number()) {
        DataType::Float64
    } else if values.iter().all(|v| v.is_boolean()) {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn build_array(records: &[Record], column: &str, data_type: &DataType) -> ArrayRef {
    let cells = records.iter().map(|record| record.get(column));
    match data_type {
        DataType::Int64 => Arc::new(Int64Array::from(
            cells.map(|v| v.and_then(Value::as_i64)).collect::<Vec<_>>(),
        )),
        DataType::Float64 => Arc::new(Float64Array::from(
            cells.map(|v| v.and_then(Value::as_f64)).collect::<Vec<_>>(),
        )),
        DataType::Boolean => Arc::new(BooleanArray::from(
            cells.map(|v| v.and_then(Value::as_bool)).collect::<Vec<_>>(),
        )),
        _ => Arc::new(StringArray::from(cells.map(cell_text).collect::<Vec<_>>())),
    }
}

/// Writes cleaned records as a single-batch Parquet file. Returns the row
/// count; an empty result is an error.
pub fn export_to_parquet(records: &[Record], path: &Path) -> Result<usize, ExportError> {
    let cleaned = clean_unnecessary_headers(records.to_vec());
    if cleaned.is_empty() {
        return Err(ExportError::Empty);
    }

    let columns = columns(&cleaned);
    let types: Vec<DataType> = columns.iter().map(|c| infer_type(&cleaned, c)).collect();

    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .zip(&types)
            .map(|(name, data_type)| Field::new(name.as_str(), data_type.clone(), true))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .zip(&types)
        .map(|(name, data_type)| build_array(&cleaned, name, data_type))
        .collect();
    let batch = RecordBatch::try_new(schema, arrays)?;

    let file = File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;

    info!(path = %path.display(), rows = batch.num_rows(), "Exported Parquet");
    Ok(batch.num_rows())
}
