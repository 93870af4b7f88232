//! Columnar ensemble export (Arrow / Parquet)
//!
//! Schema: `index: UInt64`, `misfit: Float64`, then one non-null `Float64`
//! column per exported parameter, one row per pooled ensemble member.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::EnsembleView;
use crate::Result;

/// Convert an ensemble view to an Arrow record batch.
///
/// # Errors
///
/// Returns [`crate::Error::Arrow`] if the batch cannot be assembled.
pub fn to_record_batch(view: &EnsembleView) -> Result<RecordBatch> {
    let mut fields = vec![
        Field::new("index", DataType::UInt64, false),
        Field::new("misfit", DataType::Float64, false),
    ];
    fields.extend(
        view.names
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Float64, false)),
    );

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from_iter_values(
            view.members.iter().map(|m| m.index),
        )),
        Arc::new(Float64Array::from_iter_values(
            view.members.iter().map(|m| m.misfit),
        )),
    ];
    for j in 0..view.names.len() {
        columns.push(Arc::new(Float64Array::from_iter_values(
            view.members.iter().map(|m| m.values[j]),
        )));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Write an ensemble view as a single-batch Parquet file.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the file cannot be created, or
/// [`crate::Error::Arrow`] / [`crate::Error::Parquet`] on encoding failures.
pub fn write_parquet(view: &EnsembleView, path: impl AsRef<Path>) -> Result<()> {
    let batch = to_record_batch(view)?;
    let file = File::create(path.as_ref())?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}
