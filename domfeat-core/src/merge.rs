//! Merge Parquet feature files that share one column set.
//!
//! The first input fixes the column order and types; later inputs are
//! reordered (and cast where needed) to match it.

use crate::error::{DomfeatError, Result};
use crate::persistence::{atomic_write_with, hash_file};
use crate::sink::write_batches;
use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{cast, concat_batches, take_record_batch};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Shuffle the merged rows.
    pub shuffle: bool,
    /// Seed for the shuffle; random when absent.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeSummary {
    pub path: PathBuf,
    pub inputs: usize,
    pub rows: usize,
    pub columns: usize,
    pub sha256: String,
}

fn read_parquet(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path)
        .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn column_names(schema: &SchemaRef) -> BTreeSet<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

/// Reorder and cast `batch` to `target`.
fn conform(batch: &RecordBatch, target: &SchemaRef, path: &Path) -> Result<RecordBatch> {
    let source = batch.schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());
    for field in target.fields() {
        let idx = source.index_of(field.name())?;
        let column = batch.column(idx);
        if column.data_type() == field.data_type() {
            columns.push(column.clone());
        } else {
            let converted = cast(column, field.data_type()).map_err(|e| {
                DomfeatError::schema_mismatch(
                    path,
                    format!(
                        "column '{}' is {} but the first file has {}: {e}",
                        field.name(),
                        column.data_type(),
                        field.data_type()
                    ),
                )
            })?;
            columns.push(converted);
        }
    }
    Ok(RecordBatch::try_new(target.clone(), columns)?)
}

/// Concatenate `inputs` into one Parquet file at `output`.
pub fn merge_parquet_files(
    inputs: &[PathBuf],
    output: &Path,
    options: &MergeOptions,
) -> Result<MergeSummary> {
    let Some((first_path, rest)) = inputs.split_first() else {
        return Err(DomfeatError::config("merge needs at least one input file"));
    };

    let (schema, mut batches) = read_parquet(first_path)?;
    let expected = column_names(&schema);
    debug!(path = %first_path.display(), columns = expected.len(), "Read first input");

    for path in rest {
        let (other, other_batches) = read_parquet(path)?;
        let found = column_names(&other);
        if found != expected {
            let missing: Vec<&String> = expected.difference(&found).collect();
            let extra: Vec<&String> = found.difference(&expected).collect();
            return Err(DomfeatError::schema_mismatch(
                path,
                format!(
                    "column names differ from the first file (missing {missing:?}, extra {extra:?})"
                ),
            ));
        }
        for batch in &other_batches {
            batches.push(conform(batch, &schema, path)?);
        }
        debug!(path = %path.display(), batches = other_batches.len(), "Read input");
    }

    let mut merged = concat_batches(&schema, &batches)?;
    if options.shuffle {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let rows = u32::try_from(merged.num_rows())
            .map_err(|_| DomfeatError::config("too many rows to shuffle"))?;
        let mut order: Vec<u32> = (0..rows).collect();
        order.shuffle(&mut rng);
        merged = take_record_batch(&merged, &UInt32Array::from(order))?;
    }

    atomic_write_with(output, |w| {
        write_batches(w, schema.clone(), std::slice::from_ref(&merged))
    })?;

    let summary = MergeSummary {
        path: output.to_path_buf(),
        inputs: inputs.len(),
        rows: merged.num_rows(),
        columns: schema.fields().len(),
        sha256: hash_file(output)?,
    };
    info!(
        path = %output.display(),
        inputs = summary.inputs,
        rows = summary.rows,
        shuffled = options.shuffle,
        "Merged feature files"
    );
    Ok(summary)
}
