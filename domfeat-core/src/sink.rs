//! Feature sink: serialize feature records to Parquet, CSV, JSON or JSON Lines.
//!
//! All formats share one rectangular table: one column per distinct feature
//! key observed across the records (first-seen order), `domain_name` first
//! and `label` last. Records lacking a key get [`FeatureValue::Null`].

use crate::error::{DomfeatError, Result};
use crate::persistence::{atomic_write_with, hash_file};
use crate::record::{DOMAIN_COLUMN, FeatureRecord, FeatureValue, LABEL_COLUMN};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Parquet,
    Csv,
    /// A single JSON array of flat objects.
    Json,
    /// One JSON object per line.
    Jsonl,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Parquet, Self::Csv, Self::Json, Self::Jsonl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Jsonl => "jsonl",
        }
    }

    /// Infer the format from a path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                DomfeatError::UnsupportedFormat(format!(
                    "no extension on {} (pass --format)",
                    path.display()
                ))
            })?;
        ext.parse()
    }

    /// Explicit selector first, then the path extension, then the fallback.
    pub fn resolve(
        explicit: Option<OutputFormat>,
        path: &Path,
        fallback: Option<OutputFormat>,
    ) -> Result<Self> {
        if let Some(format) = explicit {
            return Ok(format);
        }
        match (Self::from_path(path), fallback) {
            (Ok(format), _) => Ok(format),
            (Err(_), Some(format)) => Ok(format),
            (Err(e), None) => Err(e),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DomfeatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" | "pq" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            other => Err(DomfeatError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A rectangular view over feature records.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FeatureValue>>,
}

impl FeatureTable {
    pub fn from_records(records: &[FeatureRecord]) -> Self {
        let mut feature_columns: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for record in records {
            for key in record.keys() {
                if key == DOMAIN_COLUMN || key == LABEL_COLUMN {
                    continue;
                }
                if seen.insert(key) {
                    feature_columns.push(key.to_string());
                }
            }
        }

        let mut columns = Vec::with_capacity(feature_columns.len() + 2);
        columns.push(DOMAIN_COLUMN.to_string());
        columns.extend(feature_columns.iter().cloned());
        columns.push(LABEL_COLUMN.to_string());

        let rows = records
            .iter()
            .map(|record| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(FeatureValue::Text(record.domain.clone()));
                for key in &feature_columns {
                    row.push(record.get(key).cloned().unwrap_or(FeatureValue::Null));
                }
                row.push(FeatureValue::from(record.label.clone()));
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Sink settings independent of format.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub csv_delimiter: u8,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self { csv_delimiter: b',' }
    }
}

/// What a completed write produced.
#[derive(Debug, Clone, Serialize)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub rows: usize,
    pub columns: usize,
    pub sha256: String,
}

/// Writes feature records to a file in one format.
#[derive(Debug, Clone)]
pub struct FeatureSink {
    format: OutputFormat,
    options: SinkOptions,
}

impl FeatureSink {
    pub fn new(format: OutputFormat, options: SinkOptions) -> Self {
        Self { format, options }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Write all records to `path` atomically.
    pub fn write(&self, records: &[FeatureRecord], path: &Path) -> Result<WriteSummary> {
        let table = FeatureTable::from_records(records);
        self.write_table(&table, path)
    }

    pub fn write_table(&self, table: &FeatureTable, path: &Path) -> Result<WriteSummary> {
        debug!(
            path = %path.display(),
            format = %self.format,
            rows = table.row_count(),
            "Writing feature table"
        );
        atomic_write_with(path, |w| match self.format {
            OutputFormat::Csv => write_csv(table, w, self.options.csv_delimiter),
            OutputFormat::Json => write_json_array(table, w),
            OutputFormat::Jsonl => write_json_lines(table, w),
            OutputFormat::Parquet => write_parquet(table, w),
        })?;

        let summary = WriteSummary {
            path: path.to_path_buf(),
            format: self.format,
            rows: table.row_count(),
            columns: table.column_count(),
            sha256: hash_file(path)?,
        };
        info!(
            path = %path.display(),
            format = %self.format,
            rows = summary.rows,
            columns = summary.columns,
            sha256 = %summary.sha256,
            "Feature file written"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// CSV / JSON
// ---------------------------------------------------------------------------

fn write_csv<W: Write>(table: &FeatureTable, w: &mut W, delimiter: u8) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(w);
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// One table row serialized as a flat object in column order.
struct RowObject<'a> {
    columns: &'a [String],
    values: &'a [FeatureValue],
}

impl Serialize for RowObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

fn write_json_array<W: Write>(table: &FeatureTable, w: &mut W) -> Result<()> {
    let rows: Vec<RowObject<'_>> = table
        .rows
        .iter()
        .map(|values| RowObject {
            columns: &table.columns,
            values,
        })
        .collect();
    serde_json::to_writer(&mut *w, &rows)?;
    w.write_all(b"\n")?;
    Ok(())
}

fn write_json_lines<W: Write>(table: &FeatureTable, w: &mut W) -> Result<()> {
    for values in &table.rows {
        let row = RowObject {
            columns: &table.columns,
            values,
        };
        serde_json::to_writer(&mut *w, &row)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a FeatureValue>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in values {
        let this = match value {
            FeatureValue::Null => continue,
            FeatureValue::Int(_) => ColumnKind::Int,
            FeatureValue::Float(_) => ColumnKind::Float,
            FeatureValue::Bool(_) => ColumnKind::Bool,
            FeatureValue::Text(_) => return ColumnKind::Text,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

/// Build an Arrow record batch with one typed, nullable column per table column.
pub fn table_to_record_batch(table: &FeatureTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.column_count());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.column_count());

    for (idx, name) in table.columns.iter().enumerate() {
        let column = table.rows.iter().map(|row| &row[idx]);
        let kind = infer_kind(column.clone());
        let (dtype, array): (DataType, ArrayRef) = match kind {
            ColumnKind::Int => (
                DataType::Int64,
                Arc::new(Int64Array::from(
                    column
                        .map(|v| match v {
                            FeatureValue::Int(i) => Some(*i),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Float => (
                DataType::Float64,
                Arc::new(Float64Array::from(
                    column.map(FeatureValue::as_f64).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Bool => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(
                    column
                        .map(|v| match v {
                            FeatureValue::Bool(b) => Some(*b),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Text => (
                DataType::Utf8,
                Arc::new(StringArray::from(
                    column
                        .map(|v| (!v.is_null()).then(|| v.to_string()))
                        .collect::<Vec<_>>(),
                )),
            ),
        };
        fields.push(Field::new(name, dtype, true));
        arrays.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn write_parquet<W: Write + Send>(table: &FeatureTable, w: &mut W) -> Result<()> {
    let batch = table_to_record_batch(table)?;
    write_batches(w, batch.schema(), std::slice::from_ref(&batch))
}

/// Write record batches as one Snappy-compressed Parquet file.
pub(crate) fn write_batches<W: Write + Send>(
    w: W,
    schema: arrow::datatypes::SchemaRef,
    batches: &[RecordBatch],
) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(w, schema, Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DomainRecord;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(domain: &str, label: Option<&str>, feats: &[(&str, FeatureValue)]) -> FeatureRecord {
        let mut dr = DomainRecord::new(domain);
        if let Some(l) = label {
            dr = dr.with_label(l);
        }
        let mut fr = FeatureRecord::for_domain(&dr);
        for (k, v) in feats {
            fr.insert(*k, v.clone());
        }
        fr
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("parquet".parse::<OutputFormat>().unwrap(), OutputFormat::Parquet);
        assert_eq!("ndjson".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
        assert!(matches!(
            "xlsx".parse::<OutputFormat>(),
            Err(DomfeatError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_format_resolution_order() {
        let path = Path::new("out.csv");
        assert_eq!(
            OutputFormat::resolve(Some(OutputFormat::Json), path, None).unwrap(),
            OutputFormat::Json
        );
        assert_eq!(
            OutputFormat::resolve(None, path, None).unwrap(),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::resolve(None, Path::new("out"), Some(OutputFormat::Parquet)).unwrap(),
            OutputFormat::Parquet
        );
        assert!(OutputFormat::resolve(None, Path::new("out.xlsx"), None).is_err());
    }

    #[test]
    fn test_table_fills_missing_with_null() {
        let records = vec![
            record("a.com", Some("benign"), &[("length", FeatureValue::Int(5))]),
            record("b.com", None, &[("entropy", FeatureValue::Float(1.5))]),
        ];
        let table = FeatureTable::from_records(&records);
        assert_eq!(table.columns, vec!["domain_name", "length", "entropy", "label"]);
        assert_eq!(
            table.rows[0],
            vec![
                FeatureValue::Text("a.com".into()),
                FeatureValue::Int(5),
                FeatureValue::Null,
                FeatureValue::Text("benign".into()),
            ]
        );
        assert_eq!(table.rows[1][1], FeatureValue::Null);
        assert_eq!(table.rows[1][3], FeatureValue::Null);
    }

    #[test]
    fn test_csv_label_last_and_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let sink = FeatureSink::new(OutputFormat::Csv, SinkOptions { csv_delimiter: b';' });
        sink.write(
            &[record("a.com", Some("dga"), &[("length", FeatureValue::Int(5))])],
            &path,
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["domain_name;length;label", "a.com;5;dga"]);
    }

    #[test]
    fn test_json_array_is_rectangular() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let records = vec![
            record("a.com", Some("x"), &[("length", FeatureValue::Int(5))]),
            record("b.com", Some("x"), &[("is_idn", FeatureValue::Bool(false))]),
        ];
        FeatureSink::new(OutputFormat::Json, SinkOptions::default())
            .write(&records, &path)
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        for row in rows {
            let obj = row.as_object().unwrap();
            assert_eq!(obj.len(), 4);
            for key in ["domain_name", "length", "is_idn", "label"] {
                assert!(obj.contains_key(key), "missing {key}");
            }
        }
        assert!(rows[1]["length"].is_null());
    }

    #[test]
    fn test_jsonl_one_object_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        let records = vec![
            record("a.com", None, &[("length", FeatureValue::Int(5))]),
            record("bb.com", None, &[("length", FeatureValue::Int(6))]),
        ];
        FeatureSink::new(OutputFormat::Jsonl, SinkOptions::default())
            .write(&records, &path)
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"domain_name":"a.com","length":5,"label":null}"#,
                r#"{"domain_name":"bb.com","length":6,"label":null}"#,
            ]
        );
    }

    #[test]
    fn test_parquet_column_types() {
        let records = vec![
            record(
                "a.com",
                Some("dga"),
                &[
                    ("length", FeatureValue::Int(5)),
                    ("ratio", FeatureValue::Int(0)),
                    ("is_idn", FeatureValue::Bool(false)),
                    ("tld", FeatureValue::Text("com".into())),
                ],
            ),
            record("b.com", Some("dga"), &[("ratio", FeatureValue::Float(0.5))]),
        ];
        let batch = table_to_record_batch(&FeatureTable::from_records(&records)).unwrap();
        let schema = batch.schema();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(schema.field_with_name("length").unwrap().data_type(), &DataType::Int64);
        assert_eq!(schema.field_with_name("ratio").unwrap().data_type(), &DataType::Float64);
        assert_eq!(schema.field_with_name("is_idn").unwrap().data_type(), &DataType::Boolean);
        assert_eq!(schema.field_with_name("tld").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(schema.field(schema.fields().len() - 1).name(), "label");
    }

    #[test]
    fn test_parquet_roundtrip_row_count() {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.parquet");
        let records = vec![
            record("a.com", Some("dga"), &[("length", FeatureValue::Int(5))]),
            record("b.com", Some("dga"), &[("length", FeatureValue::Int(5))]),
            record("c.com", Some("dga"), &[("length", FeatureValue::Int(5))]),
        ];
        let summary = FeatureSink::new(OutputFormat::Parquet, SinkOptions::default())
            .write(&records, &path)
            .unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.columns, 3);

        let file = std::fs::File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let total: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_empty_records_write_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        let summary = FeatureSink::new(OutputFormat::Csv, SinkOptions::default())
            .write(&[], &path)
            .unwrap();
        assert_eq!(summary.rows, 0);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim_end(),
            "domain_name,label"
        );
    }

    #[test]
    fn test_write_below_a_file_fails_with_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a dir").unwrap();
        let path = blocker.join("out.csv");
        let result = FeatureSink::new(OutputFormat::Csv, SinkOptions::default())
            .write(&[record("a.com", None, &[])], &path);
        assert!(matches!(result, Err(DomfeatError::Io(_))));
        assert!(!path.exists());
    }
}
