//! Error types for domfeat.
//!
//! Every variant is fatal for the current run. Per-domain transformer problems
//! never surface here: transformers degrade to default feature values instead.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DomfeatError>;

/// Top-level error type for domfeat operations.
#[derive(Debug, thiserror::Error)]
pub enum DomfeatError {
    /// Missing or invalid configuration (connection string, CLI arguments,
    /// unknown transformer names).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The document database could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Two transformers in one chain declare the same output key.
    #[error("Duplicate feature key '{key}' produced by both '{first}' and '{second}'")]
    DuplicateFeatureKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("Unsupported output format: '{0}' (expected parquet, csv, json or jsonl)")]
    UnsupportedFormat(String),

    #[error("Schema mismatch in {}: {message}", path.display())]
    SchemaMismatch { path: PathBuf, message: String },

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DomfeatError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn schema_mismatch(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            path: path.into(),
            message: msg.into(),
        }
    }
}

impl From<figment::Error> for DomfeatError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_message_names_both_transformers() {
        let err = DomfeatError::DuplicateFeatureKey {
            key: "length".into(),
            first: "length".into(),
            second: "custom_length".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'length'"));
        assert!(msg.contains("'custom_length'"));
    }

    #[test]
    fn test_io_error_keeps_system_message() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err: DomfeatError = io.into();
        assert_eq!(err.to_string(), "IO error: permission denied");
    }

    #[test]
    fn test_unsupported_format_lists_choices() {
        let err = DomfeatError::UnsupportedFormat("xlsx".into());
        assert!(err.to_string().contains("'xlsx'"));
        assert!(err.to_string().contains("parquet"));
    }
}
