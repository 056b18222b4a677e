//! Domain sources: where raw domain records come from.
//!
//! Every source yields a lazy, finite stream of [`DomainRecord`]s. Streams are
//! not restartable; calling [`DomainSource::records`] again re-issues the
//! query or re-reads the files from the start.

use crate::config::MongoConfig;
use crate::error::{DomfeatError, Result};
use crate::record::{DomainRecord, SourceMetadata};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stream of records produced by a source.
pub type RecordStream<'a> = BoxStream<'a, Result<DomainRecord>>;

/// Information about a source for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_type: String,
    pub location: String,
    pub accessed_at: chrono::DateTime<chrono::Utc>,
}

/// Trait for reading domain records.
#[async_trait]
pub trait DomainSource: Send + Sync {
    /// Open the source and stream its records.
    async fn records(&self) -> Result<RecordStream<'_>>;

    /// Metadata about this source.
    fn source_info(&self) -> SourceInfo;
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// Fixed in-memory list of records.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub records: Vec<DomainRecord>,
}

impl MemorySource {
    pub fn new(records: Vec<DomainRecord>) -> Self {
        Self { records }
    }

    /// Records for plain domain strings, all with the same label.
    pub fn from_domains<I, S>(domains: I, label: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = domains
            .into_iter()
            .map(|d| DomainRecord {
                domain: d.into(),
                label: label.map(str::to_string),
                metadata: SourceMetadata::default(),
                compressed_html: None,
            })
            .collect();
        Self { records }
    }
}

#[async_trait]
impl DomainSource for MemorySource {
    async fn records(&self) -> Result<RecordStream<'_>> {
        Ok(stream::iter(self.records.iter().cloned().map(Ok)).boxed())
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            source_type: "memory".to_string(),
            location: format!("{} records", self.records.len()),
            accessed_at: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TextFileSource
// ---------------------------------------------------------------------------

/// Domains from local text files, one per line.
///
/// Each path is either a file or a directory; directories contribute every
/// `*.txt` file they contain, in file-name order.
#[derive(Debug, Clone)]
pub struct TextFileSource {
    pub paths: Vec<PathBuf>,
    pub label: Option<String>,
}

impl TextFileSource {
    pub fn new(paths: Vec<PathBuf>, label: Option<String>) -> Self {
        Self { paths, label }
    }

    /// Expand directories into their `*.txt` files.
    pub async fn resolve_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in &self.paths {
            let meta = tokio::fs::metadata(path).await.map_err(|e| {
                std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
            })?;
            if meta.is_dir() {
                let mut entries = tokio::fs::read_dir(path).await?;
                let mut txt = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    let p = entry.path();
                    if p.extension().is_some_and(|e| e == "txt") && entry.file_type().await?.is_file() {
                        txt.push(p);
                    }
                }
                txt.sort();
                debug!(dir = %path.display(), files = txt.len(), "Expanded input directory");
                files.extend(txt);
            } else {
                files.push(path.clone());
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl DomainSource for TextFileSource {
    async fn records(&self) -> Result<RecordStream<'_>> {
        let files = self.resolve_files().await?;
        let label = self.label.clone();

        let stream = stream::iter(files)
            .then(|path| async move {
                let content = tokio::fs::read_to_string(&path).await?;
                let domains: Vec<String> =
                    parse_domain_lines(&content).map(str::to_string).collect();
                debug!(file = %path.display(), domains = domains.len(), "Read domain file");
                Ok::<_, DomfeatError>(stream::iter(
                    domains.into_iter().map(Ok::<_, DomfeatError>),
                ))
            })
            .try_flatten()
            .map_ok(move |domain| DomainRecord {
                domain,
                label: label.clone(),
                metadata: SourceMetadata::default(),
                compressed_html: None,
            })
            .boxed();
        Ok(stream)
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            source_type: "text".to_string(),
            location: self
                .paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(","),
            accessed_at: chrono::Utc::now(),
        }
    }
}

/// Non-empty, non-comment lines, trimmed.
pub fn parse_domain_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Read one domain list file.
pub async fn read_domain_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    Ok(parse_domain_lines(&content).map(str::to_string).collect())
}

// ---------------------------------------------------------------------------
// MongoSource
// ---------------------------------------------------------------------------

/// Domain records from a MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoSource {
    pub config: MongoConfig,
    pub collection: String,
    pub filter: Option<Document>,
    pub limit: Option<i64>,
    /// Overrides the label stored in the documents.
    pub label: Option<String>,
}

impl MongoSource {
    pub fn new(config: MongoConfig, collection: impl Into<String>) -> Self {
        Self {
            config,
            collection: collection.into(),
            filter: None,
            limit: None,
            label: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<Document>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }
}

#[async_trait]
impl DomainSource for MongoSource {
    async fn records(&self) -> Result<RecordStream<'_>> {
        let client = crate::mongo::connect(&self.config).await?;
        let collection = crate::mongo::collection(&client, &self.config, &self.collection);
        let mut find = collection.find(self.filter.clone().unwrap_or_default());
        if let Some(limit) = self.limit {
            find = find.limit(limit);
        }
        // The cursor owns a client handle; dropping the stream releases it.
        let cursor = find.await?;

        let stream = cursor
            .map_err(DomfeatError::from)
            .try_filter_map(move |doc| {
                futures::future::ready(Ok(document_to_record(
                    &doc,
                    &self.config,
                    &self.collection,
                    self.label.as_deref(),
                )))
            })
            .boxed();
        Ok(stream)
    }

    fn source_info(&self) -> SourceInfo {
        SourceInfo {
            source_type: "mongodb".to_string(),
            location: format!("{}.{}", self.config.database, self.collection),
            accessed_at: chrono::Utc::now(),
        }
    }
}

/// Convert a document into a record; `None` when it has no string domain.
///
/// Label precedence: `label_override`, then the document's label field.
pub fn document_to_record(
    doc: &Document,
    config: &MongoConfig,
    collection: &str,
    label_override: Option<&str>,
) -> Option<DomainRecord> {
    let Ok(domain) = doc.get_str(&config.domain_field) else {
        warn!(
            collection,
            id = ?doc.get("_id"),
            field = %config.domain_field,
            "Skipping document without a domain name"
        );
        return None;
    };

    let label = label_override
        .map(str::to_string)
        .or_else(|| doc.get_str(&config.label_field).ok().map(str::to_string));
    let timestamp = doc
        .get_datetime("timestamp")
        .ok()
        .and_then(|dt| chrono::DateTime::from_timestamp_millis(dt.timestamp_millis()));

    Some(DomainRecord {
        domain: domain.to_string(),
        label,
        metadata: SourceMetadata {
            collection: Some(collection.to_string()),
            timestamp,
        },
        compressed_html: binary_at(doc, &config.html_field).map(<[u8]>::to_vec),
    })
}

/// Bytes at a dotted field path (`html.compressed_html`); empty payloads count as absent.
fn binary_at<'a>(doc: &'a Document, path: &str) -> Option<&'a [u8]> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };
    let mut current = doc;
    for key in parents.into_iter().flat_map(|p| p.split('.')) {
        current = current.get_document(key).ok()?;
    }
    match current.get(leaf)? {
        Bson::Binary(binary) if !binary.bytes.is_empty() => Some(binary.bytes.as_slice()),
        _ => None,
    }
}
