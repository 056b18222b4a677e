//! Bulk domain download: write the domain names of a source to a text file.
//!
//! The output is sorted, de-duplicated and written atomically. Set modes
//! combine the source's domains with those already in the output file.

use crate::error::{DomfeatError, Result};
use crate::persistence::{atomic_write_with, hash_file};
use crate::source::{DomainSource, parse_domain_lines};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// How source domains (M) combine with the existing file's domains (F).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    /// M
    #[default]
    Replace,
    /// F ∪ M
    Union,
    /// F ∩ M
    Intersect,
    /// F \ M
    FileOnly,
    /// M \ F
    DbOnly,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Union => "union",
            Self::Intersect => "intersect",
            Self::FileOnly => "file-only",
            Self::DbOnly => "db-only",
        }
    }

    /// Whether the existing file takes part.
    pub fn reads_existing(&self) -> bool {
        !matches!(self, Self::Replace)
    }

    pub fn combine(
        &self,
        existing: &BTreeSet<String>,
        fetched: BTreeSet<String>,
    ) -> BTreeSet<String> {
        match self {
            Self::Replace => fetched,
            Self::Union => existing.union(&fetched).cloned().collect(),
            Self::Intersect => existing.intersection(&fetched).cloned().collect(),
            Self::FileOnly => existing.difference(&fetched).cloned().collect(),
            Self::DbOnly => fetched.difference(existing).cloned().collect(),
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportMode {
    type Err = DomfeatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "replace" => Ok(Self::Replace),
            "union" => Ok(Self::Union),
            "intersect" => Ok(Self::Intersect),
            "file-only" => Ok(Self::FileOnly),
            "db-only" => Ok(Self::DbOnly),
            other => Err(DomfeatError::config(format!(
                "unknown download mode '{other}' (expected replace, union, intersect, file-only or db-only)"
            ))),
        }
    }
}

/// Result of one export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub mode: ExportMode,
    pub fetched: usize,
    pub existing: usize,
    pub written: usize,
    pub sha256: String,
}

/// Domains already present in `path`; empty when the file does not exist.
pub async fn read_existing(path: &Path) -> Result<BTreeSet<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(parse_domain_lines(&content).map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())).into()),
    }
}

/// Atomically write one domain per line.
pub fn write_domain_list<'a>(
    path: &Path,
    domains: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    atomic_write_with(path, |out| {
        for domain in domains {
            writeln!(out, "{domain}")?;
        }
        Ok(())
    })
}

/// Export the domain names of `source` into `output`.
pub async fn export_domains(
    source: &dyn DomainSource,
    output: &Path,
    mode: ExportMode,
) -> Result<ExportSummary> {
    let info = source.source_info();
    let fetched: BTreeSet<String> = source
        .records()
        .await?
        .map_ok(|record| record.domain.trim().to_string())
        .try_filter(|domain| futures::future::ready(!domain.is_empty()))
        .try_collect()
        .await?;

    let existing = if mode.reads_existing() {
        read_existing(output).await?
    } else {
        BTreeSet::new()
    };
    let fetched_count = fetched.len();
    let domains = mode.combine(&existing, fetched);

    write_domain_list(output, &domains)?;
    let summary = ExportSummary {
        path: output.to_path_buf(),
        mode,
        fetched: fetched_count,
        existing: existing.len(),
        written: domains.len(),
        sha256: hash_file(output)?,
    };
    info!(
        source = %info.location,
        path = %output.display(),
        mode = %mode,
        fetched = summary.fetched,
        existing = summary.existing,
        written = summary.written,
        "Exported domain list"
    );
    Ok(summary)
}
