//! Domain and feature records flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column holding the domain name in every output file.
pub const DOMAIN_COLUMN: &str = "domain_name";
/// Column holding the label in every output file (always last).
pub const LABEL_COLUMN: &str = "label";

/// Where a domain record came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A raw domain name with its optional label, as read from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub metadata: SourceMetadata,
    /// Gzip-compressed page the domain served, when the source stores one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_html: Option<Vec<u8>>,
}

impl DomainRecord {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            label: None,
            metadata: SourceMetadata::default(),
            compressed_html: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_compressed_html(mut self, compressed_html: impl Into<Vec<u8>>) -> Self {
        self.compressed_html = Some(compressed_html.into());
        self
    }
}

/// A single scalar feature value.
///
/// `Null` is the sentinel used to keep output files rectangular when a record
/// lacks a feature that other records carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Replace NaN and infinities with `0.0`.
    pub fn finite_or_zero(self) -> Self {
        match self {
            Self::Float(f) if !f.is_finite() => Self::Float(0.0),
            other => other,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
            Self::Null => Ok(()),
        }
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for FeatureValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<FeatureValue>> From<Option<T>> for FeatureValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Feature values computed for one domain, in insertion order.
///
/// Keys are write-once: a second insert of the same key is rejected and the
/// first value kept.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub domain: String,
    pub label: Option<String>,
    features: Vec<(String, FeatureValue)>,
}

impl FeatureRecord {
    /// Empty feature record carrying over the domain and label.
    pub fn for_domain(record: &DomainRecord) -> Self {
        Self {
            domain: record.domain.clone(),
            label: record.label.clone(),
            features: Vec::new(),
        }
    }

    /// Insert a feature. Returns `false` (and keeps the old value) when the
    /// key is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FeatureValue>) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.features.push((key, value.into()));
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.features.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.features.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
