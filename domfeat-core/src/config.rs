//! Configuration system for domfeat.
//!
//! Uses `figment` for layered configuration:
//! defaults -> user config -> workspace config -> explicit file -> environment.
//! Configuration is loaded from `~/.config/domfeat/config.toml` and/or
//! `.domfeat/config.toml` in the workspace directory.

use crate::error::{DomfeatError, Result};
use crate::liveness::CheckMethod;
use crate::sink::OutputFormat;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable carrying the MongoDB connection string.
pub const MONGO_URI_ENV: &str = "DR_MONGO_URI";
/// Environment variable carrying the MongoDB database name.
pub const MONGO_DB_ENV: &str = "DR_DB_NAME";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomfeatConfig {
    #[serde(default)]
    pub mongo: MongoConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub ngram: NgramConfig,
    #[serde(default)]
    pub dictionary: DictionaryConfig,
    /// Collections processed by the loader when none is given: label -> collection.
    #[serde(default)]
    pub collections: BTreeMap<String, String>,
    /// Named domain datasets for n-gram counting.
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,
}

/// MongoDB connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string. Absent means any database command fails with a
    /// configuration error.
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    /// Document field holding the domain name.
    #[serde(default = "default_domain_field")]
    pub domain_field: String,
    /// Document field holding the label.
    #[serde(default = "default_label_field")]
    pub label_field: String,
    /// Dotted path to the gzip-compressed page bytes, read for `html` features.
    #[serde(default = "default_html_field")]
    pub html_field: String,
    #[serde(default = "default_server_selection_timeout_ms")]
    pub server_selection_timeout_ms: u64,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: None,
            database: default_database(),
            domain_field: default_domain_field(),
            label_field: default_label_field(),
            html_field: default_html_field(),
            server_selection_timeout_ms: default_server_selection_timeout_ms(),
        }
    }
}

fn default_database() -> String {
    "drdb".to_string()
}

fn default_domain_field() -> String {
    "domain_name".to_string()
}

fn default_label_field() -> String {
    "label".to_string()
}

fn default_html_field() -> String {
    "html.compressed_html".to_string()
}

fn default_server_selection_timeout_ms() -> u64 {
    5_000
}

/// Feature file output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,
    /// Used when neither `--format` nor the file extension decide.
    #[serde(default)]
    pub default_format: Option<OutputFormat>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: default_csv_delimiter(),
            default_format: None,
        }
    }
}

fn default_csv_delimiter() -> char {
    ','
}

/// Liveness check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Per-check timeout covering name resolution and connect.
    #[serde(default = "default_check_timeout_ms")]
    pub timeout_ms: u64,
    /// Checks in flight at once.
    #[serde(default = "default_check_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub method: CheckMethod,
    /// Ports tried in order by the TCP check.
    #[serde(default = "default_check_ports")]
    pub ports: Vec<u16>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_check_timeout_ms(),
            concurrency: default_check_concurrency(),
            method: CheckMethod::default(),
            ports: default_check_ports(),
        }
    }
}

fn default_check_timeout_ms() -> u64 {
    1_000
}

fn default_check_concurrency() -> usize {
    32
}

fn default_check_ports() -> Vec<u16> {
    vec![443, 80]
}

/// N-gram counting and scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgramConfig {
    #[serde(default = "default_ngram_n")]
    pub n: usize,
    /// Drop the top-level label before counting.
    #[serde(default = "default_true")]
    pub strip_tld: bool,
    /// Precomputed table loaded for the `ngram` transformer.
    #[serde(default)]
    pub table: Option<PathBuf>,
}

impl Default for NgramConfig {
    fn default() -> Self {
        Self {
            n: default_ngram_n(),
            strip_tld: true,
            table: None,
        }
    }
}

fn default_ngram_n() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// Dictionary used by the `dictionary` transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryConfig {
    /// Word list, one word per line. The built-in list is used when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_min_word_length")]
    pub min_word_length: usize,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            path: None,
            min_word_length: default_min_word_length(),
        }
    }
}

fn default_min_word_length() -> usize {
    3
}

/// A named dataset: text files with one domain per line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. `DOMFEAT_`-prefixed environment (`DOMFEAT_MONGO__URI`, ...)
/// 2. Legacy environment (`DR_MONGO_URI`, `DR_DB_NAME`)
/// 3. Explicit config file
/// 4. Workspace-local config (`.domfeat/config.toml`)
/// 5. User config (`~/.config/domfeat/config.toml`)
/// 6. Built-in defaults
pub fn load_config(workspace: Option<&Path>, explicit: Option<&Path>) -> Result<DomfeatConfig> {
    let mut figment = Figment::from(Serialized::defaults(DomfeatConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "domfeat", "domfeat") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".domfeat").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(DomfeatError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(legacy_env());
    figment = figment.merge(Env::prefixed("DOMFEAT_").split("__"));

    let config: DomfeatConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// `DR_MONGO_URI` / `DR_DB_NAME` mapped onto the `mongo` section.
fn legacy_env() -> Env {
    Env::raw()
        .only(&[MONGO_URI_ENV, MONGO_DB_ENV])
        .map(|key| {
            if key.as_str().eq_ignore_ascii_case(MONGO_URI_ENV) {
                "mongo.uri".into()
            } else if key.as_str().eq_ignore_ascii_case(MONGO_DB_ENV) {
                "mongo.database".into()
            } else {
                key.into()
            }
        })
}

impl DomfeatConfig {
    /// Reject values no command can run with.
    pub fn validate(&self) -> Result<()> {
        if self.ngram.n == 0 {
            return Err(DomfeatError::config("ngram.n must be at least 1"));
        }
        if self.liveness.concurrency == 0 {
            return Err(DomfeatError::config("liveness.concurrency must be at least 1"));
        }
        if self.liveness.timeout_ms == 0 {
            return Err(DomfeatError::config("liveness.timeout_ms must be at least 1"));
        }
        if !self.output.csv_delimiter.is_ascii() {
            return Err(DomfeatError::config(format!(
                "output.csv_delimiter must be a single ASCII character, got '{}'",
                self.output.csv_delimiter
            )));
        }
        Ok(())
    }

    /// Paths of a configured dataset.
    pub fn dataset_paths(&self, name: &str) -> Result<&[PathBuf]> {
        self.datasets
            .get(name)
            .map(|d| d.paths.as_slice())
            .ok_or_else(|| {
                let known: Vec<&str> = self.datasets.keys().map(String::as_str).collect();
                DomfeatError::config(format!(
                    "unknown dataset '{name}' (configured: {})",
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                ))
            })
    }
}
