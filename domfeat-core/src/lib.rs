//! # domfeat Core
//!
//! Core library for domfeat, a toolkit that turns domain names into lexical
//! feature vectors. Provides domain sources (MongoDB, text files, memory),
//! the transformer chain and registry, n-gram tables, feature sinks,
//! liveness probing, domain-list export, collection sampling, Parquet merging
//! and configuration.

pub mod config;
pub mod error;
pub mod export;
pub mod liveness;
pub mod merge;
pub mod mongo;
pub mod ngram;
pub mod persistence;
pub mod pipeline;
pub mod record;
pub mod select;
pub mod sink;
pub mod source;
pub mod transform;

// Re-export commonly used types at the crate root.
pub use config::{DomfeatConfig, LivenessConfig, MongoConfig, load_config};
pub use error::{DomfeatError, Result};
pub use export::{ExportMode, ExportSummary, export_domains};
pub use liveness::{LivenessChecker, CheckMethod, CheckResult};
pub use merge::{MergeOptions, MergeSummary, merge_parquet_files};
pub use ngram::NgramTable;
pub use pipeline::run_pipeline;
pub use record::{DomainRecord, FeatureRecord, FeatureValue, SourceMetadata};
pub use select::{SelectRequest, SelectionReport, select_into_collection};
pub use sink::{FeatureSink, FeatureTable, OutputFormat, SinkOptions, WriteSummary};
pub use source::{DomainSource, MemorySource, MongoSource, SourceInfo, TextFileSource};
pub use transform::{
    DEFAULT_CHAIN, Dictionary, TransformContext, Transformer, TransformerChain,
    TransformerRegistry,
};
