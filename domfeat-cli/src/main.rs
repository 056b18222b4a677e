//! domfeat CLI: pull domains, extract lexical features, check liveness.
//!
//! Each subcommand is a linear fetch -> transform -> write run over
//! `domfeat-core`.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// domfeat: lexical feature extraction for domain names
#[derive(Parser, Debug)]
#[command(name = "domfeat", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.domfeat/config.toml`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract features from MongoDB collections
    Load {
        /// Collection to read; every configured collection when omitted
        #[arg(long)]
        collection: Option<String>,

        /// Label for every record (overrides the stored label)
        #[arg(short, long)]
        label: Option<String>,

        /// Comma-separated transformer names (default: lexical)
        #[arg(short, long)]
        transformers: Option<String>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: parquet, csv, json, jsonl (default: from extension)
        #[arg(short, long)]
        format: Option<String>,

        /// Maximum documents per collection
        #[arg(long)]
        limit: Option<i64>,

        /// Query filter as a JSON object
        #[arg(long)]
        filter: Option<String>,

        /// N-gram table enabling the `ngram` transformer
        #[arg(long)]
        ngram_table: Option<PathBuf>,
    },

    /// Extract features from local domain lists
    Lexical {
        /// Files or directories of `*.txt` files, one domain per line
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Label for every record
        #[arg(short, long)]
        label: Option<String>,

        /// Comma-separated transformer names (default: lexical)
        #[arg(short, long)]
        transformers: Option<String>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: parquet, csv, json, jsonl (default: from extension)
        #[arg(short, long)]
        format: Option<String>,

        /// N-gram table enabling the `ngram` transformer
        #[arg(long)]
        ngram_table: Option<PathBuf>,
    },

    /// Count character n-grams over a dataset
    Ngram {
        /// Dataset name from the `[datasets]` configuration
        #[arg(short, long, conflicts_with = "input", required_unless_present = "input")]
        dataset: Option<String>,

        /// Files or directories of domain lists
        #[arg(short, long, num_args = 1..)]
        input: Vec<PathBuf>,

        /// N-gram size (default from configuration)
        #[arg(short, long)]
        n: Option<usize>,

        /// Count the top-level label too
        #[arg(long)]
        keep_tld: bool,

        /// Output table (`.json`, or `.csv` for a flat listing)
        #[arg(short, long)]
        output: PathBuf,

        /// Print the most frequent n-grams
        #[arg(long)]
        top: Option<usize>,
    },

    /// Write the domain names of a collection to a text file
    Download {
        /// Collection to read
        #[arg(long)]
        collection: String,

        /// Output text file
        #[arg(short, long)]
        output: PathBuf,

        /// replace, union, intersect, file-only or db-only
        #[arg(short, long, default_value = "replace")]
        mode: String,

        /// Query filter as a JSON object
        #[arg(long)]
        filter: Option<String>,
    },

    /// Print the domains that are reachable
    Livecheck {
        /// Domain list; stdin when omitted
        file: Option<PathBuf>,

        /// Check timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Checks in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// tcp or icmp
        #[arg(long)]
        method: Option<String>,
    },

    /// Copy n random documents from one collection into another
    Select {
        /// Source collection
        source: String,

        /// Target collection
        target: String,

        /// Number of documents to select
        n: usize,

        /// Collection whose domains must not be selected
        #[arg(long)]
        exclude: Option<String>,

        /// Only select reachable domains
        #[arg(long)]
        livecheck: bool,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,

        /// Check timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Concatenate Parquet feature files with the same columns
    Merge {
        /// Input files (space or comma separated)
        #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
        input: Vec<PathBuf>,

        /// Output Parquet file
        #[arg(short, long)]
        output: PathBuf,

        /// Shuffle the merged rows
        #[arg(long)]
        shuffle: bool,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List the available transformers
    Transformers,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default `.domfeat/config.toml` in the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "domfeat", "domfeat")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "domfeat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
