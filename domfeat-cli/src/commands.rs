//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::{Context, bail};
use domfeat_core::config::{DomfeatConfig, load_config};
use domfeat_core::ngram::{self, NgramTable};
use domfeat_core::source::{parse_domain_lines, read_domain_file};
use domfeat_core::transform::{Dictionary, TransformContext, TransformerRegistry};
use domfeat_core::{
    CheckMethod, ExportMode, FeatureSink, LivenessChecker, MergeOptions, MongoSource,
    OutputFormat, SelectRequest, SinkOptions, TextFileSource, WriteSummary, export_domains,
    merge_parquet_files, mongo, run_pipeline, select_into_collection,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

const DEFAULT_LABEL: &str = "unknown";

/// Handle a CLI subcommand with the layered configuration of `workspace`.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(Some(workspace), config_path)?;
    run_command(command, workspace, config).await
}

/// Handle a CLI subcommand with an already resolved configuration.
pub async fn run_command(
    command: Commands,
    workspace: &Path,
    config: DomfeatConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Load {
            collection,
            label,
            transformers,
            output,
            format,
            limit,
            filter,
            ngram_table,
        } => {
            let format = resolve_format(format.as_deref(), &output, &config)?;
            let context = build_context(&config, ngram_table.as_deref())?;
            let chain = TransformerRegistry::builtin().build_chain(transformers.as_deref(), context)?;
            let filter = filter.as_deref().map(mongo::parse_filter).transpose()?;

            let targets: Vec<(Option<String>, String)> = match collection {
                Some(collection) => vec![(label, collection)],
                None if config.collections.is_empty() => {
                    bail!("no --collection given and no [collections] configured")
                }
                None => config
                    .collections
                    .iter()
                    .map(|(l, c)| (Some(label.clone().unwrap_or_else(|| l.clone())), c.clone()))
                    .collect(),
            };

            let mut records = Vec::new();
            for (label, collection) in targets {
                let source = MongoSource::new(config.mongo.clone(), collection.as_str())
                    .with_filter(filter.clone())
                    .with_limit(limit)
                    .with_label(label);
                let part = run_pipeline(&source, &chain)
                    .await
                    .with_context(|| format!("failed to load collection '{collection}'"))?;
                info!(collection = %collection, records = part.len(), "Collection processed");
                records.extend(part);
            }

            let summary = sink(format, &config)
                .write(&records, &output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            print_write_summary(&summary);
            Ok(())
        }

        Commands::Lexical {
            input,
            label,
            transformers,
            output,
            format,
            ngram_table,
        } => {
            let format = resolve_format(format.as_deref(), &output, &config)?;
            let context = build_context(&config, ngram_table.as_deref())?;
            let chain = TransformerRegistry::builtin().build_chain(transformers.as_deref(), context)?;

            let label = label.unwrap_or_else(|| {
                warn!("The label was not specified. Defaulting to '{DEFAULT_LABEL}'.");
                DEFAULT_LABEL.to_string()
            });
            let source = TextFileSource::new(input, Some(label));
            let records = run_pipeline(&source, &chain).await?;
            if records.is_empty() {
                bail!("no domains found in the input");
            }

            let summary = sink(format, &config)
                .write(&records, &output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            print_write_summary(&summary);
            Ok(())
        }

        Commands::Ngram {
            dataset,
            input,
            n,
            keep_tld,
            output,
            top,
        } => {
            let paths = match dataset {
                Some(name) => config.dataset_paths(&name)?.to_vec(),
                None if input.is_empty() => bail!("pass --dataset or --input"),
                None => input,
            };
            let n = n.unwrap_or(config.ngram.n);
            let strip_tld = config.ngram.strip_tld && !keep_tld;

            let table = ngram::count_files(&paths, n, strip_tld).await?;
            table
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;

            if let Some(k) = top {
                for (gram, count) in table.top(k) {
                    println!("{gram}\t{count}\t{:.6}", table.frequency(gram));
                }
            }
            println!(
                "Counted {} n-grams ({} distinct, n={n}) into {}",
                table.total(),
                table.len(),
                output.display()
            );
            Ok(())
        }

        Commands::Download {
            collection,
            output,
            mode,
            filter,
        } => {
            let mode: ExportMode = mode.parse()?;
            let filter = filter.as_deref().map(mongo::parse_filter).transpose()?;
            let source = MongoSource::new(config.mongo.clone(), collection.as_str()).with_filter(filter);

            let summary = export_domains(&source, &output, mode)
                .await
                .with_context(|| format!("failed to download collection '{collection}'"))?;
            println!(
                "Wrote {} domains to {} (mode {}, {} fetched, {} already present)",
                summary.written,
                summary.path.display(),
                summary.mode,
                summary.fetched,
                summary.existing
            );
            Ok(())
        }

        Commands::Livecheck {
            file,
            timeout_ms,
            concurrency,
            method,
        } => {
            let domains: Vec<String> = match &file {
                Some(path) => read_domain_file(path).await?,
                None => {
                    let mut content = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut content)
                        .await
                        .context("failed to read domains from stdin")?;
                    parse_domain_lines(&content).map(str::to_string).collect()
                }
            };

            let mut checker = LivenessChecker::new(&config.liveness);
            if let Some(ms) = timeout_ms {
                checker = checker.with_timeout(Duration::from_millis(ms.max(1)));
            }
            if let Some(concurrency) = concurrency {
                checker = checker.with_concurrency(concurrency);
            }
            if let Some(method) = method {
                checker = checker.with_method(method.parse::<CheckMethod>()?);
            }

            let live = checker.filter_live(&domains).await;
            for domain in &live {
                println!("{domain}");
            }
            info!(checked = domains.len(), live = live.len(), "Liveness check complete");
            Ok(())
        }

        Commands::Select {
            source,
            target,
            n,
            exclude,
            livecheck,
            seed,
            timeout_ms,
        } => {
            let checker = livecheck.then(|| {
                let checker = LivenessChecker::new(&config.liveness);
                match timeout_ms {
                    Some(ms) => checker.with_timeout(Duration::from_millis(ms.max(1))),
                    None => checker,
                }
            });
            let request = SelectRequest {
                source,
                target,
                n,
                exclude,
                seed,
            };
            let report = select_into_collection(&config.mongo, &request, checker.as_ref())
                .await
                .with_context(|| format!("failed to select from '{}'", request.source))?;

            println!("Selected domains: {}", report.selected);
            println!("Excluded domains: {}", report.excluded);
            println!("Non-live domains: {}", report.non_live);
            Ok(())
        }

        Commands::Merge {
            input,
            output,
            shuffle,
            seed,
        } => {
            let summary = merge_parquet_files(&input, &output, &MergeOptions { shuffle, seed })?;
            println!(
                "Merged {} files ({} rows, {} columns) into {}",
                summary.inputs,
                summary.rows,
                summary.columns,
                summary.path.display()
            );
            Ok(())
        }

        Commands::Transformers => {
            let registry = TransformerRegistry::builtin();
            for transformer in registry.iter() {
                let marker = if transformer.requires_ngram_table() {
                    " (needs n-gram table)"
                } else if !transformer.in_default_chain() {
                    " (select by name)"
                } else {
                    ""
                };
                println!("{:<14} {}{marker}", transformer.name(), transformer.description());
                println!("{:<14} keys: {}", "", transformer.feature_keys().join(", "));
            }
            Ok(())
        }

        Commands::Config { action } => handle_config(action, workspace, config),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    mut config: DomfeatConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".domfeat");
            std::fs::create_dir_all(&config_dir)?;

            let path = config_dir.join("config.toml");
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&DomfeatConfig::default())?;
            std::fs::write(&path, &toml_str)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            if config.mongo.uri.is_some() {
                config.mongo.uri = Some("<set>".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Explicit `--format`, then the output extension, then the configured default.
fn resolve_format(
    explicit: Option<&str>,
    output: &Path,
    config: &DomfeatConfig,
) -> anyhow::Result<OutputFormat> {
    let explicit = explicit.map(str::parse::<OutputFormat>).transpose()?;
    Ok(OutputFormat::resolve(explicit, output, config.output.default_format)?)
}

fn sink(format: OutputFormat, config: &DomfeatConfig) -> FeatureSink {
    FeatureSink::new(
        format,
        SinkOptions {
            csv_delimiter: config.output.csv_delimiter as u8,
        },
    )
}

/// Dictionary and optional n-gram table shared by every transformer.
fn build_context(
    config: &DomfeatConfig,
    ngram_table: Option<&Path>,
) -> anyhow::Result<Arc<TransformContext>> {
    let min_len = config.dictionary.min_word_length;
    let dictionary = match &config.dictionary.path {
        Some(path) => Dictionary::from_file(path, min_len)
            .with_context(|| format!("failed to load dictionary {}", path.display()))?,
        None => Dictionary::builtin(min_len),
    };

    let mut context = TransformContext::new().with_dictionary(dictionary);
    if let Some(path) = ngram_table.or(config.ngram.table.as_deref()) {
        let table = NgramTable::load(path)
            .with_context(|| format!("failed to load n-gram table {}", path.display()))?;
        context = context.with_ngram_table(table);
    }
    Ok(Arc::new(context))
}

fn print_write_summary(summary: &WriteSummary) {
    println!(
        "Wrote {} rows x {} columns to {} ({}, sha256 {})",
        summary.rows,
        summary.columns,
        summary.path.display(),
        summary.format,
        summary.sha256
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_format_precedence() {
        let mut config = DomfeatConfig::default();
        assert_eq!(
            resolve_format(Some("json"), Path::new("out.csv"), &config).unwrap(),
            OutputFormat::Json
        );
        assert_eq!(
            resolve_format(None, Path::new("out.parquet"), &config).unwrap(),
            OutputFormat::Parquet
        );
        assert!(resolve_format(None, Path::new("out"), &config).is_err());
        assert!(resolve_format(Some("xlsx"), Path::new("out.csv"), &config).is_err());

        config.output.default_format = Some(OutputFormat::Jsonl);
        assert_eq!(
            resolve_format(None, Path::new("out"), &config).unwrap(),
            OutputFormat::Jsonl
        );
    }

    #[test]
    fn test_build_context_loads_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.json");
        NgramTable::count_domains(3, true, ["example.com"])
            .unwrap()
            .save(&path)
            .unwrap();

        let context = build_context(&DomfeatConfig::default(), Some(&path)).unwrap();
        assert_eq!(context.ngram_table().map(|t| t.n()), Some(3));

        let context = build_context(&DomfeatConfig::default(), None).unwrap();
        assert!(context.ngram_table().is_none());
        assert!(context.dictionary().contains("login"));
    }

    #[test]
    fn test_missing_table_names_the_file() {
        let err = build_context(&DomfeatConfig::default(), Some(Path::new("/nonexistent/t.json")))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/t.json"));
    }

    fn lexical(input: PathBuf, output: PathBuf) -> Commands {
        Commands::Lexical {
            input: vec![input],
            label: Some("dga".into()),
            transformers: Some("length,digit_ratio".into()),
            output,
            format: None,
            ngram_table: None,
        }
    }

    #[tokio::test]
    async fn test_lexical_command_writes_csv() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("domains.txt");
        std::fs::write(&input, "abc123.com\nxn--fsqu00a.com\n").unwrap();
        let output = dir.path().join("out.csv");

        run_command(lexical(input, output.clone()), dir.path(), DomfeatConfig::default())
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "domain_name,length,digit_ratio,label\n\
             abc123.com,10,0.3,dga\n\
             xn--fsqu00a.com,15,0.13333333333333333,dga\n"
        );
    }

    #[tokio::test]
    async fn test_lexical_command_uses_given_config() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("domains.txt");
        std::fs::write(&input, "abc123.com\n").unwrap();
        let output = dir.path().join("out.csv");

        let mut config = DomfeatConfig::default();
        config.output.csv_delimiter = ';';
        run_command(lexical(input, output.clone()), dir.path(), config)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "domain_name;length;digit_ratio;label\nabc123.com;10;0.3;dga\n"
        );
    }

    #[tokio::test]
    async fn test_lexical_empty_input_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("empty.txt");
        std::fs::write(&input, "# nothing\n").unwrap();
        let output = dir.path().join("out.csv");

        let result = run_command(
            Commands::Lexical {
                input: vec![input],
                label: None,
                transformers: None,
                output: output.clone(),
                format: None,
                ngram_table: None,
            },
            dir.path(),
            DomfeatConfig::default(),
        )
        .await;
        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_config_init_writes_loadable_file() {
        let dir = TempDir::new().unwrap();
        handle_config(ConfigAction::Init, dir.path(), DomfeatConfig::default()).unwrap();
        let path = dir.path().join(".domfeat").join("config.toml");
        assert!(path.exists());
        let written = std::fs::read_to_string(&path).unwrap();
        let config: DomfeatConfig = toml::from_str(&written).unwrap();
        assert_eq!(config.mongo.database, "drdb");

        // A second init leaves the file alone.
        std::fs::write(&path, "[mongo]\ndatabase = \"custom\"\n").unwrap();
        handle_config(ConfigAction::Init, dir.path(), DomfeatConfig::default()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("custom"));
    }
}
