//! CLI entry point for the horizontalizer.
//!
//! Provides subcommands for converting a directory of long-format readings
//! into ten-minute wide tables and for inspecting a translation document.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use horizontalizer::aggregate::AggregationKind;
use horizontalizer::pipeline::DEFAULT_SUFFIX;
use horizontalizer::reader::DEFAULT_CHUNK_SIZE;
use horizontalizer::stats::RunReport;
use horizontalizer::{CancelToken, FailurePolicy, Pipeline, PipelineConfig, TranslationTable};
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "horizontalizer")]
#[command(about = "Turn long-format sensor readings into ten-minute wide tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate every matching file of an input directory
    Process {
        /// Directory containing the raw gzip CSV files
        #[arg(short, long, env = "HORIZONTALIZER_INPUT_DIR", default_value = "raw")]
        input_dir: PathBuf,

        /// Directory to write the wide tables to (same file names)
        #[arg(short, long, env = "HORIZONTALIZER_OUTPUT_DIR", default_value = "processed")]
        output_dir: PathBuf,

        /// Translation document mapping raw codes to variable names
        #[arg(
            short,
            long,
            env = "HORIZONTALIZER_TRANSLATIONS",
            default_value = "translations.xml.gz"
        )]
        translations: PathBuf,

        /// Rows read per batch
        #[arg(short, long, env = "HORIZONTALIZER_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Worker threads folding batches (0 = one per core)
        #[arg(short = 'j', long, env = "HORIZONTALIZER_THREADS", default_value_t = 0)]
        threads: usize,

        /// Whether a failed file stops the run or is skipped
        #[arg(long, env = "HORIZONTALIZER_ON_ERROR", value_enum, default_value_t = FailurePolicy::Stop)]
        on_error: FailurePolicy,

        /// Aggregation applied to every cell
        #[arg(
            short,
            long,
            env = "HORIZONTALIZER_AGGREGATION",
            value_enum,
            default_value_t = AggregationKind::Mean
        )]
        aggregation: AggregationKind,

        /// File name suffix selecting input files
        #[arg(long, env = "HORIZONTALIZER_SUFFIX", default_value = DEFAULT_SUFFIX)]
        suffix: String,

        /// Optional: write a JSON run report to this file
        #[arg(long, env = "HORIZONTALIZER_REPORT")]
        report: Option<PathBuf>,
    },
    /// Load a translation document and list its assets
    Translations {
        /// Path to the translation document (.xml or .xml.gz)
        #[arg(value_name = "FILE", default_value = "translations.xml.gz")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input_dir,
            output_dir,
            translations,
            chunk_size,
            threads,
            on_error,
            aggregation,
            suffix,
            report,
        } => {
            let config = PipelineConfig {
                chunk_size,
                threads,
                on_error,
                aggregation,
                suffix,
                ..PipelineConfig::new(input_dir, output_dir)
            };

            let run = process(config, &translations).await?;

            if let Some(path) = report {
                write_report(&path, &run)?;
            }

            if !run.is_success() {
                bail!(
                    "{} file(s) failed, {} skipped{}",
                    run.failed.len(),
                    run.skipped.len(),
                    if run.cancelled { " (cancelled)" } else { "" }
                );
            }
        }
        Commands::Translations { path } => {
            list_translations(&path)?;
        }
    }

    Ok(())
}

/// Where the JSON log is written, from `LOG_FILE_PATH`.
#[derive(Debug, PartialEq)]
struct LogFile {
    dir: PathBuf,
    prefix: OsString,
}

impl LogFile {
    const DEFAULT_PATH: &'static str = "logs/horizontalizer.log";

    fn from_env() -> Self {
        let path = std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| Self::DEFAULT_PATH.into());
        Self::from_path(Path::new(&path))
    }

    fn from_path(path: &Path) -> Self {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = path
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| OsString::from("horizontalizer.log"));

        Self { dir, prefix }
    }
}

/// `var` directives on top of a minimum level.
fn level_filter(var: &str, floor: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::from_env(var).add_directive(floor.parse()?))
}

/// Human-readable events on stderr, JSON events in a daily rolling file.
fn init_logging() -> Result<WorkerGuard> {
    let log_file = LogFile::from_env();
    let appender = tracing_appender::rolling::daily(&log_file.dir, &log_file.prefix);
    let (json_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(level_filter("RUST_LOG", "info")?),
        )
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(json_writer)
                .with_filter(level_filter("RUST_LOG_JSON", "debug")?),
        )
        .init();

    Ok(guard)
}

/// Loads the translation table once, then runs the pipeline on a blocking
/// thread. Ctrl+C requests cancellation at the next batch boundary.
#[tracing::instrument(skip_all, fields(input_dir = %config.input_dir.display()))]
async fn process(config: PipelineConfig, translations: &Path) -> Result<RunReport> {
    let table = TranslationTable::load(translations).with_context(|| {
        format!(
            "failed to load translation table from {}",
            translations.display()
        )
    })?;
    info!(
        assets = table.asset_count(),
        pairs = table.pair_count(),
        "Translation table ready"
    );

    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next batch boundary");
            watcher.cancel();
        }
    });

    let report = tokio::task::spawn_blocking(move || -> Result<RunReport> {
        let pipeline = Pipeline::new(config, &table, cancel)?;
        Ok(pipeline.run()?)
    })
    .await??;

    Ok(report)
}

/// Writes the run report as pretty-printed JSON.
fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create report file {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    info!(path = %path.display(), "Run report written");
    Ok(())
}

/// Logs one line per asset and a summary of the translation document.
fn list_translations(path: &Path) -> Result<()> {
    let table = TranslationTable::load(path)
        .with_context(|| format!("failed to load translation table from {}", path.display()))?;

    let mut assets: Vec<_> = table.iter().collect();
    assets.sort_by_key(|(asset, _)| *asset);

    for (asset, codes) in &assets {
        info!(asset = %asset, pairs = codes.len(), "Asset");
    }

    let variables: BTreeSet<&str> = assets
        .iter()
        .flat_map(|(_, codes)| codes.values().map(String::as_str))
        .collect();

    info!(
        assets = table.asset_count(),
        pairs = table.pair_count(),
        variables = variables.len(),
        "Translation table summary"
    );

    Ok(())
}
