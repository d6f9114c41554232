//! Directory-level driver: read, aggregate, pivot and write every input file.
//!
//! Files are processed one after another, each with its own accumulator
//! state. Within a file, batches are read sequentially and folded on a
//! `rayon` pool; partial results are merged as they complete.

use crate::aggregate::{
    Aggregated, Aggregation, AggregationKind, Max, Mean, Min, PartialAggregate, Variance,
};
use crate::error::{Error, Result};
use crate::output::{WideTable, write_wide_table};
use crate::reader::{Batch, ChunkedReader, DEFAULT_CHUNK_SIZE};
use crate::stats::{FileFailure, FileStats, RunReport, seconds};
use crate::translation::TranslationTable;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Input files are recognised by this name suffix unless configured otherwise.
pub const DEFAULT_SUFFIX: &str = ".csv.gz";

/// What to do with the remaining files once one file fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run after the first failed file.
    #[default]
    Stop,
    /// Log the failure and carry on with the next file.
    Continue,
}

/// Shared flag honoured at batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns [`Error::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,

    /// Rows per batch
    pub chunk_size: usize,

    /// Worker threads for batch folding; 0 means one per core
    pub threads: usize,
    pub on_error: FailurePolicy,
    pub aggregation: AggregationKind,

    /// File name suffix selecting input files
    pub suffix: String,
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: 0,
            on_error: FailurePolicy::default(),
            aggregation: AggregationKind::default(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

/// Runs the aggregation over every matching file of a directory.
pub struct Pipeline<'t> {
    config: PipelineConfig,
    table: &'t TranslationTable,
    cancel: CancelToken,
    pool: rayon::ThreadPool,
}

impl<'t> Pipeline<'t> {
    pub fn new(
        config: PipelineConfig,
        table: &'t TranslationTable,
        cancel: CancelToken,
    ) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::Row("chunk size must be at least one row".into()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("horizontalizer-{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        Ok(Self {
            config,
            table,
            cancel,
            pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Lists the input files, sorted by name.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut inputs = Vec::new();

        for entry in fs::read_dir(&self.config.input_dir)? {
            let entry = entry?;
            let path = entry.path();

            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(&self.config.suffix));

            if matches && path.is_file() {
                inputs.push(path);
            }
        }

        inputs.sort();
        Ok(inputs)
    }

    /// Processes every matching file and reports per-file outcomes.
    ///
    /// A failed file never leaves an output artifact behind. Whether later
    /// files are still attempted follows [`PipelineConfig::on_error`];
    /// cancellation always ends the run.
    ///
    /// # Errors
    ///
    /// Only directory-level problems (unreadable input directory, output
    /// directory that cannot be created or equals the input directory) are
    /// returned as errors; per-file failures go into the report.
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new();

        fs::create_dir_all(&self.config.output_dir)?;
        let input_dir = fs::canonicalize(&self.config.input_dir)?;
        if input_dir == fs::canonicalize(&self.config.output_dir)? {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "output directory must differ from the input directory",
            )));
        }

        let inputs = self.discover()?;
        info!(
            files = inputs.len(),
            input_dir = %self.config.input_dir.display(),
            output_dir = %self.config.output_dir.display(),
            aggregation = ?self.config.aggregation,
            "Input files discovered"
        );

        let mut remaining = inputs.iter();

        while let Some(input) = remaining.next() {
            let name = file_name(input);

            if self.cancel.is_cancelled() {
                warn!("Cancellation requested, not starting further files");
                report.cancelled = true;
                report.skipped.push(name);
                report.skipped.extend(remaining.by_ref().map(|p| file_name(p)));
                break;
            }

            let output = self.config.output_dir.join(&name);
            let file_start = Instant::now();

            match self.process_file(input, &output) {
                Ok(stats) => report.processed.push(stats),
                Err(e) => {
                    let elapsed = file_start.elapsed();
                    error!(
                        file = %name,
                        error = %e,
                        elapsed_secs = seconds(elapsed),
                        "File processing failed"
                    );
                    report.failed.push(FileFailure::from_error(&name, &e, elapsed));

                    let cancelled = matches!(e, Error::Cancelled);
                    if cancelled || self.config.on_error == FailurePolicy::Stop {
                        report.cancelled = cancelled;
                        report.skipped.extend(remaining.by_ref().map(|p| file_name(p)));
                        break;
                    }
                }
            }
        }

        report.elapsed_secs = seconds(started.elapsed());
        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            rows = report.total_rows(),
            elapsed_secs = report.elapsed_secs,
            "Run finished"
        );

        Ok(report)
    }

    /// Aggregates one gzip CSV file and writes its wide table to `output`.
    #[tracing::instrument(skip_all, fields(file = %file_name(input)))]
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<FileStats> {
        let start = Instant::now();
        info!("Processing file");

        let reader = ChunkedReader::open(input, self.config.chunk_size)?;

        let (aggregated, batches) = match self.config.aggregation {
            AggregationKind::Mean => self.aggregate::<Mean, _>(reader)?,
            AggregationKind::Min => self.aggregate::<Min, _>(reader)?,
            AggregationKind::Max => self.aggregate::<Max, _>(reader)?,
            AggregationKind::Variance => self.aggregate::<Variance, _>(reader)?,
        };

        let wide = WideTable::pivot(&aggregated);
        debug!(
            keys = aggregated.len(),
            rows = wide.len(),
            columns = wide.columns.len(),
            "Pivoted to wide layout"
        );
        write_wide_table(output, &wide)?;

        let stats = FileStats {
            file: file_name(input),
            rows: aggregated.rows(),
            null_values: aggregated.null_values(),
            batches,
            keys: aggregated.len(),
            output_rows: wide.len(),
            columns: wide.columns.len(),
            elapsed_secs: seconds(start.elapsed()),
        };
        info!(
            rows = stats.rows,
            batches = stats.batches,
            output_rows = stats.output_rows,
            elapsed_secs = stats.elapsed_secs,
            "File processed"
        );

        Ok(stats)
    }

    fn aggregate<A, R>(&self, reader: ChunkedReader<R>) -> Result<(Aggregated<'t>, usize)>
    where
        A: Aggregation,
        R: Read + Send,
    {
        let table = self.table;
        let cancel = &self.cancel;
        self.pool.install(|| aggregate_batches::<A, _>(reader, table, cancel))
    }
}

/// Folds a stream of batches on the current `rayon` pool and finalizes the
/// merged result. Returns the result and the number of batches folded.
///
/// Batches are pulled one at a time from `batches`, so at most one batch per
/// worker is held in memory.
///
/// # Errors
///
/// Returns the first read, parse or translation error, or
/// [`Error::Cancelled`] if `cancel` fires between batches.
pub fn aggregate_batches<'t, A, I>(
    batches: I,
    table: &'t TranslationTable,
    cancel: &CancelToken,
) -> Result<(Aggregated<'t>, usize)>
where
    A: Aggregation,
    I: Iterator<Item = Result<Batch>> + Send,
{
    let folded = AtomicUsize::new(0);

    let merged = batches
        .par_bridge()
        .map(|batch| -> Result<PartialAggregate<'t, A>> {
            cancel.check()?;
            let batch = batch?;
            trace!(batch = batch.index, rows = batch.len(), "Folding batch");

            let partial = PartialAggregate::<A>::from_batch(&batch, table)?;
            folded.fetch_add(1, Ordering::Relaxed);
            Ok(partial)
        })
        .try_reduce(PartialAggregate::new, |a, b| Ok(a.merge(b)))?;

    Ok((merged.finalize(), folded.into_inner()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
