use crate::error::{Error, ErrorKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Summary of one successfully processed input file.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FileStats {
    pub file: String,
    pub rows: u64,
    pub null_values: u64,
    pub batches: usize,

    // distinct (asset, bucket, variable) cells
    pub keys: usize,
    pub output_rows: usize,
    pub columns: usize,

    pub elapsed_secs: f64,
}

/// An input file whose processing was aborted.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub kind: ErrorKind,
    pub message: String,
    pub elapsed_secs: f64,
}

impl FileFailure {
    pub fn from_error(file: &str, error: &Error, elapsed: Duration) -> Self {
        FileFailure {
            file: file.to_string(),
            kind: error.kind(),
            message: error.to_string(),
            elapsed_secs: seconds(elapsed),
        }
    }
}

/// Outcome of a whole run over an input directory.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub processed: Vec<FileStats>,
    pub failed: Vec<FileFailure>,

    // matching files never attempted because the run stopped early
    pub skipped: Vec<String>,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport {
            started_at: Utc::now(),
            processed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
            elapsed_secs: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn total_rows(&self) -> u64 {
        self.processed.iter().map(|s| s.rows).sum()
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Elapsed time in seconds, rounded to milliseconds.
pub fn seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
