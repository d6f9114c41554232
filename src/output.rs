//! Pivoting aggregated cells into the wide layout and persisting it.
//!
//! Output files are gzip-compressed CSV with the header
//! `asset,unixtime,<variable…>`. They are written to a temporary file next to
//! the destination and renamed into place only once complete.

use crate::aggregate::Aggregated;
use crate::error::Result;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// One `(asset, unixtime)` row; `values` follow [`WideTable::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow<'t> {
    pub asset: &'t str,
    pub unixtime: i64,
    pub values: Vec<Option<f64>>,
}

/// Aggregated cells with variables as columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable<'t> {
    pub columns: Vec<&'t str>,
    pub rows: Vec<WideRow<'t>>,
}

impl<'t> WideTable<'t> {
    /// Builds one row per observed `(asset, bucket)` pair, sorted by asset
    /// then time. Columns are the sorted variable names seen anywhere in the
    /// input.
    pub fn pivot(aggregated: &Aggregated<'t>) -> Self {
        let columns: Vec<&'t str> = aggregated
            .iter()
            .map(|(key, _)| key.variable)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position: HashMap<&str, usize> =
            columns.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        let mut rows: Vec<WideRow<'t>> = Vec::new();

        for (key, value) in aggregated.iter() {
            let continues_row = rows
                .last()
                .is_some_and(|row| row.asset == key.asset && row.unixtime == key.bucket);

            if !continues_row {
                rows.push(WideRow {
                    asset: key.asset,
                    unixtime: key.bucket,
                    values: vec![None; columns.len()],
                });
            }

            if let (Some(row), Some(&column)) = (rows.last_mut(), position.get(key.variable)) {
                row.values[column] = *value;
            }
        }

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Writes `table` as gzip-compressed CSV to `path`, replacing it atomically.
///
/// Missing and null cells are written as empty fields. Nothing is left at
/// `path` if writing fails.
#[tracing::instrument(skip_all, fields(path = %path.display(), rows = table.len()))]
pub fn write_wide_table(path: &Path, table: &WideTable<'_>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let staging = tempfile::Builder::new()
        .prefix(".horizontalizer-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    debug!(staging = %staging.path().display(), "Writing wide table");

    let encoder = GzEncoder::new(BufWriter::new(staging), Compression::default());
    let mut writer = WriterBuilder::new().from_writer(encoder);

    writer.write_field("asset")?;
    writer.write_field("unixtime")?;
    for column in &table.columns {
        writer.write_field(column)?;
    }
    writer.write_record(None::<&[u8]>)?;

    for row in &table.rows {
        writer.write_field(row.asset)?;
        writer.write_field(row.unixtime.to_string())?;
        for value in &row.values {
            match value {
                Some(v) => writer.write_field(v.to_string())?,
                None => writer.write_field("")?,
            }
        }
        writer.write_record(None::<&[u8]>)?;
    }

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    let staging = encoder
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())?;
    staging.as_file().sync_all()?;
    staging.persist(path).map_err(|e| e.error)?;

    Ok(())
}
