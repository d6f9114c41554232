//! Per-batch folding of raw readings into cell states.

use super::accumulator::Aggregation;
use super::types::BucketKey;
use crate::bucket::{bucket, truncate_to_minute};
use crate::error::{Error, Result};
use crate::reader::{Batch, RawReading};
use crate::translation::TranslationTable;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Field contents treated as a missing value.
const NULL_TOKENS: [&str; 7] = ["", "NaN", "nan", "NA", "N/A", "NULL", "null"];

/// Cell states for some subset of the input, not yet finalized.
///
/// Partials for the same file merge in any order and grouping; see
/// [`PartialAggregate::merge`].
#[derive(Debug, Clone)]
pub struct PartialAggregate<'t, A: Aggregation> {
    pub(crate) cells: HashMap<BucketKey<'t>, A::State>,
    pub(crate) rows: u64,
    pub(crate) null_values: u64,
}

impl<'t, A: Aggregation> Default for PartialAggregate<'t, A> {
    fn default() -> Self {
        Self {
            cells: HashMap::new(),
            rows: 0,
            null_values: 0,
        }
    }
}

impl<'t, A: Aggregation> PartialAggregate<'t, A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds every row of `batch`.
    ///
    /// # Errors
    ///
    /// Fails on the first row with an unknown `(asset, code)` pair or a
    /// malformed date, time or value; the rest of the batch is discarded.
    pub fn from_batch(batch: &Batch, table: &'t TranslationTable) -> Result<Self> {
        let mut partial = Self::new();
        partial.cells.reserve(batch.len().min(1024));

        for reading in &batch.rows {
            partial.fold_reading(reading, table)?;
        }

        Ok(partial)
    }

    /// Folds one reading into its cell.
    ///
    /// Null values mark the cell as observed without contributing to it.
    pub fn fold_reading(
        &mut self,
        reading: &RawReading,
        table: &'t TranslationTable,
    ) -> Result<()> {
        let time = truncate_to_minute(&reading.time);
        let (asset, variable) = table.resolve(&reading.asset, &reading.variable)?;
        let bucket = bucket(&reading.date, time).map_err(|e| e.at_line(reading.line))?;
        let value = parse_value(reading.value.as_deref()).map_err(|e| e.at_line(reading.line))?;

        let state = self
            .cells
            .entry(BucketKey {
                asset,
                bucket,
                variable,
            })
            .or_default();

        match value {
            Some(value) => A::fold(state, value),
            None => self.null_values += 1,
        }
        self.rows += 1;

        Ok(())
    }

    /// Combines two partials; the larger map absorbs the smaller one.
    #[must_use]
    pub fn merge(mut self, mut other: Self) -> Self {
        if self.cells.len() < other.cells.len() {
            std::mem::swap(&mut self, &mut other);
        }

        for (key, state) in other.cells {
            match self.cells.entry(key) {
                Entry::Occupied(mut entry) => A::merge(entry.get_mut(), state),
                Entry::Vacant(entry) => {
                    entry.insert(state);
                }
            }
        }

        self.rows += other.rows;
        self.null_values += other.null_values;
        self
    }

    pub fn get<'k>(&'k self, key: &BucketKey<'k>) -> Option<&'k A::State> {
        self.cells.get(key)
    }

    /// Number of distinct cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn null_values(&self) -> u64 {
        self.null_values
    }
}

/// Parses a raw value field; null tokens and NaN become `None`.
pub fn parse_value(raw: Option<&str>) -> Result<Option<f64>> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(None);
    };
    if NULL_TOKENS.contains(&raw) {
        return Ok(None);
    }

    let value: f64 = raw.parse().map_err(|_| Error::Field {
        field: "value",
        value: raw.to_string(),
        line: None,
    })?;

    Ok((!value.is_nan()).then_some(value))
}
