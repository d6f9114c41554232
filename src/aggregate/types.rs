//! Keys and results shared by the partial aggregator and the merge reducer.

use std::collections::BTreeMap;

/// Identifies one aggregation cell.
///
/// Asset and variable name borrow from the translation table, so keys are
/// cheap to build and hash. Ordering is `(asset, bucket, variable)`, which
/// keeps the cells of one output row adjacent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey<'t> {
    pub asset: &'t str,
    pub bucket: i64,
    pub variable: &'t str,
}

/// Final value per observed cell.
///
/// A cell that only ever saw null values is present with `None`; a cell that
/// was never observed is absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregated<'t> {
    pub(crate) cells: BTreeMap<BucketKey<'t>, Option<f64>>,
    pub(crate) rows: u64,
    pub(crate) null_values: u64,
}

impl<'t> Aggregated<'t> {
    pub fn get(&self, key: &BucketKey<'_>) -> Option<Option<f64>> {
        self.cells.get(key).copied()
    }

    /// Looks up a cell by its parts.
    pub fn value(&self, asset: &str, bucket: i64, variable: &str) -> Option<Option<f64>> {
        self.get(&BucketKey {
            asset,
            bucket,
            variable,
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells in `(asset, bucket, variable)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey<'t>, &Option<f64>)> {
        self.cells.iter()
    }

    /// Input rows that contributed to this result.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn null_values(&self) -> u64 {
        self.null_values
    }
}
