//! Aggregation of long-format readings into per-cell values.
//!
//! Each batch is folded into a [`PartialAggregate`] keyed by
//! `(asset, bucket, variable)`. Partials merge associatively, so batches can
//! be folded in any order and on any thread; the merged result is finalized
//! once into an [`Aggregated`].

pub mod accumulator;
pub mod merge;
pub mod partial;
pub mod types;

pub use accumulator::{Accumulator, Aggregation, AggregationKind, Max, Mean, Min, Variance};
pub use merge::{DECIMAL_PLACES, reduce, round_to_places};
pub use partial::{PartialAggregate, parse_value};
pub use types::{Aggregated, BucketKey};
