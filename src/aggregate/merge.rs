//! Merge of partial aggregates and finalization into per-cell results.

use super::accumulator::Aggregation;
use super::partial::PartialAggregate;
use super::types::Aggregated;
use crate::error::Result;

/// Decimal places kept in final values.
pub const DECIMAL_PLACES: i32 = 5;

/// Rounds half to even at `places` decimals.
pub fn round_to_places(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    let scaled = value * scale;
    if !scaled.is_finite() {
        return value;
    }
    let rounded = scaled.round_ties_even() / scale;
    // avoid writing "-0"
    if rounded == 0.0 { 0.0 } else { rounded }
}

impl<'t, A: Aggregation> PartialAggregate<'t, A> {
    /// Turns the merged states into final values.
    ///
    /// Cells with nothing folded (only null readings) finish as `None`.
    pub fn finalize(self) -> Aggregated<'t> {
        let cells = self
            .cells
            .into_iter()
            .map(|(key, state)| {
                let value = A::finish(&state).map(|v| round_to_places(v, DECIMAL_PLACES));
                (key, value)
            })
            .collect();

        Aggregated {
            cells,
            rows: self.rows,
            null_values: self.null_values,
        }
    }
}

/// Merges a sequence of per-batch partials and finalizes the result.
///
/// # Errors
///
/// Returns the first error in `partials`.
pub fn reduce<'t, A, I>(partials: I) -> Result<Aggregated<'t>>
where
    A: Aggregation,
    I: IntoIterator<Item = Result<PartialAggregate<'t, A>>>,
{
    let mut merged = PartialAggregate::<A>::new();
    for partial in partials {
        merged = merged.merge(partial?);
    }
    Ok(merged.finalize())
}
