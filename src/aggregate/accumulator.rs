//! Fold-then-finalize aggregations.
//!
//! Every aggregation keeps a mergeable state per cell. States built from
//! different batches combine with [`Aggregation::merge`] in any order, and
//! only the fully merged state is turned into a value by
//! [`Aggregation::finish`].

use serde::Serialize;
use std::fmt::Debug;

/// Defines an aggregation over the values of one cell.
///
/// - `fold` adds one value to the state
///
/// - `merge` combines two states; must be associative and commutative
///
/// - `finish` produces the result, `None` if nothing was folded
pub trait Aggregation: Send + Sync + 'static {
    type State: Default + Clone + Debug + Send;

    fn fold(state: &mut Self::State, value: f64);

    fn merge(state: &mut Self::State, other: Self::State);

    fn finish(state: &Self::State) -> Option<f64>;
}

/// Aggregation selected at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    #[default]
    Mean,
    Min,
    Max,
    Variance,
}

/// Running `(sum, count)` with compensated summation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    sum: f64,
    compensation: f64,
    count: u64,
}

impl Accumulator {
    pub fn add(&mut self, value: f64) {
        self.accumulate(value);
        self.count += 1;
    }

    pub fn merge(&mut self, other: Self) {
        self.accumulate(other.sum);
        self.compensation += other.compensation;
        self.count += other.count;
    }

    pub fn sum(&self) -> f64 {
        if self.sum.is_finite() {
            self.sum + self.compensation
        } else {
            self.sum
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Divides once; `None` when no value was added.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum() / self.count as f64)
    }

    // Neumaier's variant of Kahan summation.
    // Compensation only applies while the sum is finite.
    fn accumulate(&mut self, value: f64) {
        let total = self.sum + value;
        if !total.is_finite() {
            self.sum = total;
            return;
        }
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - total) + value;
        } else {
            self.compensation += (value - total) + self.sum;
        }
        self.sum = total;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

impl Aggregation for Mean {
    type State = Accumulator;

    fn fold(state: &mut Accumulator, value: f64) {
        state.add(value);
    }

    fn merge(state: &mut Accumulator, other: Accumulator) {
        state.merge(other);
    }

    fn finish(state: &Accumulator) -> Option<f64> {
        state.mean()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl Aggregation for Min {
    type State = Option<f64>;

    fn fold(state: &mut Option<f64>, value: f64) {
        *state = Some(state.map_or(value, |current| current.min(value)));
    }

    fn merge(state: &mut Option<f64>, other: Option<f64>) {
        if let Some(value) = other {
            Self::fold(state, value);
        }
    }

    fn finish(state: &Option<f64>) -> Option<f64> {
        *state
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl Aggregation for Max {
    type State = Option<f64>;

    fn fold(state: &mut Option<f64>, value: f64) {
        *state = Some(state.map_or(value, |current| current.max(value)));
    }

    fn merge(state: &mut Option<f64>, other: Option<f64>) {
        if let Some(value) = other {
            Self::fold(state, value);
        }
    }

    fn finish(state: &Option<f64>) -> Option<f64> {
        *state
    }
}

/// Count, mean and sum of squared deviations (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    count: u64,
    mean: f64,
    m2: f64,
}

/// Population variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Variance;

impl Aggregation for Variance {
    type State = Moments;

    fn fold(state: &mut Moments, value: f64) {
        state.count += 1;
        let delta = value - state.mean;
        state.mean += delta / state.count as f64;
        state.m2 += delta * (value - state.mean);
    }

    // Chan et al. pairwise update.
    fn merge(state: &mut Moments, other: Moments) {
        if other.count == 0 {
            return;
        }
        if state.count == 0 {
            *state = other;
            return;
        }

        let count = state.count + other.count;
        let delta = other.mean - state.mean;
        let weight = other.count as f64 / count as f64;

        state.mean += delta * weight;
        state.m2 += other.m2 + delta * delta * state.count as f64 * weight;
        state.count = count;
    }

    fn finish(state: &Moments) -> Option<f64> {
        (state.count > 0).then(|| state.m2 / state.count as f64)
    }
}
