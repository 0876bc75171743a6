//! Mergeable statistics held by metrics buckets.
//!
//! Every statistic folds observations in with `update`, folds another
//! instance of the same statistic in with `merge`, and reports a best-effort
//! value with `estimate`. Merging instances built with different parameters
//! is a caller bug and is reported as [`MetricsError::MergeMismatch`].
mod cardinality;
mod counter;
pub mod icon;
mod quantile;
mod rate;
mod topn;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;

pub use cardinality::Cardinality;
pub use counter::{Counter, Gauge};
pub use icon::LgK;
pub use quantile::{Quantile, QuantileSummary};
pub use rate::{Rate, RateSummary};
pub use topn::{TopN, TopNEntry};

/// How a point-in-time field combines when two buckets merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    /// Additive: the merged value covers both inputs.
    #[default]
    Sum,
    /// Point-in-time: the merged value is the most recent input.
    Latest,
}

pub trait Aggregator {
    type Value: ?Sized;
    type Estimate;

    fn update(&mut self, value: &Self::Value);

    /// Fold `other` into `self`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::MergeMismatch`] when the two instances were
    /// configured differently.
    fn merge(&mut self, other: &Self) -> Result<(), MetricsError>;

    fn estimate(&self) -> Self::Estimate;
}
