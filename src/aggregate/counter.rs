use serde::Serialize;

use super::{Aggregate, Aggregator};
use crate::error::MetricsError;

/// Monotonic event counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Counter(u64);

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn inc(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn add(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Merge honouring the field's aggregate operator.
    pub fn merge_with(&mut self, other: &Counter, op: Aggregate) {
        match op {
            Aggregate::Sum => self.add(other.0),
            Aggregate::Latest => self.0 = other.0,
        }
    }
}

impl Aggregator for Counter {
    type Value = u64;
    type Estimate = u64;

    fn update(&mut self, value: &u64) {
        self.add(*value);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        self.add(other.0);
        Ok(())
    }

    fn estimate(&self) -> u64 {
        self.0
    }
}

/// Point-in-time value. Merging keeps the most recently set side, so a
/// merge over several periods reports the newest reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Gauge(Option<u64>);

impl Gauge {
    pub fn set(&mut self, value: u64) {
        self.0 = Some(value);
    }

    #[must_use]
    pub const fn value(&self) -> Option<u64> {
        self.0
    }

    /// Merge honouring the field's aggregate operator. An unset side never
    /// replaces a reading.
    pub fn merge_with(&mut self, other: &Gauge, op: Aggregate) {
        let Some(incoming) = other.0 else {
            return;
        };
        self.0 = match (op, self.0) {
            (Aggregate::Sum, Some(current)) => Some(current.saturating_add(incoming)),
            (Aggregate::Sum | Aggregate::Latest, _) => Some(incoming),
        };
    }
}

impl Aggregator for Gauge {
    type Value = u64;
    type Estimate = Option<u64>;

    fn update(&mut self, value: &u64) {
        self.set(*value);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        if other.0.is_some() {
            self.0 = other.0;
        }
        Ok(())
    }

    fn estimate(&self) -> Option<u64> {
        self.0
    }
}
