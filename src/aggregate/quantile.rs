use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::debug;

use super::Aggregator;
use crate::error::MetricsError;

const SIGNIFICANT_FIGURES: u8 = 3;

/// Value distribution backed by an auto-resizing HDR histogram.
#[derive(Debug, Clone)]
pub struct Quantile {
    hist: Histogram<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuantileSummary {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

impl Quantile {
    /// Create an empty distribution.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let hist =
            Histogram::<u64>::new(SIGNIFICANT_FIGURES).map_err(|err| MetricsError::Histogram {
                context: "create",
                source: Box::new(err),
            })?;
        Ok(Self { hist })
    }

    /// Record `value`, growing the histogram range as needed.
    pub fn record(&mut self, value: u64) {
        if let Err(err) = self.hist.record(value) {
            debug!(value, %err, "Value outside trackable range, clamping");
            self.hist.saturating_record(value);
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    /// Value at quantile `q` in `[0, 1]`, or `None` when nothing was recorded.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<u64> {
        if self.hist.is_empty() {
            return None;
        }
        Some(self.hist.value_at_quantile(q))
    }

    #[must_use]
    pub fn summary(&self) -> QuantileSummary {
        if self.hist.is_empty() {
            return QuantileSummary::default();
        }
        QuantileSummary {
            count: self.hist.len(),
            min: self.hist.min(),
            max: self.hist.max(),
            p50: self.hist.value_at_quantile(0.5),
            p90: self.hist.value_at_quantile(0.9),
            p95: self.hist.value_at_quantile(0.95),
            p99: self.hist.value_at_quantile(0.99),
        }
    }
}

impl Aggregator for Quantile {
    type Value = u64;
    type Estimate = QuantileSummary;

    fn update(&mut self, value: &u64) {
        self.record(*value);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        if self.hist.sigfig() != other.hist.sigfig() {
            return Err(MetricsError::MergeMismatch {
                kind: "quantile",
                left: u64::from(self.hist.sigfig()),
                right: u64::from(other.hist.sigfig()),
            });
        }
        self.hist
            .add(&other.hist)
            .map_err(|err| MetricsError::Histogram {
                context: "merge",
                source: Box::new(err),
            })
    }

    fn estimate(&self) -> QuantileSummary {
        self.summary()
    }
}
