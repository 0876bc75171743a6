use serde::Serialize;

use super::{Aggregator, Quantile, QuantileSummary};
use crate::error::MetricsError;
use crate::time::Timestamp;

// Idle seconds back-filled with zero rates between two observations.
const MAX_IDLE_FILL: u64 = 60;

/// Per-second rate meter driven by event time.
///
/// Events are counted into whole seconds; when a later second begins, the
/// finished second's count becomes the live rate and is recorded into a
/// distribution of per-second rates. Cancelling flushes the in-progress
/// second and freezes the meter so its last value is kept.
#[derive(Debug, Clone)]
pub struct Rate {
    current_second: Option<u64>,
    current_count: u64,
    last_rate: u64,
    rates: Quantile,
    frozen: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<u64>,
    #[serde(flatten)]
    pub per_second: QuantileSummary,
}

impl Rate {
    /// Create an idle meter.
    ///
    /// # Errors
    ///
    /// Returns an error if the rate distribution cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            current_second: None,
            current_count: 0,
            last_rate: 0,
            rates: Quantile::new()?,
            frozen: false,
        })
    }

    pub fn add(&mut self, stamp: Timestamp, count: u64) {
        if self.frozen {
            return;
        }
        let second = stamp.as_secs();
        match self.current_second {
            None => self.current_second = Some(second),
            Some(current) if second > current => {
                self.roll(current, second);
            }
            Some(_) => {}
        }
        self.current_count = self.current_count.saturating_add(count);
    }

    fn roll(&mut self, current: u64, next: u64) {
        self.flush();
        let idle = next.saturating_sub(current).saturating_sub(1).min(MAX_IDLE_FILL);
        for _ in 0..idle {
            self.rates.record(0);
        }
        if idle > 0 {
            self.last_rate = 0;
        }
        self.current_second = Some(next);
    }

    fn flush(&mut self) {
        if self.current_second.is_some() {
            self.rates.record(self.current_count);
            self.last_rate = self.current_count;
        }
        self.current_count = 0;
    }

    /// Flush the in-progress second and stop accepting events.
    pub fn cancel(&mut self) {
        if self.frozen {
            return;
        }
        if self.current_count > 0 {
            self.flush();
        }
        self.frozen = true;
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Events counted in the most recently completed second.
    #[must_use]
    pub const fn live_rate(&self) -> u64 {
        self.last_rate
    }

    #[must_use]
    pub fn summary(&self, include_live: bool) -> RateSummary {
        RateSummary {
            live: include_live.then_some(self.last_rate),
            per_second: self.rates.summary(),
        }
    }
}

impl Aggregator for Rate {
    type Value = Timestamp;
    type Estimate = QuantileSummary;

    fn update(&mut self, value: &Timestamp) {
        self.add(*value, 1);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        self.rates.merge(&other.rates)?;
        if other.current_count > 0 && !other.frozen {
            self.rates.record(other.current_count);
        }
        self.last_rate = self.last_rate.max(other.last_rate);
        Ok(())
    }

    fn estimate(&self) -> QuantileSummary {
        self.rates.summary()
    }
}
