//! Event timestamps.
//!
//! Network timestamps come from many sources (capture headers, dnstap
//! envelopes, probe sockets) and are not guaranteed to be ordered across
//! them, so differences are always taken as absolute values.
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Point in time measured from the Unix epoch with nanosecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(Duration::ZERO);

    #[must_use]
    pub fn new(secs: u64, nanos: u32) -> Self {
        Self(Duration::from_secs(secs).saturating_add(Duration::from_nanos(u64::from(nanos))))
    }

    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    #[must_use]
    pub const fn from_duration(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    /// Wall-clock time. Clocks set before the epoch collapse to the epoch.
    #[must_use]
    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        )
    }

    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0.as_secs()
    }

    #[must_use]
    pub const fn subsec_nanos(self) -> u32 {
        self.0.subsec_nanos()
    }

    /// Non-negative distance between two timestamps regardless of order.
    #[must_use]
    pub fn abs_diff(self, other: Timestamp) -> Duration {
        if self.0 >= other.0 {
            self.0.saturating_sub(other.0)
        } else {
            other.0.saturating_sub(self.0)
        }
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration))
    }

    #[must_use]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }
}

impl From<Duration> for Timestamp {
    fn from(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0.as_secs(), self.0.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_diff_is_symmetric() {
        let early = Timestamp::new(10, 900_000_000);
        let late = Timestamp::new(12, 100_000_000);
        let forward = late.abs_diff(early);
        let backward = early.abs_diff(late);
        assert_eq!(forward, Duration::from_millis(1_200));
        assert_eq!(forward, backward);
    }

    #[test]
    fn abs_diff_borrows_a_second_for_negative_nanos() {
        let start = Timestamp::new(5, 999_000_000);
        let end = Timestamp::new(6, 1_000_000);
        assert_eq!(end.abs_diff(start), Duration::from_millis(2));
    }

    #[test]
    fn saturating_duration_since_never_underflows() {
        let start = Timestamp::from_secs(20);
        let end = Timestamp::from_secs(10);
        assert_eq!(end.saturating_duration_since(start), Duration::ZERO);
    }

    #[test]
    fn display_pads_nanoseconds() {
        assert_eq!(Timestamp::new(3, 42).to_string(), "3.000000042");
    }
}
