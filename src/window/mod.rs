//! Time-windowed metric buckets.
//!
//! A [`WindowManager`] keeps one live [`MetricsBucket`] that accepts writes
//! and up to `num_periods` completed, read-only buckets behind it. Event
//! timestamps and heartbeats drive rotation; [`PeriodShiftHook`]s let the
//! owning handler purge correlators and carry state into the next period.
mod bucket;
mod manager;


pub use bucket::{BucketSnapshot, BucketState, MetricsBucket};
pub use manager::{
    DEFAULT_NUM_PERIODS, DEFAULT_PERIOD, MAX_DEEP_SAMPLE_RATE, NoHook, PeriodShift,
    PeriodShiftHook, WindowConfig, WindowManager,
};
