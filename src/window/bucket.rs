use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;

use crate::aggregate::{Aggregate, Aggregator, Counter, Rate, RateSummary};
use crate::error::MetricsError;
use crate::time::Timestamp;

/// Handler-specific statistics held by one bucket.
pub trait BucketState: Send + Sync + Sized {
    type Config: Clone + Send + Sync;
    type Snapshot: Serialize;

    /// Build an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the statistics cannot be created.
    fn new(config: &Self::Config) -> Result<Self, MetricsError>;

    /// Fold `other` into `self` field by field. Additive fields always sum;
    /// point-in-time fields follow `op`.
    ///
    /// # Errors
    ///
    /// Returns an error if two statistics were configured differently.
    fn specialized_merge(&mut self, other: &Self, op: Aggregate) -> Result<(), MetricsError>;

    /// One-time finalization before the bucket freezes.
    fn on_set_read_only(&mut self) {}

    fn snapshot(&self, live_rates: bool) -> Self::Snapshot;
}

#[derive(Debug, Clone, Copy)]
struct BucketPeriod {
    start: Timestamp,
    end: Option<Timestamp>,
}

#[derive(Debug)]
struct EventCounters {
    num_events: Counter,
    num_samples: Counter,
    event_rate: Rate,
}

/// One period of aggregated state.
///
/// Event counters and handler state sit behind separate reader/writer
/// locks; a writer holds the state lock for exactly one event.
#[derive(Debug)]
pub struct MetricsBucket<S> {
    period: Mutex<BucketPeriod>,
    events: RwLock<EventCounters>,
    state: RwLock<S>,
    read_only: AtomicBool,
    recorded_stream: AtomicBool,
}

#[derive(Debug, Serialize)]
pub struct BucketSnapshot<T> {
    pub period_start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<Timestamp>,
    pub read_only: bool,
    pub recorded_stream: bool,
    pub num_events: u64,
    pub num_samples: u64,
    pub event_rate: RateSummary,
    pub metrics: T,
}

impl<S: BucketState> MetricsBucket<S> {
    /// Create an empty, writable bucket starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state or event rate cannot be created.
    pub fn new(config: &S::Config, start: Timestamp) -> Result<Self, MetricsError> {
        Ok(Self {
            period: Mutex::new(BucketPeriod { start, end: None }),
            events: RwLock::new(EventCounters {
                num_events: Counter::new(),
                num_samples: Counter::new(),
                event_rate: Rate::new()?,
            }),
            state: RwLock::new(S::new(config)?),
            read_only: AtomicBool::new(false),
            recorded_stream: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn start_tstamp(&self) -> Timestamp {
        self.period.lock().start
    }

    #[must_use]
    pub fn end_tstamp(&self) -> Option<Timestamp> {
        self.period.lock().end
    }

    pub fn set_start_tstamp(&self, stamp: Timestamp) {
        self.period.lock().start = stamp;
    }

    pub fn set_end_tstamp(&self, stamp: Timestamp) {
        self.period.lock().end = Some(stamp);
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_recorded_stream(&self) -> bool {
        self.recorded_stream.load(Ordering::Acquire)
    }

    pub fn set_recorded_stream(&self, recorded: bool) {
        self.recorded_stream.store(recorded, Ordering::Release);
    }

    #[must_use]
    pub fn num_events(&self) -> u64 {
        self.events.read().num_events.value()
    }

    #[must_use]
    pub fn num_samples(&self) -> u64 {
        self.events.read().num_samples.value()
    }

    /// Count one event; `deep` marks it as sampled for full treatment.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::ReadOnlyBucket`] once the bucket is frozen.
    pub fn new_event(&self, stamp: Timestamp, deep: bool) -> Result<(), MetricsError> {
        let mut events = self.events.write();
        if self.is_read_only() {
            return Err(MetricsError::ReadOnlyBucket);
        }
        events.num_events.inc();
        if deep {
            events.num_samples.inc();
        }
        events.event_rate.add(stamp, 1);
        Ok(())
    }

    /// Apply one event's updates under the state write lock.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::ReadOnlyBucket`] once the bucket is frozen.
    pub fn process<R>(&self, update: impl FnOnce(&mut S) -> R) -> Result<R, MetricsError> {
        let mut state = self.state.write();
        if self.is_read_only() {
            return Err(MetricsError::ReadOnlyBucket);
        }
        Ok(update(&mut state))
    }

    pub fn read<R>(&self, view: impl FnOnce(&S) -> R) -> R {
        view(&self.state.read())
    }

    /// Merge another bucket into this one. Locks on both buckets are taken
    /// in address order, so opposing merges of the same pair cannot deadlock.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::SelfMerge`] when `other` is this bucket,
    /// [`MetricsError::ReadOnlyBucket`] when this bucket is frozen, or any
    /// mismatch reported by the state.
    pub fn specialized_merge(&self, other: &Self, op: Aggregate) -> Result<(), MetricsError> {
        if ptr::eq(self, other) {
            return Err(MetricsError::SelfMerge);
        }
        {
            let (mut state, incoming) = lock_for_merge(&self.state, &other.state);
            if self.is_read_only() {
                return Err(MetricsError::ReadOnlyBucket);
            }
            state.specialized_merge(&incoming, op)?;
        }
        {
            let (mut events, incoming) = lock_for_merge(&self.events, &other.events);
            events.num_events.merge_with(&incoming.num_events, Aggregate::Sum);
            events.num_samples.merge_with(&incoming.num_samples, Aggregate::Sum);
            events.event_rate.merge(&incoming.event_rate)?;
        }
        let theirs = *other.period.lock();
        let mut period = self.period.lock();
        period.start = period.start.min(theirs.start);
        let their_end = theirs.end.unwrap_or(theirs.start);
        period.end = Some(period.end.map_or(their_end, |end| end.max(their_end)));
        Ok(())
    }

    /// Freeze the bucket. Runs the state's finalization and stops the event
    /// rate so its last value is kept. Idempotent.
    pub fn mark_read_only(&self) {
        let mut state = self.state.write();
        if self.read_only.swap(true, Ordering::AcqRel) {
            return;
        }
        state.on_set_read_only();
        self.events.write().event_rate.cancel();
    }

    #[must_use]
    pub fn snapshot(&self) -> BucketSnapshot<S::Snapshot> {
        let read_only = self.is_read_only();
        let recorded_stream = self.is_recorded_stream();
        let live_rates = !read_only && !recorded_stream;
        let period = *self.period.lock();
        let (num_events, num_samples, event_rate) = {
            let events = self.events.read();
            (
                events.num_events.value(),
                events.num_samples.value(),
                events.event_rate.summary(live_rates),
            )
        };
        BucketSnapshot {
            period_start: period.start,
            period_end: period.end,
            read_only,
            recorded_stream,
            num_events,
            num_samples,
            event_rate,
            metrics: self.read(|state| state.snapshot(live_rates)),
        }
    }
}

// Write guard on `target` and read guard on `source`, acquired lowest address first.
fn lock_for_merge<'lock, T>(
    target: &'lock RwLock<T>,
    source: &'lock RwLock<T>,
) -> (RwLockWriteGuard<'lock, T>, RwLockReadGuard<'lock, T>) {
    if ptr::from_ref(target) < ptr::from_ref(source) {
        let written = target.write();
        (written, source.read())
    } else {
        let read = source.read();
        (target.write(), read)
    }
}
