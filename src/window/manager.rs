use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tracing::debug;

use super::bucket::{BucketState, MetricsBucket};
use crate::aggregate::Aggregate;
use crate::error::{ConfigError, MetricsError};
use crate::time::Timestamp;

pub const DEFAULT_NUM_PERIODS: usize = 5;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
pub const MAX_DEEP_SAMPLE_RATE: u8 = 100;
const MAX_PERIOD: Duration = Duration::from_secs(86_400);

/// Validated window shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    num_periods: usize,
    period: Duration,
    deep_sample_rate: u8,
    recorded_stream: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            num_periods: DEFAULT_NUM_PERIODS,
            period: DEFAULT_PERIOD,
            deep_sample_rate: MAX_DEEP_SAMPLE_RATE,
            recorded_stream: false,
        }
    }
}

impl WindowConfig {
    /// # Errors
    ///
    /// Returns an error when `num_periods` or `period` is zero, `period`
    /// exceeds one day, or `deep_sample_rate` is outside `1..=100`.
    pub fn new(
        num_periods: usize,
        period: Duration,
        deep_sample_rate: u8,
    ) -> Result<Self, ConfigError> {
        if num_periods == 0 {
            return Err(ConfigError::FieldMustBePositive {
                field: "num_periods",
            });
        }
        if period.is_zero() {
            return Err(ConfigError::PeriodZero);
        }
        if period > MAX_PERIOD {
            return Err(ConfigError::PeriodTooLarge { period });
        }
        if !(1..=MAX_DEEP_SAMPLE_RATE).contains(&deep_sample_rate) {
            return Err(ConfigError::SampleRateOutOfRange {
                value: deep_sample_rate,
            });
        }
        Ok(Self {
            num_periods,
            period,
            deep_sample_rate,
            recorded_stream: false,
        })
    }

    #[must_use]
    pub const fn with_recorded_stream(mut self, recorded: bool) -> Self {
        self.recorded_stream = recorded;
        self
    }

    /// Completed periods retained behind the live bucket.
    #[must_use]
    pub const fn num_periods(&self) -> usize {
        self.num_periods
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub const fn deep_sample_rate(&self) -> u8 {
        self.deep_sample_rate
    }

    #[must_use]
    pub const fn recorded_stream(&self) -> bool {
        self.recorded_stream
    }

    /// Live bucket plus retained periods.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.num_periods.saturating_add(1)
    }
}

/// Context handed to [`PeriodShiftHook::on_period_shift`] before rotation.
pub struct PeriodShift<'window, S> {
    /// Start of the period being opened.
    pub stamp: Timestamp,
    /// Live bucket about to close; still writable.
    pub closing: &'window MetricsBucket<S>,
    /// Most recently completed period, if any.
    pub previous: Option<&'window MetricsBucket<S>>,
    /// Whether the oldest retained bucket is evicted by this shift.
    pub evicting: bool,
}

/// Callbacks run during rotation. Both run while rotation is in progress,
/// so they must not call back into the [`WindowManager`].
pub trait PeriodShiftHook<S> {
    fn on_period_shift(&mut self, _shift: &PeriodShift<'_, S>) {}

    fn on_period_evict(&mut self, _bucket: &MetricsBucket<S>) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHook;

impl<S> PeriodShiftHook<S> for NoHook {}

struct Window<S> {
    live: Arc<MetricsBucket<S>>,
    // Completed periods, newest first.
    history: VecDeque<Arc<MetricsBucket<S>>>,
    anchored: bool,
}

/// Owns the live bucket and the retained completed periods.
///
/// Rotation takes the window lock exclusively; recording into the live
/// bucket holds it shared for the duration of one event, so a rotation
/// never freezes a bucket under an in-flight write. Readers clone bucket
/// handles and release the window lock before touching bucket state.
pub struct WindowManager<S: BucketState> {
    config: WindowConfig,
    bucket_config: S::Config,
    window: RwLock<Window<S>>,
    recorded_stream: AtomicBool,
}

impl<S: BucketState> WindowManager<S> {
    /// Create a window with an empty live bucket. The live bucket's start
    /// is anchored by the first event, heartbeat or explicit start stamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the first bucket cannot be created.
    pub fn new(config: WindowConfig, bucket_config: S::Config) -> Result<Self, MetricsError> {
        let live = MetricsBucket::new(&bucket_config, Timestamp::EPOCH)?;
        live.set_recorded_stream(config.recorded_stream());
        Ok(Self {
            config,
            bucket_config,
            window: RwLock::new(Window {
                live: Arc::new(live),
                history: VecDeque::with_capacity(config.num_periods()),
                anchored: false,
            }),
            recorded_stream: AtomicBool::new(config.recorded_stream()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &WindowConfig {
        &self.config
    }

    #[must_use]
    pub const fn num_periods(&self) -> usize {
        self.config.num_periods()
    }

    /// Completed periods currently retained.
    #[must_use]
    pub fn current_periods(&self) -> usize {
        self.window.read().history.len()
    }

    #[must_use]
    pub fn live_bucket(&self) -> Arc<MetricsBucket<S>> {
        Arc::clone(&self.window.read().live)
    }

    /// Bucket `index` counted from the live bucket (0) backwards.
    #[must_use]
    pub fn bucket(&self, index: usize) -> Option<Arc<MetricsBucket<S>>> {
        let window = self.window.read();
        match index.checked_sub(1) {
            None => Some(Arc::clone(&window.live)),
            Some(completed) => window.history.get(completed).cloned(),
        }
    }

    #[must_use]
    pub fn is_recorded_stream(&self) -> bool {
        self.recorded_stream.load(Ordering::Acquire)
    }

    /// Flag this window as fed from a recorded source. Applies to the live
    /// bucket and every bucket opened afterwards.
    pub fn set_recorded_stream(&self, recorded: bool) {
        self.recorded_stream.store(recorded, Ordering::Release);
        self.window.read().live.set_recorded_stream(recorded);
    }

    /// Anchor the live bucket at the input's first timestamp.
    pub fn set_start_tstamp(&self, stamp: Timestamp) {
        let mut window = self.window.write();
        window.live.set_start_tstamp(stamp);
        window.anchored = true;
    }

    /// Record the final timestamp seen by the input on the live bucket.
    pub fn set_end_tstamp(&self, stamp: Timestamp) {
        self.window.read().live.set_end_tstamp(stamp);
    }

    /// Rotate the window if `stamp` lies past the live bucket's period.
    ///
    /// One shift is performed per elapsed period, capped at the window's
    /// capacity; new buckets start on `start + n * period` boundaries.
    /// Returns the number of shifts performed.
    ///
    /// # Errors
    ///
    /// Returns an error if a new bucket cannot be created.
    pub fn check_period_shift<H>(&self, stamp: Timestamp, hook: &mut H) -> Result<usize, MetricsError>
    where
        H: PeriodShiftHook<S>,
    {
        let period = self.config.period();
        {
            let window = self.window.read();
            if window.anchored && stamp < window.live.start_tstamp().saturating_add(period) {
                return Ok(0);
            }
        }

        let mut window = self.window.write();
        if !window.anchored {
            window.live.set_start_tstamp(stamp);
            window.anchored = true;
            return Ok(0);
        }
        let start = window.live.start_tstamp();
        let elapsed = stamp.saturating_duration_since(start);
        let periods = elapsed
            .as_nanos()
            .checked_div(period.as_nanos())
            .unwrap_or(0);
        if periods == 0 {
            return Ok(0);
        }

        let capacity = u128::try_from(self.config.capacity()).unwrap_or(u128::MAX);
        let skipped = periods.saturating_sub(capacity);
        let shifts = periods.min(capacity);
        let mut boundary = advance(start, period, skipped);
        if skipped > 0 {
            debug!(
                skipped = %skipped,
                "Idle gap exceeds window capacity; skipping empty periods"
            );
        }
        let mut performed = 0usize;
        for _ in 0..shifts {
            boundary = boundary.saturating_add(period);
            self.period_shift(&mut window, boundary, hook)?;
            performed = performed.saturating_add(1);
        }
        Ok(performed)
    }

    fn period_shift<H>(
        &self,
        window: &mut Window<S>,
        boundary: Timestamp,
        hook: &mut H,
    ) -> Result<(), MetricsError>
    where
        H: PeriodShiftHook<S>,
    {
        let fresh = MetricsBucket::new(&self.bucket_config, boundary)?;
        fresh.set_recorded_stream(self.is_recorded_stream());

        let evicting = window.history.len() >= self.config.num_periods();
        hook.on_period_shift(&PeriodShift {
            stamp: boundary,
            closing: &window.live,
            previous: window.history.front().map(AsRef::as_ref),
            evicting,
        });
        if evicting && let Some(oldest) = window.history.pop_back() {
            hook.on_period_evict(&oldest);
            debug!(start = %oldest.start_tstamp(), "Evicted oldest period");
        }

        let nominal_end = window
            .live
            .start_tstamp()
            .saturating_add(self.config.period());
        window.live.set_end_tstamp(nominal_end.min(boundary));
        window.live.mark_read_only();
        let closed = std::mem::replace(&mut window.live, Arc::new(fresh));
        debug!(
            closed_start = %closed.start_tstamp(),
            events = closed.num_events(),
            next_start = %boundary,
            "Period shift"
        );
        window.history.push_front(closed);
        Ok(())
    }

    /// Decide whether the next event receives deep treatment.
    #[must_use]
    pub fn sample_deep(&self) -> bool {
        let rate = self.config.deep_sample_rate();
        rate >= MAX_DEEP_SAMPLE_RATE || rand::thread_rng().gen_range(1..=MAX_DEEP_SAMPLE_RATE) <= rate
    }

    /// Count one event at `stamp` and apply `update` to the live bucket,
    /// rotating first if `stamp` crossed the period boundary. `update`
    /// receives whether the event was deep-sampled.
    ///
    /// # Errors
    ///
    /// Returns an error if rotation fails or the live bucket rejects the
    /// write.
    pub fn record<H, R>(
        &self,
        stamp: Timestamp,
        hook: &mut H,
        update: impl FnOnce(&mut S, bool) -> R,
    ) -> Result<R, MetricsError>
    where
        H: PeriodShiftHook<S>,
    {
        self.check_period_shift(stamp, hook)?;
        let deep = self.sample_deep();
        let window = self.window.read();
        window.live.new_event(stamp, deep)?;
        window.live.process(|state| update(state, deep))
    }

    /// Merge the `periods` most recent completed buckets, plus the live
    /// bucket when `include_live` is set, into a new read-only bucket.
    /// Asking for more periods than retained merges what is available.
    ///
    /// # Errors
    ///
    /// Returns an error if a merge reports a configuration mismatch.
    pub fn merged(
        &self,
        periods: usize,
        include_live: bool,
        op: Aggregate,
    ) -> Result<MetricsBucket<S>, MetricsError> {
        // Oldest first so point-in-time fields end on the newest value.
        let buckets: Vec<Arc<MetricsBucket<S>>> = {
            let window = self.window.read();
            let mut selected: Vec<_> = window.history.iter().take(periods).rev().cloned().collect();
            if include_live {
                selected.push(Arc::clone(&window.live));
            }
            selected
        };
        let start = buckets
            .first()
            .map_or(Timestamp::EPOCH, |bucket| bucket.start_tstamp());
        let scratch = MetricsBucket::new(&self.bucket_config, start)?;
        scratch.set_recorded_stream(self.is_recorded_stream());
        for bucket in &buckets {
            scratch.specialized_merge(bucket, op)?;
        }
        scratch.mark_read_only();
        Ok(scratch)
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// `start + periods * period`, computed in nanoseconds so long gaps over
/// short periods stay aligned to the period grid.
fn advance(start: Timestamp, period: Duration, periods: u128) -> Timestamp {
    let offset = period.as_nanos().saturating_mul(periods);
    let secs = offset
        .checked_div(NANOS_PER_SEC)
        .and_then(|secs| u64::try_from(secs).ok());
    let nanos = offset
        .checked_rem(NANOS_PER_SEC)
        .and_then(|nanos| u32::try_from(nanos).ok());
    match (secs, nanos) {
        (Some(secs), Some(nanos)) => start.saturating_add(Duration::new(secs, nanos)),
        _ => start.saturating_add(Duration::MAX),
    }
}
