use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::dns::{qtype_name, rcode_name};
use super::{
    Direction, DnsEvent, HandlerKind, HandlerSummary, InputEvent, InputEventProxy, StreamHandler,
    SummaryQuery, check_binding, handle_timing, process_error, window_summary,
};
use crate::aggregate::{
    Aggregate, Aggregator, Counter, Quantile, QuantileSummary, TopN, TopNEntry,
};
use crate::error::{ConfigError, HandlerError, MetricsError};
use crate::transaction::{Resolution, TransactionManager};
use crate::window::{BucketState, PeriodShift, PeriodShiftHook, WindowConfig, WindowManager};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5);
const DEFAULT_TOPN_COUNT: usize = 10;
const TOPN_TRACKING_FACTOR: usize = 4;
const SLOW_QUANTILE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsXactConfig {
    ttl: Duration,
    topn_count: usize,
}

impl Default for DnsXactConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            topn_count: DEFAULT_TOPN_COUNT,
        }
    }
}

impl DnsXactConfig {
    /// # Errors
    ///
    /// Returns an error when `ttl` or `topn_count` is zero.
    pub fn new(ttl: Duration, topn_count: usize) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::TtlZero);
        }
        if topn_count == 0 {
            return Err(ConfigError::FieldMustBePositive {
                field: "dns_xact.topn_count",
            });
        }
        Ok(Self { ttl, topn_count })
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub const fn topn_count(&self) -> usize {
        self.topn_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct XactKey {
    flow_key: u32,
    id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct XactPayload {
    query_size: u32,
    qname: String,
}

/// Latency p90 of the previous period, per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SlowThresholds {
    in_us: Option<u64>,
    out_us: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DnsXactCounters {
    pub queries: Counter,
    pub responses: Counter,
    pub xacts_total: Counter,
    pub xacts_in: Counter,
    pub xacts_out: Counter,
    pub timed_out: Counter,
    pub no_match: Counter,
    pub superseded: Counter,
}

impl DnsXactCounters {
    fn merge(&mut self, other: &DnsXactCounters) {
        let pairs = [
            (&mut self.queries, other.queries),
            (&mut self.responses, other.responses),
            (&mut self.xacts_total, other.xacts_total),
            (&mut self.xacts_in, other.xacts_in),
            (&mut self.xacts_out, other.xacts_out),
            (&mut self.timed_out, other.timed_out),
            (&mut self.no_match, other.no_match),
            (&mut self.superseded, other.superseded),
        ];
        for (mine, theirs) in pairs {
            mine.merge_with(&theirs, Aggregate::Sum);
        }
    }
}

/// DNS transaction statistics for one period. Latencies are microseconds;
/// "in" transactions are answered by the host, "out" ones are asked by it.
#[derive(Debug)]
pub struct DnsXactState {
    counters: DnsXactCounters,
    xact_in_us: Quantile,
    xact_out_us: Quantile,
    slow_in: TopN<String>,
    slow_out: TopN<String>,
    size_ratio_percent: Quantile,
    qtypes: TopN<String>,
    rcodes: TopN<String>,
    topn_count: usize,
}

#[derive(Debug, Serialize)]
pub struct DnsXactSnapshot {
    #[serde(flatten)]
    pub counters: DnsXactCounters,
    pub xact_in_us: QuantileSummary,
    pub xact_out_us: QuantileSummary,
    pub top_slow_in: Vec<TopNEntry<String>>,
    pub top_slow_out: Vec<TopNEntry<String>>,
    pub size_ratio_percent: QuantileSummary,
    pub top_qtype: Vec<TopNEntry<String>>,
    pub top_rcode: Vec<TopNEntry<String>>,
}

impl DnsXactState {
    #[must_use]
    pub const fn counters(&self) -> &DnsXactCounters {
        &self.counters
    }

    #[must_use]
    pub const fn xact_in_us(&self) -> &Quantile {
        &self.xact_in_us
    }

    #[must_use]
    pub const fn xact_out_us(&self) -> &Quantile {
        &self.xact_out_us
    }

    #[must_use]
    pub fn top_slow(&self) -> (Vec<TopNEntry<String>>, Vec<TopNEntry<String>>) {
        (
            self.slow_in.top(self.topn_count),
            self.slow_out.top(self.topn_count),
        )
    }

    fn process_query(&mut self, query: &DnsEvent, superseded: bool, deep: bool) {
        self.counters.queries.inc();
        if superseded {
            self.counters.superseded.inc();
        }
        if deep {
            self.qtypes.update_weighted(qtype_name(query.qtype).into_owned(), 1);
        }
    }

    fn process_response(
        &mut self,
        response: &DnsEvent,
        resolution: Resolution<XactPayload>,
        slow: SlowThresholds,
        deep: bool,
    ) {
        self.counters.responses.inc();
        if deep {
            self.rcodes.update_weighted(rcode_name(response.rcode).into_owned(), 1);
        }
        let xact = match resolution {
            Resolution::Valid(xact) => xact,
            Resolution::TimedOut(_) => {
                self.counters.timed_out.inc();
                return;
            }
            Resolution::NotFound => {
                self.counters.no_match.inc();
                return;
            }
        };
        self.counters.xacts_total.inc();
        let micros = u64::try_from(xact.elapsed.as_micros()).unwrap_or(u64::MAX);
        let (timing, slow_names, threshold) = match response.direction {
            // A response arriving at the host answers a query the host sent.
            Direction::ToHost => {
                self.counters.xacts_out.inc();
                (&mut self.xact_out_us, &mut self.slow_out, slow.out_us)
            }
            Direction::FromHost => {
                self.counters.xacts_in.inc();
                (&mut self.xact_in_us, &mut self.slow_in, slow.in_us)
            }
            Direction::Unknown => return,
        };
        if !deep {
            return;
        }
        timing.record(micros);
        if threshold.is_some_and(|p90| micros > p90) {
            slow_names.update_weighted(xact.payload.qname, 1);
        }
        if let Some(percent) = u64::from(response.size)
            .saturating_mul(100)
            .checked_div(u64::from(xact.payload.query_size))
        {
            self.size_ratio_percent.record(percent);
        }
    }
}

impl BucketState for DnsXactState {
    type Config = DnsXactConfig;
    type Snapshot = DnsXactSnapshot;

    fn new(config: &DnsXactConfig) -> Result<Self, MetricsError> {
        let tracked = config.topn_count.saturating_mul(TOPN_TRACKING_FACTOR);
        Ok(Self {
            counters: DnsXactCounters::default(),
            xact_in_us: Quantile::new()?,
            xact_out_us: Quantile::new()?,
            slow_in: TopN::new(tracked),
            slow_out: TopN::new(tracked),
            size_ratio_percent: Quantile::new()?,
            qtypes: TopN::new(tracked),
            rcodes: TopN::new(tracked),
            topn_count: config.topn_count,
        })
    }

    fn specialized_merge(&mut self, other: &Self, _op: Aggregate) -> Result<(), MetricsError> {
        self.counters.merge(&other.counters);
        self.xact_in_us.merge(&other.xact_in_us)?;
        self.xact_out_us.merge(&other.xact_out_us)?;
        self.slow_in.merge(&other.slow_in)?;
        self.slow_out.merge(&other.slow_out)?;
        self.size_ratio_percent.merge(&other.size_ratio_percent)?;
        self.qtypes.merge(&other.qtypes)?;
        self.rcodes.merge(&other.rcodes)?;
        Ok(())
    }

    fn snapshot(&self, _live_rates: bool) -> DnsXactSnapshot {
        let (top_slow_in, top_slow_out) = self.top_slow();
        DnsXactSnapshot {
            counters: self.counters,
            xact_in_us: self.xact_in_us.summary(),
            xact_out_us: self.xact_out_us.summary(),
            top_slow_in,
            top_slow_out,
            size_ratio_percent: self.size_ratio_percent.summary(),
            top_qtype: self.qtypes.top(self.topn_count),
            top_rcode: self.rcodes.top(self.topn_count),
        }
    }
}

type Correlator = TransactionManager<XactKey, XactPayload>;

/// Purges expired queries into the closing period and carries its p90
/// latencies forward as the next period's slow thresholds.
struct XactShiftHook<'handler> {
    xacts: &'handler Mutex<Correlator>,
    slow: &'handler Mutex<SlowThresholds>,
}

impl PeriodShiftHook<DnsXactState> for XactShiftHook<'_> {
    fn on_period_shift(&mut self, shift: &PeriodShift<'_, DnsXactState>) {
        let purged = self.xacts.lock().purge_expired(shift.stamp);
        if purged > 0 {
            let purged = u64::try_from(purged).unwrap_or(u64::MAX);
            if let Err(err) = shift.closing.process(|state| state.counters.timed_out.add(purged)) {
                warn!(error = %err, "Could not account purged transactions");
            }
        }
        let thresholds = shift.closing.read(|state| SlowThresholds {
            in_us: state.xact_in_us.quantile(SLOW_QUANTILE),
            out_us: state.xact_out_us.quantile(SLOW_QUANTILE),
        });
        *self.slow.lock() = thresholds;
        debug!(
            purged,
            slow_in_us = ?thresholds.in_us,
            slow_out_us = ?thresholds.out_us,
            "DNS transaction period shift"
        );
    }
}

/// DNS query/response latency.
pub struct DnsXactHandler {
    name: String,
    window: WindowManager<DnsXactState>,
    xacts: Mutex<Correlator>,
    slow: Mutex<SlowThresholds>,
    running: AtomicBool,
}

impl DnsXactHandler {
    /// # Errors
    ///
    /// Returns an error if `input` carries no DNS traffic or the window
    /// cannot be created.
    pub fn new(
        name: String,
        input: &InputEventProxy,
        window: WindowConfig,
        config: &DnsXactConfig,
    ) -> Result<Self, HandlerError> {
        check_binding(HandlerKind::DnsXact, input)?;
        let xacts = TransactionManager::new(config.ttl).map_err(|source| HandlerError::Config {
            name: name.clone(),
            source,
        })?;
        let window =
            WindowManager::new(window, *config).map_err(|source| process_error(&name, source))?;
        Ok(Self {
            name,
            window,
            xacts: Mutex::new(xacts),
            slow: Mutex::new(SlowThresholds::default()),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn window(&self) -> &WindowManager<DnsXactState> {
        &self.window
    }

    /// Queries still waiting for a response.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.xacts.lock().open_count()
    }

    const fn hook(&self) -> XactShiftHook<'_> {
        XactShiftHook {
            xacts: &self.xacts,
            slow: &self.slow,
        }
    }

    fn process(&self, event: &InputEvent) -> Result<(), MetricsError> {
        let mut hook = self.hook();
        if handle_timing(&self.window, event, &mut hook)? {
            return Ok(());
        }
        let InputEvent::Dns(dns) = event else {
            return Ok(());
        };
        // Rotate first so the purge runs before this event is correlated.
        self.window.check_period_shift(dns.stamp, &mut hook)?;
        let key = XactKey {
            flow_key: dns.flow_key,
            id: dns.id,
        };
        if !dns.response {
            let payload = XactPayload {
                query_size: dns.size,
                qname: dns.qname.clone(),
            };
            let superseded = self.xacts.lock().start_transaction(key, payload, dns.stamp);
            return self.window.record(dns.stamp, &mut hook, |state, deep| {
                state.process_query(dns, superseded, deep);
            });
        }
        let resolution = self.xacts.lock().maybe_end_transaction(&key, dns.stamp);
        let slow = *self.slow.lock();
        self.window.record(dns.stamp, &mut hook, |state, deep| {
            state.process_response(dns, resolution, slow, deep);
        })
    }
}

impl StreamHandler for DnsXactHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema_key(&self) -> &'static str {
        HandlerKind::DnsXact.schema_key()
    }

    fn running(&self) -> &AtomicBool {
        &self.running
    }

    fn handle_event(&self, event: &InputEvent) -> Result<(), HandlerError> {
        self.process(event)
            .map_err(|source| process_error(&self.name, source))
    }

    fn summary(&self, query: &SummaryQuery) -> Result<HandlerSummary, HandlerError> {
        window_summary(&self.name, self.schema_key(), &self.window, query)
    }
}
