use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    HandlerKind, HandlerSummary, InputEvent, InputEventProxy, ProbeEvent, ProbeKind,
    StreamHandler, SummaryQuery, check_binding, handle_timing, process_error, window_summary,
};
use crate::aggregate::{Aggregate, Aggregator, Counter, Quantile, QuantileSummary};
use crate::error::{ConfigError, HandlerError, MetricsError};
use crate::transaction::{Resolution, TransactionManager};
use crate::window::{BucketState, PeriodShift, PeriodShiftHook, WindowConfig, WindowManager};

pub const DEFAULT_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetProbeConfig {
    ttl: Duration,
}

impl Default for NetProbeConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl NetProbeConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::TtlZero`] when `ttl` is zero.
    pub fn new(ttl: Duration) -> Result<Self, ConfigError> {
        if ttl.is_zero() {
            return Err(ConfigError::TtlZero);
        }
        Ok(Self { ttl })
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProbeKey {
    target: String,
    id: u16,
    sequence: u16,
}

#[derive(Debug, Clone)]
struct TargetMetrics {
    attempts: Counter,
    successes: Counter,
    timeouts: Counter,
    no_match: Counter,
    failures: Counter,
    superseded: Counter,
    time_us: Quantile,
}

impl TargetMetrics {
    fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            attempts: Counter::new(),
            successes: Counter::new(),
            timeouts: Counter::new(),
            no_match: Counter::new(),
            failures: Counter::new(),
            superseded: Counter::new(),
            time_us: Quantile::new()?,
        })
    }

    fn merge(&mut self, other: &TargetMetrics) -> Result<(), MetricsError> {
        let pairs = [
            (&mut self.attempts, other.attempts),
            (&mut self.successes, other.successes),
            (&mut self.timeouts, other.timeouts),
            (&mut self.no_match, other.no_match),
            (&mut self.failures, other.failures),
            (&mut self.superseded, other.superseded),
        ];
        for (mine, theirs) in pairs {
            mine.merge_with(&theirs, Aggregate::Sum);
        }
        self.time_us.merge(&other.time_us)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TargetSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub no_match: u64,
    pub failures: u64,
    pub superseded: u64,
    pub time_us: QuantileSummary,
}

/// ICMP echo statistics per probe target for one period.
#[derive(Debug, Default)]
pub struct NetProbeState {
    targets: BTreeMap<String, TargetMetrics>,
}

#[derive(Debug, Serialize)]
pub struct NetProbeSnapshot {
    pub targets: BTreeMap<String, TargetSnapshot>,
}

impl NetProbeState {
    fn target_mut(&mut self, target: &str) -> Result<&mut TargetMetrics, MetricsError> {
        match self.targets.entry(target.to_owned()) {
            Entry::Occupied(existing) => Ok(existing.into_mut()),
            Entry::Vacant(slot) => Ok(slot.insert(TargetMetrics::new()?)),
        }
    }

    #[must_use]
    pub fn target(&self, target: &str) -> Option<TargetSnapshot> {
        self.targets.get(target).map(TargetMetrics::snapshot)
    }

    fn process_probe(
        &mut self,
        probe: &ProbeEvent,
        resolution: Option<Resolution<()>>,
        superseded: bool,
        deep: bool,
    ) -> Result<(), MetricsError> {
        let metrics = self.target_mut(&probe.target)?;
        match probe.kind {
            ProbeKind::EchoRequest => {
                metrics.attempts.inc();
                if superseded {
                    metrics.superseded.inc();
                }
            }
            ProbeKind::Fail => metrics.failures.inc(),
            ProbeKind::EchoReply => match resolution {
                Some(Resolution::Valid(xact)) => {
                    metrics.successes.inc();
                    if deep {
                        let micros = u64::try_from(xact.elapsed.as_micros()).unwrap_or(u64::MAX);
                        metrics.time_us.record(micros);
                    }
                }
                Some(Resolution::TimedOut(_)) => metrics.timeouts.inc(),
                Some(Resolution::NotFound) | None => metrics.no_match.inc(),
            },
        }
        Ok(())
    }
}

impl TargetMetrics {
    fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            attempts: self.attempts.value(),
            successes: self.successes.value(),
            timeouts: self.timeouts.value(),
            no_match: self.no_match.value(),
            failures: self.failures.value(),
            superseded: self.superseded.value(),
            time_us: self.time_us.summary(),
        }
    }
}

impl BucketState for NetProbeState {
    type Config = NetProbeConfig;
    type Snapshot = NetProbeSnapshot;

    fn new(_config: &NetProbeConfig) -> Result<Self, MetricsError> {
        Ok(Self::default())
    }

    fn specialized_merge(&mut self, other: &Self, _op: Aggregate) -> Result<(), MetricsError> {
        for (target, metrics) in &other.targets {
            match self.targets.entry(target.clone()) {
                Entry::Occupied(mut existing) => existing.get_mut().merge(metrics)?,
                Entry::Vacant(slot) => {
                    slot.insert(metrics.clone());
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self, _live_rates: bool) -> NetProbeSnapshot {
        NetProbeSnapshot {
            targets: self
                .targets
                .iter()
                .map(|(target, metrics)| (target.clone(), metrics.snapshot()))
                .collect(),
        }
    }
}

type Correlator = TransactionManager<ProbeKey, ()>;

/// Counts unanswered echo requests as timeouts of their target in the
/// closing period.
struct ProbeShiftHook<'handler> {
    probes: &'handler Mutex<Correlator>,
}

impl PeriodShiftHook<NetProbeState> for ProbeShiftHook<'_> {
    fn on_period_shift(&mut self, shift: &PeriodShift<'_, NetProbeState>) {
        let expired = self.probes.lock().drain_expired(shift.stamp);
        if expired.is_empty() {
            return;
        }
        let count = expired.len();
        let accounted = shift.closing.process(|state| {
            for (key, _) in &expired {
                state.target_mut(&key.target)?.timeouts.inc();
            }
            Ok::<(), MetricsError>(())
        });
        if let Err(err) = accounted.and_then(|inner| inner) {
            warn!(error = %err, "Could not account expired probes");
        }
        debug!(expired = count, "Probe period shift");
    }
}

/// ICMP echo latency per target.
pub struct NetProbeHandler {
    name: String,
    window: WindowManager<NetProbeState>,
    probes: Mutex<Correlator>,
    running: AtomicBool,
}

impl NetProbeHandler {
    /// # Errors
    ///
    /// Returns an error if `input` is not a probe input or the window
    /// cannot be created.
    pub fn new(
        name: String,
        input: &InputEventProxy,
        window: WindowConfig,
        config: &NetProbeConfig,
    ) -> Result<Self, HandlerError> {
        check_binding(HandlerKind::NetProbe, input)?;
        let probes = TransactionManager::new(config.ttl).map_err(|source| HandlerError::Config {
            name: name.clone(),
            source,
        })?;
        let window =
            WindowManager::new(window, *config).map_err(|source| process_error(&name, source))?;
        Ok(Self {
            name,
            window,
            probes: Mutex::new(probes),
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn window(&self) -> &WindowManager<NetProbeState> {
        &self.window
    }

    #[must_use]
    pub fn open_probes(&self) -> usize {
        self.probes.lock().open_count()
    }

    fn process(&self, event: &InputEvent) -> Result<(), MetricsError> {
        let mut hook = ProbeShiftHook {
            probes: &self.probes,
        };
        if handle_timing(&self.window, event, &mut hook)? {
            return Ok(());
        }
        let InputEvent::Probe(probe) = event else {
            return Ok(());
        };
        self.window.check_period_shift(probe.stamp, &mut hook)?;
        let key = ProbeKey {
            target: probe.target.clone(),
            id: probe.id,
            sequence: probe.sequence,
        };
        let (resolution, superseded) = match probe.kind {
            ProbeKind::EchoRequest => {
                let superseded = self.probes.lock().start_transaction(key, (), probe.stamp);
                (None, superseded)
            }
            ProbeKind::EchoReply => {
                let resolution = self.probes.lock().maybe_end_transaction(&key, probe.stamp);
                (Some(resolution), false)
            }
            ProbeKind::Fail => (None, false),
        };
        self.window.record(probe.stamp, &mut hook, |state, deep| {
            state.process_probe(probe, resolution, superseded, deep)
        })?
    }
}

impl StreamHandler for NetProbeHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema_key(&self) -> &'static str {
        HandlerKind::NetProbe.schema_key()
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
