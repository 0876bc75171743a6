use std::sync::atomic::AtomicBool;

use serde::Serialize;

use super::{
    HandlerKind, HandlerSummary, InputEvent, InputEventProxy, ResourcesEvent, StreamHandler,
    SummaryQuery, check_binding, handle_timing, process_error, window_summary,
};
use crate::aggregate::{Aggregate, Aggregator, Gauge, Quantile, QuantileSummary};
use crate::error::{HandlerError, MetricsError};
use crate::window::{BucketState, NoHook, WindowConfig, WindowManager};

/// Agent resource usage for one period.
///
/// CPU and memory readings are distributions. Policy and handler counts
/// describe current state rather than accumulated totals, so they merge
/// with the caller's operator.
#[derive(Debug)]
pub struct ResourcesState {
    cpu_percent: Quantile,
    memory_bytes: Quantile,
    last_memory_bytes: Gauge,
    policy_count: Gauge,
    handler_count: Gauge,
}

#[derive(Debug, Serialize)]
pub struct ResourcesSnapshot {
    pub cpu_percent: QuantileSummary,
    pub memory_bytes: QuantileSummary,
    pub last_memory_bytes: Option<u64>,
    pub policy_count: Option<u64>,
    pub handler_count: Option<u64>,
}

impl ResourcesState {
    #[must_use]
    pub const fn policy_count(&self) -> Option<u64> {
        self.policy_count.value()
    }

    #[must_use]
    pub const fn handler_count(&self) -> Option<u64> {
        self.handler_count.value()
    }

    #[must_use]
    pub const fn last_memory_bytes(&self) -> Option<u64> {
        self.last_memory_bytes.value()
    }

    fn process_sample(&mut self, sample: &ResourcesEvent) {
        self.cpu_percent.record(sample.cpu_percent);
        self.memory_bytes.record(sample.memory_bytes);
        self.last_memory_bytes.set(sample.memory_bytes);
        if let Some(policies) = sample.policy_count {
            self.policy_count.set(policies);
        }
        if let Some(handlers) = sample.handler_count {
            self.handler_count.set(handlers);
        }
    }
}

impl BucketState for ResourcesState {
    type Config = ();
    type Snapshot = ResourcesSnapshot;

    fn new(_config: &()) -> Result<Self, MetricsError> {
        Ok(Self {
            cpu_percent: Quantile::new()?,
            memory_bytes: Quantile::new()?,
            last_memory_bytes: Gauge::default(),
            policy_count: Gauge::default(),
            handler_count: Gauge::default(),
        })
    }

    fn specialized_merge(&mut self, other: &Self, op: Aggregate) -> Result<(), MetricsError> {
        self.cpu_percent.merge(&other.cpu_percent)?;
        self.memory_bytes.merge(&other.memory_bytes)?;
        self.last_memory_bytes.merge(&other.last_memory_bytes)?;
        self.policy_count.merge_with(&other.policy_count, op);
        self.handler_count.merge_with(&other.handler_count, op);
        Ok(())
    }

    fn snapshot(&self, _live_rates: bool) -> ResourcesSnapshot {
        ResourcesSnapshot {
            cpu_percent: self.cpu_percent.summary(),
            memory_bytes: self.memory_bytes.summary(),
            last_memory_bytes: self.last_memory_bytes.value(),
            policy_count: self.policy_count.value(),
            handler_count: self.handler_count.value(),
        }
    }
}

/// Resource usage of the collecting process.
pub struct ResourcesHandler {
    name: String,
    window: WindowManager<ResourcesState>,
    running: AtomicBool,
}

impl ResourcesHandler {
    /// # Errors
    ///
    /// Returns an error if `input` is not supported or the window cannot be
    /// created.
    pub fn new(
        name: String,
        input: &InputEventProxy,
        window: WindowConfig,
    ) -> Result<Self, HandlerError> {
        check_binding(HandlerKind::Resources, input)?;
        let window = WindowManager::new(window, ()).map_err(|source| process_error(&name, source))?;
        Ok(Self {
            name,
            window,
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn window(&self) -> &WindowManager<ResourcesState> {
        &self.window
    }

    fn process(&self, event: &InputEvent) -> Result<(), MetricsError> {
        if handle_timing(&self.window, event, &mut NoHook)? {
            return Ok(());
        }
        let InputEvent::Resources(sample) = event else {
            return Ok(());
        };
        self.window.record(sample.stamp, &mut NoHook, |state, _deep| {
            state.process_sample(sample);
        })
    }
}

impl StreamHandler for ResourcesHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema_key(&self) -> &'static str {
        HandlerKind::Resources.schema_key()
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
