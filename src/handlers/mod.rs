//! Protocol handlers.
//!
//! A handler binds to one input, counts its events into a
//! [`WindowManager`](crate::window::WindowManager) and owns any transaction
//! correlators it needs. Binding is checked once at construction against
//! the handler's declared [`InputKind`]s; `start` returns a
//! [`Subscription`] that unbinds on stop or drop.
pub mod dns;
mod dns_xact;
mod input;
mod net;
mod netprobe;
mod resources;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::Aggregate;
use crate::error::{HandlerError, MetricsError};
use crate::window::{BucketState, PeriodShiftHook, WindowConfig, WindowManager};

pub use dns_xact::{DnsXactConfig, DnsXactHandler, DnsXactSnapshot, DnsXactState};
pub use input::{
    Direction, DnsEvent, InputEvent, InputEventProxy, InputKind, L3, L4, PacketEvent, ProbeEvent,
    ProbeKind, ResourcesEvent, Subscription,
};
pub use net::{NetConfig, NetHandler, NetSnapshot, NetState};
pub use netprobe::{NetProbeConfig, NetProbeHandler, NetProbeSnapshot, NetProbeState};
pub use resources::{ResourcesHandler, ResourcesSnapshot, ResourcesState};

pub trait StreamHandler: Send + Sync {
    fn name(&self) -> &str;

    fn schema_key(&self) -> &'static str;

    fn running(&self) -> &AtomicBool;

    /// Fold one input event into the handler's window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window rejects the update.
    fn handle_event(&self, event: &InputEvent) -> Result<(), HandlerError>;

    /// Merged view over the most recent periods.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge or serialization fails.
    fn summary(&self, query: &SummaryQuery) -> Result<HandlerSummary, HandlerError>;
}

#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Net,
    #[value(name = "dns_xact")]
    DnsXact,
    #[value(name = "netprobe")]
    #[serde(rename = "netprobe")]
    NetProbe,
    Resources,
}

impl HandlerKind {
    #[must_use]
    pub const fn schema_key(self) -> &'static str {
        match self {
            HandlerKind::Net => "net",
            HandlerKind::DnsXact => "dns_xact",
            HandlerKind::NetProbe => "netprobe",
            HandlerKind::Resources => "resources",
        }
    }

    #[must_use]
    pub const fn supported_inputs(self) -> &'static [InputKind] {
        match self {
            HandlerKind::Net | HandlerKind::Resources => &[
                InputKind::Pcap,
                InputKind::Dnstap,
                InputKind::Mock,
                InputKind::Sflow,
            ],
            HandlerKind::DnsXact => &[InputKind::Pcap, InputKind::Dnstap],
            HandlerKind::NetProbe => &[InputKind::NetProbe],
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema_key())
    }
}

impl FromStr for HandlerKind {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "net" => Ok(HandlerKind::Net),
            "dns_xact" | "dns-xact" => Ok(HandlerKind::DnsXact),
            "netprobe" | "net_probe" => Ok(HandlerKind::NetProbe),
            "resources" => Ok(HandlerKind::Resources),
            other => Err(HandlerError::UnknownHandler {
                name: other.to_owned(),
            }),
        }
    }
}

/// Which periods a summary covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryQuery {
    pub periods: usize,
    pub include_live: bool,
    pub op: Aggregate,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandlerSummary {
    pub handler: String,
    pub schema: &'static str,
    pub periods: usize,
    pub include_live: bool,
    pub bucket: serde_json::Value,
}

/// Per-handler settings resolved from configuration.
#[derive(Debug, Clone, Default)]
pub struct HandlerSettings {
    pub window: WindowConfig,
    pub net: NetConfig,
    pub dns_xact: DnsXactConfig,
    pub netprobe: NetProbeConfig,
}

/// Build a handler of `kind` bound to `input`.
///
/// # Errors
///
/// Returns an error if the handler does not accept the input's kind or its
/// configuration is invalid.
pub fn build_handler(
    kind: HandlerKind,
    input: &InputEventProxy,
    settings: &HandlerSettings,
) -> Result<Arc<dyn StreamHandler>, HandlerError> {
    let name = format!("{}-{}", input.name(), kind);
    let handler: Arc<dyn StreamHandler> = match kind {
        HandlerKind::Net => Arc::new(NetHandler::new(name, input, settings.window, &settings.net)?),
        HandlerKind::DnsXact => Arc::new(DnsXactHandler::new(
            name,
            input,
            settings.window,
            &settings.dns_xact,
        )?),
        HandlerKind::NetProbe => Arc::new(NetProbeHandler::new(
            name,
            input,
            settings.window,
            &settings.netprobe,
        )?),
        HandlerKind::Resources => Arc::new(ResourcesHandler::new(name, input, settings.window)?),
    };
    Ok(handler)
}

/// Subscribe `handler` to `input`'s events.
///
/// # Errors
///
/// Returns [`HandlerError::AlreadyRunning`] if the handler is subscribed
/// already.
pub fn start<H>(handler: &Arc<H>, input: &Arc<InputEventProxy>) -> Result<Subscription, HandlerError>
where
    H: StreamHandler + ?Sized + 'static,
{
    if handler.running().swap(true, Ordering::AcqRel) {
        return Err(HandlerError::AlreadyRunning {
            name: handler.name().to_owned(),
        });
    }
    let events = Arc::downgrade(handler);
    let release = Arc::downgrade(handler);
    let subscription = input.subscribe(
        move |event| {
            let Some(handler) = events.upgrade() else {
                return;
            };
            if let Err(err) = handler.handle_event(event) {
                warn!(handler = %handler.name(), error = %err, "Dropped event");
            }
        },
        move || {
            if let Some(handler) = release.upgrade() {
                handler.running().store(false, Ordering::Release);
                info!(handler = %handler.name(), "Handler stopped");
            }
        },
    );
    info!(handler = %handler.name(), input = %input.name(), kind = %input.kind(), "Handler started");
    Ok(subscription)
}

pub(crate) fn check_binding(
    kind: HandlerKind,
    input: &InputEventProxy,
) -> Result<(), HandlerError> {
    if kind.supported_inputs().contains(&input.kind()) {
        Ok(())
    } else {
        Err(HandlerError::UnsupportedInput {
            handler: kind.schema_key(),
            input: input.name().to_owned(),
            kind: input.kind(),
        })
    }
}

/// Apply the timing events every handler understands. Returns `false` for
/// events carrying data, which the caller handles itself.
pub(crate) fn handle_timing<S, H>(
    window: &WindowManager<S>,
    event: &InputEvent,
    hook: &mut H,
) -> Result<bool, MetricsError>
where
    S: BucketState,
    H: PeriodShiftHook<S>,
{
    match event {
        InputEvent::Heartbeat { stamp } => {
            window.check_period_shift(*stamp, hook)?;
            Ok(true)
        }
        InputEvent::StartTstamp { stamp } => {
            window.set_start_tstamp(*stamp);
            Ok(true)
        }
        InputEvent::EndTstamp { stamp } => {
            window.set_end_tstamp(*stamp);
            Ok(true)
        }
        InputEvent::Packet(_)
        | InputEvent::Dns(_)
        | InputEvent::Probe(_)
        | InputEvent::Resources(_) => Ok(false),
    }
}

pub(crate) fn window_summary<S: BucketState>(
    name: &str,
    schema: &'static str,
    window: &WindowManager<S>,
    query: &SummaryQuery,
) -> Result<HandlerSummary, HandlerError> {
    let merged = window
        .merged(query.periods, query.include_live, query.op)
        .map_err(|source| process_error(name, source))?;
    let bucket = serde_json::to_value(merged.snapshot()).map_err(|source| HandlerError::Summary {
        name: name.to_owned(),
        source,
    })?;
    Ok(HandlerSummary {
        handler: name.to_owned(),
        schema,
        periods: query.periods.min(window.current_periods()),
        include_live: query.include_live,
        bucket,
    })
}

pub(crate) fn process_error(name: &str, source: MetricsError) -> HandlerError {
    HandlerError::Process {
        name: name.to_owned(),
        source,
    }
}
