use std::time::Duration;

use tracing::debug;

use crate::aggregate::LgK;
use crate::args::{AggregatorArgs, Command, MergeOp, OutputFormat, PositiveUsize};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};
use crate::handlers::{
    DnsXactConfig, HandlerKind, HandlerSettings, InputKind, NetConfig, NetProbeConfig,
    SummaryQuery,
};
use crate::window::{DEFAULT_NUM_PERIODS, DEFAULT_PERIOD, MAX_DEEP_SAMPLE_RATE, WindowConfig};

use super::types::{ConfigFile, DurationValue};

const DEFAULT_INPUT_NAME: &str = "default";

/// Everything a run needs once CLI flags and the config file are merged.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub input_name: String,
    pub input_kind: InputKind,
    pub handlers: Vec<HandlerKind>,
    pub handler_settings: HandlerSettings,
    pub query: SummaryQuery,
    pub output_format: OutputFormat,
}

/// Merges CLI flags over config file values over built-in defaults and
/// validates the result.
///
/// # Errors
///
/// Returns an error when a value is out of range, a duration cannot be
/// parsed, a handler name is unknown, or no handler is selected.
pub fn resolve_settings(
    args: &AggregatorArgs,
    config: Option<&ConfigFile>,
) -> AppResult<RunSettings> {
    let window = resolve_window(args, config)?;
    let handler_settings = HandlerSettings {
        window,
        net: resolve_net(args, config)?,
        dns_xact: resolve_dns_xact(args, config)?,
        netprobe: resolve_netprobe(args, config)?,
    };
    let handlers = resolve_handlers(args, config)?;

    let input = config.and_then(|config| config.input.as_ref());
    let input_name = args
        .input_name
        .clone()
        .or_else(|| input.and_then(|input| input.name.clone()))
        .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_owned());
    let input_kind = args
        .input_kind
        .or_else(|| input.and_then(|input| input.kind))
        .unwrap_or(InputKind::Pcap);

    let summary = config.and_then(|config| config.summary.as_ref());
    let periods = args
        .merge_periods
        .or_else(|| summary.and_then(|summary| summary.periods))
        .unwrap_or_else(|| window.num_periods());
    let include_live = args.include_live
        || summary
            .and_then(|summary| summary.include_live)
            .unwrap_or(false);
    let op = args
        .merge_op
        .or_else(|| summary.and_then(|summary| summary.op))
        .unwrap_or(MergeOp::Latest);
    let output_format = args
        .output_format
        .or_else(|| summary.and_then(|summary| summary.format))
        .unwrap_or_default();

    let settings = RunSettings {
        input_name,
        input_kind,
        handlers,
        handler_settings,
        query: SummaryQuery {
            periods,
            include_live,
            op: op.into(),
        },
        output_format,
    };
    debug!(?settings, "Resolved settings");
    Ok(settings)
}

fn resolve_window(args: &AggregatorArgs, config: Option<&ConfigFile>) -> AppResult<WindowConfig> {
    let section = config.and_then(|config| config.window.as_ref());
    let num_periods = match args.periods {
        Some(periods) => periods.get(),
        None => section
            .and_then(|section| section.num_periods)
            .unwrap_or(DEFAULT_NUM_PERIODS),
    };
    let period = match args.period {
        Some(period) => period,
        None => config_duration(
            "window.period",
            section.and_then(|section| section.period.as_ref()),
        )?
        .unwrap_or(DEFAULT_PERIOD),
    };
    let deep_sample_rate = args
        .sample_rate
        .or_else(|| section.and_then(|section| section.deep_sample_rate))
        .unwrap_or(MAX_DEEP_SAMPLE_RATE);
    // Replayed files are recorded by definition.
    let recorded = args.recorded
        || matches!(args.command, Command::Replay(_))
        || section
            .and_then(|section| section.recorded_stream)
            .unwrap_or(false);

    Ok(WindowConfig::new(num_periods, period, deep_sample_rate)?.with_recorded_stream(recorded))
}

fn resolve_net(args: &AggregatorArgs, config: Option<&ConfigFile>) -> AppResult<NetConfig> {
    let section = config.and_then(|config| config.net.as_ref());
    let defaults = NetConfig::default();
    let lg_k = args
        .lg_k
        .or_else(|| section.and_then(|section| section.cardinality_lg_k))
        .unwrap_or_else(|| LgK::default().get());
    let topn_count = args.topn.map(PositiveUsize::get).unwrap_or_else(|| {
        section
            .and_then(|section| section.topn_count)
            .unwrap_or_else(|| defaults.topn_count())
    });
    Ok(NetConfig::new(lg_k, topn_count)?)
}

fn resolve_dns_xact(
    args: &AggregatorArgs,
    config: Option<&ConfigFile>,
) -> AppResult<DnsXactConfig> {
    let section = config.and_then(|config| config.dns_xact.as_ref());
    let defaults = DnsXactConfig::default();
    let ttl = match args.dns_ttl {
        Some(ttl) => ttl,
        None => config_duration("dns_xact.ttl", section.and_then(|section| section.ttl.as_ref()))?
            .unwrap_or_else(|| defaults.ttl()),
    };
    let topn_count = args.topn.map(PositiveUsize::get).unwrap_or_else(|| {
        section
            .and_then(|section| section.topn_count)
            .unwrap_or_else(|| defaults.topn_count())
    });
    Ok(DnsXactConfig::new(ttl, topn_count)?)
}

fn resolve_netprobe(
    args: &AggregatorArgs,
    config: Option<&ConfigFile>,
) -> AppResult<NetProbeConfig> {
    let section = config.and_then(|config| config.netprobe.as_ref());
    let ttl = match args.probe_ttl {
        Some(ttl) => ttl,
        None => config_duration("netprobe.ttl", section.and_then(|section| section.ttl.as_ref()))?
            .unwrap_or_else(|| NetProbeConfig::default().ttl()),
    };
    Ok(NetProbeConfig::new(ttl)?)
}

fn resolve_handlers(
    args: &AggregatorArgs,
    config: Option<&ConfigFile>,
) -> AppResult<Vec<HandlerKind>> {
    let requested = match (&args.handlers, config.and_then(|config| config.handlers.as_ref())) {
        (Some(kinds), _) => kinds.clone(),
        (None, Some(names)) => names
            .iter()
            .map(|name| name.parse::<HandlerKind>())
            .collect::<Result<Vec<_>, _>>()?,
        (None, None) => vec![HandlerKind::Net],
    };

    let mut handlers = Vec::with_capacity(requested.len());
    for kind in requested {
        if !handlers.contains(&kind) {
            handlers.push(kind);
        }
    }
    if handlers.is_empty() {
        return Err(AppError::validation(ValidationError::NoHandlers));
    }
    Ok(handlers)
}

fn config_duration(
    field: &'static str,
    value: Option<&DurationValue>,
) -> AppResult<Option<Duration>> {
    value
        .map(|value| {
            value
                .to_duration()
                .map_err(|source| AppError::config(ConfigError::InvalidDuration { field, source }))
        })
        .transpose()
}
