use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::handlers::{HandlerKind, InputKind};

use super::parsers::{parse_duration_arg, parse_positive_usize};
use super::types::{MergeOp, OutputFormat, PositiveUsize};

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Replay decoded events from a JSON-lines file, then print the summary
    Replay(ReplayArgs),
    /// Read decoded events from stdin until EOF or Ctrl-C, then print the summary
    Live(LiveArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    /// Path to the events file (one JSON event per line)
    pub path: PathBuf,

    /// Emit synthetic heartbeats at this interval of event time (supports ms/s/m/h)
    #[arg(long = "heartbeat", value_parser = parse_duration_arg)]
    pub heartbeat: Option<Duration>,
}

#[derive(Debug, Args, Clone)]
pub struct LiveArgs {
    /// Wall-clock heartbeat interval (supports ms/s/m/h)
    #[arg(long = "heartbeat", default_value = "1s", value_parser = parse_duration_arg)]
    pub heartbeat: Duration,
}

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Time-windowed network telemetry aggregation with DNS and ICMP transaction correlation."
)]
pub struct AggregatorArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file (TOML or JSON); defaults to netagg.toml or netagg.json
    #[arg(long = "config", short = 'c', env = "NETAGG_CONFIG", global = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Name of the input the handlers bind to
    #[arg(long = "input-name", global = true)]
    pub input_name: Option<String>,

    /// Kind of the input the handlers bind to
    #[arg(long = "input-kind", value_enum, global = true)]
    pub input_kind: Option<InputKind>,

    /// Handlers to run (comma-separated)
    #[arg(long = "handlers", value_enum, value_delimiter = ',', global = true)]
    pub handlers: Option<Vec<HandlerKind>>,

    /// Completed periods retained behind the live bucket
    #[arg(long = "periods", value_parser = parse_positive_usize, global = true)]
    pub periods: Option<PositiveUsize>,

    /// Length of one period (supports ms/s/m/h)
    #[arg(long = "period", value_parser = parse_duration_arg, global = true)]
    pub period: Option<Duration>,

    /// Percent of events receiving deep treatment (1-100)
    #[arg(
        long = "sample-rate",
        value_parser = clap::value_parser!(u8).range(1..=100),
        global = true
    )]
    pub sample_rate: Option<u8>,

    /// Treat the input as a recorded stream (no live rates)
    #[arg(long = "recorded", global = true)]
    pub recorded: bool,

    /// Cardinality sketch precision for the net handler (4-26)
    #[arg(long = "lg-k", global = true)]
    pub lg_k: Option<u8>,

    /// Entries reported by frequent-item summaries
    #[arg(long = "topn", value_parser = parse_positive_usize, global = true)]
    pub topn: Option<PositiveUsize>,

    /// DNS transaction timeout (supports ms/s/m/h)
    #[arg(long = "dns-ttl", value_parser = parse_duration_arg, global = true)]
    pub dns_ttl: Option<Duration>,

    /// ICMP probe timeout (supports ms/s/m/h)
    #[arg(long = "probe-ttl", value_parser = parse_duration_arg, global = true)]
    pub probe_ttl: Option<Duration>,

    /// Number of most recent completed periods merged into the summary
    #[arg(long = "merge-periods", global = true)]
    pub merge_periods: Option<usize>,

    /// Include the live bucket in the summary
    #[arg(long = "include-live", global = true)]
    pub include_live: bool,

    /// Operator for point-in-time values when merging periods
    #[arg(long = "merge-op", value_enum, global = true)]
    pub merge_op: Option<MergeOp>,

    /// Summary output format
    #[arg(long = "output-format", value_enum, global = true)]
    pub output_format: Option<OutputFormat>,
}
