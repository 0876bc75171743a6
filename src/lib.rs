//! Core library for the `netagg` CLI.
//!
//! Network telemetry (packets, DNS messages, ICMP probes, resource samples)
//! is folded into time-windowed metric buckets by protocol handlers. Each
//! bucket carries mergeable aggregators, so any run of recent periods can be
//! combined into a single summary. Request/response pairs are correlated by
//! a generic transaction manager to produce latency distributions.
pub mod aggregate;
pub mod app;
pub mod args;
pub mod config;
pub mod entry;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod time;
pub mod transaction;
pub mod window;
