//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod parsers;
mod types;

#[cfg(test)]
mod test_support;

pub use cli::{AggregatorArgs, Command, LiveArgs, ReplayArgs};
pub use types::{MergeOp, OutputFormat, PositiveUsize};

#[cfg(test)]
pub(crate) use test_support::parse_test_args;
