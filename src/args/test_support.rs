use clap::Parser;

use crate::error::{AppError, AppResult};

use super::AggregatorArgs;

pub(crate) fn parse_test_args<I, T>(args: I) -> AppResult<AggregatorArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    AggregatorArgs::try_parse_from(args).map_err(AppError::from)
}
