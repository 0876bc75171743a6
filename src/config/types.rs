use std::time::Duration;

use serde::Deserialize;

use crate::args::{MergeOp, OutputFormat};
use crate::error::ValidationError;
use crate::handlers::InputKind;

use super::parse_duration_value;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub window: Option<WindowSection>,
    pub input: Option<InputSection>,
    pub handlers: Option<Vec<String>>,
    pub summary: Option<SummarySection>,
    pub net: Option<NetSection>,
    pub dns_xact: Option<DnsXactSection>,
    pub netprobe: Option<NetProbeSection>,
    pub resources: Option<ResourcesSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSection {
    pub num_periods: Option<usize>,
    pub period: Option<DurationValue>,
    pub deep_sample_rate: Option<u8>,
    pub recorded_stream: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSection {
    pub name: Option<String>,
    pub kind: Option<InputKind>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummarySection {
    pub periods: Option<usize>,
    pub include_live: Option<bool>,
    pub op: Option<MergeOp>,
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetSection {
    pub cardinality_lg_k: Option<u8>,
    pub topn_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsXactSection {
    pub ttl: Option<DurationValue>,
    pub topn_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetProbeSection {
    pub ttl: Option<DurationValue>,
}

/// The resources handler has no tunables yet; the table is accepted so a
/// config can list every handler it enables.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesSection {}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => {
                if *secs == 0 {
                    Err(ValidationError::DurationZero)
                } else {
                    Ok(Duration::from_secs(*secs))
                }
            }
            DurationValue::Text(value) => parse_duration_value(value),
        }
    }
}
