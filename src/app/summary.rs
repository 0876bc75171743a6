use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AppResult;
use crate::handlers::HandlerSummary;
use crate::time::Timestamp;

use super::StreamStats;

#[derive(Debug, Serialize)]
struct SummaryReport<'report> {
    input: &'report StreamStats,
    handlers: &'report [HandlerSummary],
}

/// Pretty JSON document with the stream counters and every handler summary.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn render_json(summaries: &[HandlerSummary], stats: &StreamStats) -> AppResult<String> {
    let report = SummaryReport {
        input: stats,
        handlers: summaries,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Human-readable summary: one `key: value` line per leaf metric.
#[must_use]
pub fn render_text(summaries: &[HandlerSummary], stats: &StreamStats) -> String {
    let mut lines = Vec::new();
    lines.push("Input:".to_owned());
    lines.push(format!("  events: {}", stats.events));
    lines.push(format!("  skipped: {}", stats.skipped));
    lines.push(format!("  heartbeats: {}", stats.heartbeats));
    lines.push(format!("  first: {}", format_opt_stamp(stats.first_stamp)));
    lines.push(format!("  last: {}", format_opt_stamp(stats.last_stamp)));

    for summary in summaries {
        lines.push(String::new());
        lines.push(format!(
            "{} ({}): periods={} include_live={}",
            summary.handler, summary.schema, summary.periods, summary.include_live
        ));
        flatten("", &summary.bucket, &mut lines);
    }
    lines.join("\n")
}

fn flatten(prefix: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(stamp) = as_timestamp(map) {
                lines.push(format!("  {}: {}", prefix, format_stamp(stamp)));
                return;
            }
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, lines);
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                lines.push(format!("  {}: []", prefix));
            }
            for (index, item) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, index), item, lines);
            }
        }
        Value::Null => lines.push(format!("  {}: none", prefix)),
        Value::String(text) => lines.push(format!("  {}: {}", prefix, text)),
        Value::Bool(_) | Value::Number(_) => lines.push(format!("  {}: {}", prefix, value)),
    }
}

// Timestamps serialize as `{ "secs": .., "nanos": .. }`.
fn as_timestamp(map: &Map<String, Value>) -> Option<Timestamp> {
    if map.len() != 2 {
        return None;
    }
    let secs = map.get("secs")?.as_u64()?;
    let nanos = u32::try_from(map.get("nanos")?.as_u64()?).ok()?;
    Some(Timestamp::new(secs, nanos))
}

fn format_opt_stamp(stamp: Option<Timestamp>) -> String {
    stamp.map_or_else(|| "none".to_owned(), format_stamp)
}

fn format_stamp(stamp: Timestamp) -> String {
    i64::try_from(stamp.as_secs())
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, stamp.subsec_nanos()))
        .map_or_else(
            || stamp.to_string(),
            |time| time.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
}
