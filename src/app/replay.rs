use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::error::AppResult;
use crate::handlers::InputEvent;
use crate::time::Timestamp;

use super::{Pipeline, StreamStats, decode_line};

// Heartbeats emitted for one event before the clock resynchronises on it.
const MAX_HEARTBEATS_PER_EVENT: usize = 1_024;

/// Synthetic heartbeats at a fixed interval of event time.
#[derive(Debug, Clone, Copy)]
struct HeartbeatClock {
    interval: Duration,
    next: Option<Timestamp>,
}

impl HeartbeatClock {
    const fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// Heartbeat stamps that fall at or before `stamp`, oldest first.
    fn due(&mut self, stamp: Timestamp) -> Vec<Timestamp> {
        let Some(mut next) = self.next else {
            self.next = Some(stamp.saturating_add(self.interval));
            return Vec::new();
        };
        let mut beats = Vec::new();
        while next <= stamp && beats.len() < MAX_HEARTBEATS_PER_EVENT {
            beats.push(next);
            next = next.saturating_add(self.interval);
        }
        if next <= stamp {
            next = stamp.saturating_add(self.interval);
        }
        self.next = Some(next);
        beats
    }
}

/// Replays a JSON-lines events file through `pipeline`.
///
/// # Errors
///
/// Returns an error when the file cannot be opened or read.
pub async fn replay_file(
    path: &Path,
    pipeline: &Pipeline,
    heartbeat: Option<Duration>,
) -> AppResult<StreamStats> {
    let file = tokio::fs::File::open(path).await?;
    info!(path = %path.display(), "Replaying events");
    replay_reader(BufReader::new(file), pipeline, heartbeat).await
}

/// Replays JSON-lines events from `reader`. The first event anchors the
/// windows and the latest stamp seen closes them.
///
/// # Errors
///
/// Returns an error when reading fails. Malformed lines are skipped.
pub async fn replay_reader<R>(
    reader: R,
    pipeline: &Pipeline,
    heartbeat: Option<Duration>,
) -> AppResult<StreamStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = StreamStats::default();
    let mut clock = heartbeat.map(HeartbeatClock::new);

    while let Some(line) = lines.next_line().await? {
        let Some(event) = decode_line(&line, &mut stats) else {
            continue;
        };
        let stamp = event.stamp();
        if stats.first_stamp.is_none() && !matches!(event, InputEvent::StartTstamp { .. }) {
            pipeline.dispatch(&InputEvent::StartTstamp { stamp });
        }
        if let Some(clock) = clock.as_mut() {
            for beat in clock.due(stamp) {
                pipeline.dispatch(&InputEvent::Heartbeat { stamp: beat });
                stats.record_heartbeat();
            }
        }
        pipeline.dispatch(&event);
        stats.record_event(stamp);
    }

    if let Some(last) = stats.last_stamp {
        pipeline.dispatch(&InputEvent::EndTstamp { stamp: last });
        debug!(%last, "Replay reached end of stream");
    }
    info!(
        events = stats.events,
        skipped = stats.skipped,
        heartbeats = stats.heartbeats,
        "Replay finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};

    #[test]
    fn heartbeat_clock_starts_on_first_stamp() -> AppResult<()> {
        let mut clock = HeartbeatClock::new(Duration::from_secs(10));
        if !clock.due(Timestamp::from_secs(100)).is_empty() {
            return Err(AppError::metrics("First stamp should only arm the clock"));
        }
        let beats = clock.due(Timestamp::from_secs(125));
        if beats != [Timestamp::from_secs(110), Timestamp::from_secs(120)] {
            return Err(AppError::metrics(format!("Unexpected beats: {:?}", beats)));
        }
        if !clock.due(Timestamp::from_secs(129)).is_empty() {
            return Err(AppError::metrics("No beat is due before 130s"));
        }
        Ok(())
    }

    #[test]
    fn heartbeat_clock_resyncs_after_long_gaps() -> AppResult<()> {
        let mut clock = HeartbeatClock::new(Duration::from_secs(1));
        clock.due(Timestamp::EPOCH);
        let far = Timestamp::from_secs(10_000);
        let beats = clock.due(far);
        if beats.len() != MAX_HEARTBEATS_PER_EVENT {
            return Err(AppError::metrics(format!("Unexpected beat count: {}", beats.len())));
        }
        let next = clock.due(far.saturating_add(Duration::from_secs(1)));
        if next != [far.saturating_add(Duration::from_secs(1))] {
            return Err(AppError::metrics("Clock did not resync on the gap"));
        }
        Ok(())
    }
}
