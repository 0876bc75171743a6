use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::error::AppResult;
use crate::handlers::InputEvent;
use crate::time::Timestamp;

use super::{Pipeline, StreamStats, decode_line};

/// Feeds events from `reader` into `pipeline`, with a wall-clock heartbeat
/// every `heartbeat`, until the reader hits EOF or `shutdown` resolves.
///
/// # Errors
///
/// Returns an error when reading fails. Malformed lines are skipped.
pub async fn run_live<R, F>(
    reader: R,
    pipeline: &Pipeline,
    heartbeat: Duration,
    shutdown: F,
) -> AppResult<StreamStats>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut stats = StreamStats::default();
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if let Some(event) = decode_line(&line, &mut stats) {
                    pipeline.dispatch(&event);
                    stats.record_event(event.stamp());
                }
            }
            _instant = ticker.tick() => {
                pipeline.dispatch(&InputEvent::Heartbeat {
                    stamp: Timestamp::now(),
                });
                stats.record_heartbeat();
            }
            () = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    info!(
        events = stats.events,
        skipped = stats.skipped,
        heartbeats = stats.heartbeats,
        "Live input finished"
    );
    Ok(stats)
}
