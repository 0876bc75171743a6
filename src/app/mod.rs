//! Runtime wiring for the binary: one input, the configured handlers, and
//! the event sources that feed them.
pub mod live;
pub mod replay;
pub mod summary;


use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::RunSettings;
use crate::error::AppResult;
use crate::handlers::{
    self, HandlerSummary, InputEvent, InputEventProxy, StreamHandler, Subscription, SummaryQuery,
};
use crate::time::Timestamp;

pub use live::run_live;
pub use replay::{replay_file, replay_reader};
pub use summary::{render_json, render_text};

/// Counters describing one pass over an event source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub lines: u64,
    pub events: u64,
    pub skipped: u64,
    pub heartbeats: u64,
    pub first_stamp: Option<Timestamp>,
    pub last_stamp: Option<Timestamp>,
}

impl StreamStats {
    fn record_event(&mut self, stamp: Timestamp) {
        self.events = self.events.saturating_add(1);
        if self.first_stamp.is_none() {
            self.first_stamp = Some(stamp);
        }
        self.last_stamp = Some(self.last_stamp.map_or(stamp, |last| last.max(stamp)));
    }

    fn record_heartbeat(&mut self) {
        self.heartbeats = self.heartbeats.saturating_add(1);
    }
}

/// An input proxy with its handlers subscribed.
pub struct Pipeline {
    input: Arc<InputEventProxy>,
    handlers: Vec<Arc<dyn StreamHandler>>,
    subscriptions: Vec<Subscription>,
}

impl Pipeline {
    /// Builds and starts every configured handler on a fresh input.
    ///
    /// # Errors
    ///
    /// Returns an error when a handler rejects the input kind.
    pub fn start(settings: &RunSettings) -> AppResult<Self> {
        let input = InputEventProxy::new(settings.input_name.clone(), settings.input_kind);
        let mut running = Vec::with_capacity(settings.handlers.len());
        let mut subscriptions = Vec::with_capacity(settings.handlers.len());
        for kind in &settings.handlers {
            let handler = handlers::build_handler(*kind, &input, &settings.handler_settings)?;
            subscriptions.push(handlers::start(&handler, &input)?);
            running.push(handler);
        }
        Ok(Self {
            input,
            handlers: running,
            subscriptions,
        })
    }

    #[must_use]
    pub fn input(&self) -> &InputEventProxy {
        &self.input
    }

    #[must_use]
    pub fn handlers(&self) -> &[Arc<dyn StreamHandler>] {
        &self.handlers
    }

    pub fn dispatch(&self, event: &InputEvent) {
        self.input.dispatch(event);
    }

    /// Unsubscribes every handler. Their windows stay readable.
    pub fn stop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.stop();
        }
    }

    /// # Errors
    ///
    /// Returns an error when a handler fails to merge or serialize its
    /// window.
    pub fn summaries(&self, query: &SummaryQuery) -> AppResult<Vec<HandlerSummary>> {
        let mut summaries = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            summaries.push(handler.summary(query)?);
        }
        Ok(summaries)
    }
}

/// Decodes one JSON line. Blank lines yield `None` silently; malformed
/// lines are logged and counted.
pub(crate) fn decode_line(line: &str, stats: &mut StreamStats) -> Option<InputEvent> {
    stats.lines = stats.lines.saturating_add(1);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<InputEvent>(trimmed) {
        Ok(event) => Some(event),
        Err(err) => {
            stats.skipped = stats.skipped.saturating_add(1);
            warn!(line = stats.lines, error = %err, "Skipping malformed event");
            None
        }
    }
}
