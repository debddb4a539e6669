//! Staggered presentation of an already-known log batch.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use flowpilot_core::config::ExecutionConfig;
use flowpilot_core::protocol::RemoteLogEntry;
use flowpilot_core::{LogEntry, LogStatus};

use crate::state::SharedState;

/// One entry of a reveal batch.
#[derive(Debug, Clone)]
pub struct RevealItem {
    pub entry: LogEntry,
    /// Pulse the entry's node when it surfaces.
    pub highlight: bool,
}

impl RevealItem {
    pub fn new(entry: LogEntry, highlight: bool) -> Self {
        Self { entry, highlight }
    }

    /// Convert a remote log batch. With `highlight`, entries of real nodes
    /// that are not errors pulse their node.
    pub fn from_remote(logs: Vec<RemoteLogEntry>, highlight: bool) -> Vec<Self> {
        logs.into_iter()
            .map(|log| {
                let entry = log.into_entry();
                let pulse = highlight && !entry.is_system() && entry.status != LogStatus::Error;
                Self::new(entry, pulse)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RevealTiming {
    /// Offset between consecutive entries.
    pub step: Duration,
    /// How long a highlight lasts.
    pub highlight: Duration,
}

impl RevealTiming {
    pub fn new(step: Duration, highlight: Duration) -> Self {
        Self { step, highlight }
    }
}

impl From<&ExecutionConfig> for RevealTiming {
    fn from(config: &ExecutionConfig) -> Self {
        Self::new(config.reveal_step(), config.highlight())
    }
}

/// Handle to a running reveal batch.
#[derive(Debug, Default)]
pub struct RevealHandle(Option<JoinHandle<()>>);

impl RevealHandle {
    /// A handle for an empty batch.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_finished(&self) -> bool {
        self.0.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait until every entry has surfaced or the batch was superseded.
    pub async fn finished(self) {
        if let Some(handle) = self.0 {
            let _ = handle.await;
        }
    }
}

/// Decrements the in-flight counter however the reveal task ends.
struct InFlight(SharedState);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.update(|s| s.reveals_in_flight = s.reveals_in_flight.saturating_sub(1));
    }
}

/// Surface `items` one by one, entry `i` at `i * timing.step` from now.
///
/// The batch belongs to output `epoch`: once the output is reset the rest of
/// the batch is dropped.
pub fn spawn_reveal(
    state: &SharedState,
    epoch: u64,
    items: Vec<RevealItem>,
    timing: RevealTiming,
) -> RevealHandle {
    if items.is_empty() {
        return RevealHandle::none();
    }

    state.update(|s| s.reveals_in_flight += 1);
    let guard = InFlight(state.clone());
    let state = state.clone();
    let start = Instant::now();

    let handle = tokio::spawn(async move {
        let _guard = guard;
        for (i, item) in items.into_iter().enumerate() {
            tokio::time::sleep_until(start + timing.step * i as u32).await;

            let node = item.highlight.then(|| item.entry.node_id.clone());
            if !state.append_log_in(epoch, item.entry) {
                debug!(epoch, dropped_from = i, "Reveal batch superseded");
                return;
            }
            if let Some(node_id) = node {
                let seq = state.highlight(&node_id);
                let state = state.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timing.highlight).await;
                    state.clear_highlight_if(seq);
                });
            }
        }
    });

    RevealHandle(Some(handle))
}
