use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowpilot_core::{
    EditorEvent, EventBus, FlowError, LogEntry, Result, ResultMap, RunState, ServiceStatus,
    TimerRecord, WorkflowRef,
};
use flowpilot_graph::WorkflowGraph;

/// Everything the editor shows, in one place.
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    pub graph: WorkflowGraph,
    pub workflow: WorkflowRef,
    pub logs: Vec<LogEntry>,
    pub results: ResultMap,
    pub timers: Vec<TimerRecord>,
    pub run_state: RunState,
    pub service: ServiceStatus,
    pub active_node: Option<String>,
    /// Bumped on every output reset; reveal batches carry the epoch they
    /// were produced in.
    pub(crate) epoch: u64,
    pub(crate) reveals_in_flight: usize,
    highlight_seq: u64,
    run_seq: u64,
    active_run: Option<(u64, CancellationToken)>,
}

impl EditorState {
    /// The poller may only merge results when the service is up, something
    /// is scheduled, no run is active, and no reveal batch is playing.
    pub fn poll_ready(&self) -> bool {
        self.service == ServiceStatus::Online
            && !self.timers.is_empty()
            && self.run_state == RunState::Idle
            && self.reveals_in_flight == 0
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn reveals_in_flight(&self) -> usize {
        self.reveals_in_flight
    }
}

/// Shared handle to the editor state plus the bus its transitions publish on.
///
/// The lock is never held across an await; every transition is a short
/// read-modify-replace followed by event publication.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<EditorState>>,
    events: Arc<EventBus>,
}

impl SharedState {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EditorState::default())),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn read<R>(&self, f: impl FnOnce(&EditorState) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut EditorState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> EditorState {
        self.lock().clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.read(|s| s.logs.clone())
    }

    pub fn results(&self) -> ResultMap {
        self.read(|s| s.results.clone())
    }

    pub fn run_state(&self) -> RunState {
        self.read(|s| s.run_state)
    }

    pub fn service_status(&self) -> ServiceStatus {
        self.read(|s| s.service)
    }

    pub fn active_node(&self) -> Option<String> {
        self.read(|s| s.active_node.clone())
    }

    pub fn timers(&self) -> Vec<TimerRecord> {
        self.read(|s| s.timers.clone())
    }

    pub fn ensure_online(&self) -> Result<()> {
        match self.service_status() {
            ServiceStatus::Offline => Err(FlowError::ServiceUnavailable(
                "service is offline".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn append_log(&self, entry: LogEntry) {
        self.update(|s| s.logs.push(entry.clone()));
        self.events.publish(EditorEvent::LogAppended(entry));
    }

    /// Append only if no reset happened since `epoch`.
    pub(crate) fn append_log_in(&self, epoch: u64, entry: LogEntry) -> bool {
        let appended = self.update(|s| {
            if s.epoch != epoch {
                return false;
            }
            s.logs.push(entry.clone());
            true
        });
        if appended {
            self.events.publish(EditorEvent::LogAppended(entry));
        }
        appended
    }

    /// Clear logs and results for a new run. Returns the new epoch.
    pub fn reset_output(&self) -> u64 {
        let epoch = self.update(|s| {
            s.logs.clear();
            s.results.clear();
            s.epoch += 1;
            s.epoch
        });
        self.events.publish(EditorEvent::OutputReset);
        epoch
    }

    pub fn replace_results(&self, results: ResultMap) {
        let count = results.len();
        self.update(|s| s.results = results);
        self.events.publish(EditorEvent::ResultsReplaced { count });
    }

    pub fn merge_results(&self, entries: Vec<(String, serde_json::Value)>) {
        if entries.is_empty() {
            return;
        }
        let node_ids: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();
        self.update(|s| s.results.extend(entries));
        self.events.publish(EditorEvent::ResultsMerged { node_ids });
    }

    pub fn set_run_state(&self, run_state: RunState) {
        let changed = self.update(|s| std::mem::replace(&mut s.run_state, run_state) != run_state);
        if changed {
            self.events.publish(EditorEvent::RunStateChanged(run_state));
        }
    }

    /// Highlight a node. Returns a token for [`clear_highlight_if`](Self::clear_highlight_if).
    pub fn highlight(&self, node_id: &str) -> u64 {
        let seq = self.update(|s| {
            s.highlight_seq += 1;
            s.active_node = Some(node_id.to_string());
            s.highlight_seq
        });
        self.events.publish(EditorEvent::NodeHighlighted {
            node_id: node_id.to_string(),
        });
        seq
    }

    /// Clear the highlight unless a newer one replaced it.
    pub fn clear_highlight_if(&self, seq: u64) {
        let cleared = self.update(|s| {
            if s.highlight_seq == seq && s.active_node.is_some() {
                s.active_node = None;
                true
            } else {
                false
            }
        });
        if cleared {
            self.events.publish(EditorEvent::HighlightCleared);
        }
    }

    pub fn clear_highlight(&self) {
        let cleared = self.update(|s| s.active_node.take().is_some());
        if cleared {
            self.events.publish(EditorEvent::HighlightCleared);
        }
    }

    /// Record a probe verdict. Returns whether it changed.
    pub fn set_service_status(&self, status: ServiceStatus) -> bool {
        let changed = self.update(|s| std::mem::replace(&mut s.service, status) != status);
        if changed {
            info!(status = %status, "Service status changed");
            self.events.publish(EditorEvent::ServiceStatusChanged(status));
        }
        changed
    }

    pub fn replace_timers(&self, timers: Vec<TimerRecord>) {
        let count = timers.len();
        self.update(|s| s.timers = timers);
        self.events.publish(EditorEvent::TimersRefreshed { count });
    }

    /// Start a run under a fresh cancellation token, cancelling any previous one.
    pub(crate) fn begin_run(&self) -> (u64, CancellationToken) {
        let (run_id, token) = self.update(|s| {
            if let Some((old_id, old)) = s.active_run.take() {
                warn!(run_id = old_id, "Replacing an active run");
                old.cancel();
            }
            s.run_seq += 1;
            let token = CancellationToken::new();
            s.active_run = Some((s.run_seq, token.clone()));
            (s.run_seq, token)
        });
        self.set_run_state(RunState::Running);
        (run_id, token)
    }

    pub(crate) fn is_current_run(&self, run_id: u64) -> bool {
        self.read(|s| matches!(s.active_run, Some((id, _)) if id == run_id))
    }

    /// Return to idle if `run_id` is still the active run.
    pub(crate) fn finish_run(&self, run_id: u64) -> bool {
        let finished = self.update(|s| match s.active_run {
            Some((id, _)) if id == run_id => {
                s.active_run = None;
                true
            }
            _ => false,
        });
        if finished {
            self.set_run_state(RunState::Idle);
            self.clear_highlight();
        }
        finished
    }

    /// Cancel the active run and record a terminal entry.
    pub(crate) fn stop_run(&self, message: &str) -> Result<()> {
        let token = self.update(|s| {
            if s.run_state != RunState::Running {
                return None;
            }
            s.active_run.take().map(|(_, token)| token)
        });
        let Some(token) = token else {
            return Err(FlowError::NotRunning);
        };

        self.set_run_state(RunState::Stopping);
        token.cancel();
        debug!("Run cancelled");
        self.append_log(LogEntry::system_error(message));
        self.set_run_state(RunState::Idle);
        self.clear_highlight();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::{LogStatus, TimerStatus};
    use flowpilot_test_utils::fixtures;

    fn state() -> SharedState {
        SharedState::new(Arc::new(EventBus::default()))
    }

    #[test]
    fn test_poll_gate() {
        let state = state();
        assert!(!state.read(|s| s.poll_ready()));

        state.set_service_status(ServiceStatus::Online);
        assert!(!state.read(|s| s.poll_ready()));

        state.replace_timers(vec![fixtures::timer_record("tm", "T", TimerStatus::Active)]);
        assert!(state.read(|s| s.poll_ready()));

        state.set_run_state(RunState::Running);
        assert!(!state.read(|s| s.poll_ready()));
        state.set_run_state(RunState::Idle);

        state.update(|s| s.reveals_in_flight = 1);
        assert!(!state.read(|s| s.poll_ready()));
    }

    #[test]
    fn test_stale_epoch_append_is_dropped() {
        let state = state();
        let old = state.reset_output();
        let new = state.reset_output();
        assert!(new > old);

        assert!(!state.append_log_in(old, LogEntry::system_error("stale")));
        assert!(state.append_log_in(new, LogEntry::system_error("fresh")));
        let logs = state.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "fresh");
    }

    #[test]
    fn test_highlight_only_cleared_by_latest() {
        let state = state();
        let first = state.highlight("n1");
        let second = state.highlight("n2");

        state.clear_highlight_if(first);
        assert_eq!(state.active_node().as_deref(), Some("n2"));
        state.clear_highlight_if(second);
        assert_eq!(state.active_node(), None);
    }

    #[test]
    fn test_stop_requires_running() {
        let state = state();
        assert!(matches!(state.stop_run("stopped"), Err(FlowError::NotRunning)));

        let (run_id, token) = state.begin_run();
        state.append_log(LogEntry::new("n1", LogStatus::Success, "done"));
        state.stop_run("stopped").unwrap();

        assert!(token.is_cancelled());
        assert_eq!(state.run_state(), RunState::Idle);
        assert!(!state.is_current_run(run_id));
        assert!(!state.finish_run(run_id));
        let logs = state.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].status, LogStatus::Error);
        assert!(logs[1].is_system());
    }

    #[test]
    fn test_begin_run_replaces_token() {
        let state = state();
        let (first_id, first) = state.begin_run();
        let (second_id, second) = state.begin_run();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!state.finish_run(first_id));
        assert_eq!(state.run_state(), RunState::Running);
        assert!(state.finish_run(second_id));
        assert_eq!(state.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_transitions_publish_events() {
        let state = state();
        let mut rx = state.events().subscribe();

        state.set_service_status(ServiceStatus::Online);
        state.set_service_status(ServiceStatus::Online);
        state.merge_results(vec![("n3".into(), serde_json::json!({"x": 1}))]);

        assert!(matches!(
            rx.recv().await.unwrap(),
            EditorEvent::ServiceStatusChanged(ServiceStatus::Online)
        ));
        match rx.recv().await.unwrap() {
            EditorEvent::ResultsMerged { node_ids } => assert_eq!(node_ids, vec!["n3"]),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
