use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use flowpilot_core::config::PollerConfig;
use flowpilot_core::traits::ExecutionService;
use flowpilot_core::{LogEntry, LogStatus};

use crate::reveal::{spawn_reveal, RevealItem, RevealTiming};
use crate::state::SharedState;

/// Discovers results produced outside a user run (schedules, webhooks) and
/// folds them into the result map and the log.
pub struct StatusPoller {
    state: SharedState,
    service: Arc<dyn ExecutionService>,
    config: PollerConfig,
    highlight: Duration,
}

impl StatusPoller {
    pub fn new(
        state: SharedState,
        service: Arc<dyn ExecutionService>,
        config: PollerConfig,
        highlight: Duration,
    ) -> Self {
        Self {
            state,
            service,
            config,
            highlight,
        }
    }

    fn ready(&self) -> bool {
        self.state.read(|s| s.poll_ready())
    }

    /// One poll. Returns how many newly discovered results were merged.
    ///
    /// Does nothing unless the service is online, a schedule exists, no run is
    /// active and no reveal batch is still surfacing. Fetch failures are
    /// swallowed; the next tick retries.
    pub async fn tick(&self) -> usize {
        if !self.ready() {
            return 0;
        }
        let node_ids = self.state.read(|s| s.graph.node_ids());
        if node_ids.is_empty() {
            return 0;
        }

        let response = match self.service.node_status(node_ids).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Node status poll failed");
                return 0;
            }
        };
        // A run may have started while the request was in flight.
        if !self.ready() {
            debug!("Poll result discarded, editor became busy");
            return 0;
        }

        let (fresh, labels, epoch) = self.state.read(|s| {
            let fresh: Vec<(String, serde_json::Value)> = response
                .into_results()
                .into_iter()
                .filter(|(id, result)| s.results.get(id) != Some(result))
                .collect();
            let labels: Vec<String> = fresh
                .iter()
                .map(|(id, _)| {
                    s.graph
                        .node(id)
                        .map_or_else(|| "Node".to_string(), |n| n.label.clone())
                })
                .collect();
            (fresh, labels, s.epoch())
        });
        if fresh.is_empty() {
            return 0;
        }

        let count = fresh.len();
        self.state.merge_results(fresh.clone());
        let items = fresh
            .into_iter()
            .zip(labels)
            .map(|((node_id, result), label)| {
                let entry = LogEntry::new(
                    &node_id,
                    LogStatus::Success,
                    format!("{} executed by timer", label),
                )
                .with_payload(result);
                RevealItem::new(entry, true)
            })
            .collect();
        spawn_reveal(
            &self.state,
            epoch,
            items,
            RevealTiming::new(self.config.stagger(), self.highlight),
        );
        info!(count, "Discovered results from background executions");
        count
    }

    /// Poll on a fixed cadence until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_ms = self.config.interval_ms, "Status poller started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval()) => {}
                _ = cancel.cancelled() => break,
            }
            tokio::select! {
                _ = self.tick() => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!("Status poller shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::{EventBus, FlowError, RunState, ServiceStatus, TimerStatus};
    use flowpilot_graph::WorkflowGraph;
    use flowpilot_test_utils::fixtures::{self, status_response};
    use flowpilot_test_utils::{Call, MockService};
    use serde_json::json;

    fn setup(mock: MockService) -> (Arc<MockService>, SharedState, StatusPoller) {
        let mock = Arc::new(mock);
        let state = SharedState::new(Arc::new(EventBus::default()));
        state.set_service_status(ServiceStatus::Online);
        state.replace_timers(vec![fixtures::timer_record("tm", "T", TimerStatus::Active)]);
        state.update(|s| {
            s.graph = WorkflowGraph::from_workflow(&fixtures::linear_workflow()).unwrap()
        });
        let poller = StatusPoller::new(
            state.clone(),
            mock.clone(),
            PollerConfig::default(),
            Duration::from_millis(1000),
        );
        (mock, state, poller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_result_is_revealed_once() {
        let (mock, state, poller) = setup(MockService::new());
        mock.push_node_status(Ok(status_response(&[("n3", json!({"x": 1}))])));

        assert_eq!(poller.tick().await, 1);
        assert_eq!(state.results()["n3"], json!({"x": 1}));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let logs = state.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].node_id, "n3");
        assert_eq!(logs[0].message, "Store executed by timer");
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].payload, Some(json!({"x": 1})));
        assert_eq!(state.active_node().as_deref(), Some("n3"));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(state.active_node(), None);

        let polled = mock
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::NodeStatus(ids) => Some(ids),
                _ => None,
            })
            .unwrap();
        assert_eq!(polled.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_results_are_not_revealed_again() {
        let (mock, state, poller) = setup(MockService::new());
        mock.push_node_status(Ok(status_response(&[("n1", json!("a"))])));
        mock.push_node_status(Ok(status_response(&[("n1", json!("a")), ("n2", json!("b"))])));
        mock.push_node_status(Ok(status_response(&[("n1", json!("changed"))])));

        assert_eq!(poller.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(poller.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(poller.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let nodes: Vec<String> = state.logs().into_iter().map(|l| l.node_id).collect();
        assert_eq!(nodes, vec!["n1", "n2", "n1"]);
        assert_eq!(state.results()["n1"], "changed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_is_staggered_by_discovery_order() {
        let (mock, state, poller) = setup(MockService::new());
        mock.push_node_status(Ok(status_response(&[
            ("n2", json!(2)),
            ("n1", json!(1)),
        ])));

        assert_eq!(poller.tick().await, 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(state.logs().len(), 1);
        assert_eq!(state.logs()[0].node_id, "n1");

        // Gate stays closed while the batch surfaces.
        assert_eq!(poller.tick().await, 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(state.logs().len(), 2);
        assert_eq!(state.logs()[1].node_id, "n2");
        assert_eq!(mock.count(|c| matches!(c, Call::NodeStatus(_))), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_silent() {
        let (mock, state, poller) = setup(MockService::new());
        mock.push_node_status(Err(FlowError::Http("timeout".into())));

        assert_eq!(poller.tick().await, 0);
        assert!(state.logs().is_empty());
        assert!(state.results().is_empty());
    }

    #[tokio::test]
    async fn test_gate_conditions() {
        let (mock, state, poller) = setup(MockService::new());

        state.set_run_state(RunState::Running);
        assert_eq!(poller.tick().await, 0);
        state.set_run_state(RunState::Idle);

        state.replace_timers(Vec::new());
        assert_eq!(poller.tick().await, 0);
        state.replace_timers(vec![fixtures::timer_record("tm", "T", TimerStatus::Active)]);

        state.set_service_status(ServiceStatus::Offline);
        assert_eq!(poller.tick().await, 0);

        assert_eq!(mock.count(|c| matches!(c, Call::NodeStatus(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_merges_during_active_run() {
        use crate::orchestrator::Orchestrator;
        use crate::session::Session;
        use crate::timers::TimerRegistry;

        let mock = MockService::new()
            .with_latency(Duration::from_secs(5))
            .with_workflow("wf-1", fixtures::linear_workflow())
            .with_timers(vec![fixtures::timer_record("tm", "T", TimerStatus::Active)]);
        let (mock, state, poller) = setup(mock);
        state.update(|s| s.workflow.id = Some("wf-1".into()));
        mock.push_node_status(Ok(status_response(&[("n3", json!({"x": 1}))])));

        let timing = RevealTiming::new(Duration::from_millis(500), Duration::from_millis(1000));
        let timers = TimerRegistry::new(state.clone(), mock.clone(), timing, Duration::from_secs(10));
        let session = Session::new(state.clone(), mock.clone(), mock.clone(), timers.clone());
        let orchestrator = Orchestrator::new(state.clone(), mock.clone(), session, timers, timing);

        let run = tokio::spawn(async move { orchestrator.run(None, |_| None).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.run_state(), RunState::Running);

        assert_eq!(poller.tick().await, 0);
        assert!(state.results().is_empty());
        assert!(state.logs().is_empty());

        run.await.unwrap().unwrap();
        assert_eq!(state.run_state(), RunState::Idle);
        assert_eq!(poller.tick().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_cancel() {
        let (mock, _state, poller) = setup(MockService::new());
        let poller = Arc::new(poller);
        let cancel = CancellationToken::new();
        let task = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(9500)).await;
        cancel.cancel();
        task.await.unwrap();
        // t=3s, 6s, 9s
        assert_eq!(mock.count(|c| matches!(c, Call::NodeStatus(_))), 3);
    }
}
