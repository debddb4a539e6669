use std::sync::Arc;

use tracing::{info, warn};

use flowpilot_core::protocol::WorkflowBody;
use flowpilot_core::traits::{ExecutionService, WorkflowStore};
use flowpilot_core::{EditorEvent, Result, WorkflowRef, WorkflowSummary};
use flowpilot_graph::WorkflowGraph;

use crate::state::SharedState;
use crate::timers::TimerRegistry;

/// Name offered when a brand-new workflow is first saved.
pub const NAME_SUGGESTION: &str = "My workflow";

/// Persistence of the open workflow through the workflow store.
#[derive(Clone)]
pub struct Session {
    state: SharedState,
    store: Arc<dyn WorkflowStore>,
    service: Arc<dyn ExecutionService>,
    timers: TimerRegistry,
}

impl Session {
    pub fn new(
        state: SharedState,
        store: Arc<dyn WorkflowStore>,
        service: Arc<dyn ExecutionService>,
        timers: TimerRegistry,
    ) -> Self {
        Self {
            state,
            store,
            service,
            timers,
        }
    }

    /// Persist the current graph and return its durable id.
    ///
    /// A workflow without an id is created under a name obtained from
    /// `namer`; `None` (or a blank name) aborts with no state change and
    /// yields `Ok(None)`. Timer nodes are registered with the scheduler
    /// afterwards; a failure there is only logged.
    pub async fn save<N>(&self, namer: N) -> Result<Option<String>>
    where
        N: FnOnce(&str) -> Option<String> + Send,
    {
        self.state.ensure_online()?;
        let (current, body, timer_nodes) = self.state.read(|s| {
            let body = WorkflowBody {
                name: None,
                nodes: s.graph.nodes().to_vec(),
                connections: s.graph.sanitized_connections(),
            };
            let timer_nodes: Vec<_> = s.graph.scheduling_nodes().cloned().collect();
            (s.workflow.clone(), body, timer_nodes)
        });

        let workflow_id = match current.id {
            Some(id) => {
                self.store.update_workflow(&id, body).await?;
                info!(workflow_id = %id, "Workflow updated");
                id
            }
            None => {
                let Some(name) = namer(NAME_SUGGESTION)
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                else {
                    info!("Save cancelled, workflow left unnamed");
                    return Ok(None);
                };
                let id = self.store.create_workflow(&name, body).await?;
                info!(workflow_id = %id, name = %name, "Workflow created");
                self.state.update(|s| {
                    s.workflow = WorkflowRef {
                        id: Some(id.clone()),
                        name,
                    }
                });
                id
            }
        };
        self.state.events().publish(EditorEvent::WorkflowSaved {
            workflow_id: workflow_id.clone(),
        });

        if !timer_nodes.is_empty() {
            for node in timer_nodes {
                let node_id = node.id.clone();
                if let Err(e) = self.service.setup_timer(node, &workflow_id).await {
                    warn!(node_id = %node_id, error = %e, "Timer setup failed");
                }
            }
            if let Err(e) = self.timers.refresh().await {
                warn!(error = %e, "Timer refresh after save failed");
            }
        }

        Ok(Some(workflow_id))
    }

    /// Open a stored workflow, replacing the canvas.
    pub async fn load(&self, id: &str) -> Result<()> {
        let workflow = self.store.get_workflow(id).await?;
        let graph = WorkflowGraph::from_workflow(&workflow)?;
        info!(workflow_id = %id, nodes = graph.nodes().len(), "Workflow loaded");

        self.state.update(|s| {
            s.graph = graph;
            s.workflow = WorkflowRef {
                id: Some(id.to_string()),
                name: workflow.name,
            };
        });
        self.state.reset_output();
        Ok(())
    }

    /// Empty canvas, unsaved.
    pub fn new_workflow(&self) {
        self.state.update(|s| {
            s.graph.clear();
            s.workflow = WorkflowRef::default();
        });
        self.state.reset_output();
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        self.store.list_workflows().await
    }

    /// Delete a stored workflow; deleting the open one also clears the canvas.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete_workflow(id).await?;
        let was_open = self.state.read(|s| s.workflow.id.as_deref() == Some(id));
        if was_open {
            self.new_workflow();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use flowpilot_core::{EventBus, FlowError, ServiceStatus};
    use flowpilot_test_utils::{fixtures, Call, MockService};

    use crate::reveal::RevealTiming;

    fn setup(mock: MockService) -> (Arc<MockService>, SharedState, Session) {
        let mock = Arc::new(mock);
        let state = SharedState::new(Arc::new(EventBus::default()));
        state.set_service_status(ServiceStatus::Online);
        let timers = TimerRegistry::new(
            state.clone(),
            mock.clone(),
            RevealTiming::new(Duration::from_millis(500), Duration::from_secs(1)),
            Duration::from_secs(10),
        );
        let session = Session::new(state.clone(), mock.clone(), mock.clone(), timers);
        (mock, state, session)
    }

    fn open(state: &SharedState, workflow: flowpilot_core::Workflow) {
        state.update(|s| s.graph = WorkflowGraph::from_workflow(&workflow).unwrap());
    }

    #[tokio::test]
    async fn test_first_save_asks_for_name() {
        let (mock, state, session) = setup(MockService::new());
        open(&state, fixtures::branching_workflow());

        let mut offered = String::new();
        let id = session
            .save(|suggestion| {
                offered = suggestion.to_string();
                Some("Support triage".into())
            })
            .await
            .unwrap();

        assert_eq!(offered, NAME_SUGGESTION);
        assert_eq!(id.as_deref(), Some("wf-1"));
        let current = state.read(|s| s.workflow.clone());
        assert_eq!(current.id.as_deref(), Some("wf-1"));
        assert_eq!(current.name, "Support triage");
        assert_eq!(mock.workflow("wf-1").unwrap().nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_declined_name_changes_nothing() {
        let (mock, state, session) = setup(MockService::new());
        open(&state, fixtures::branching_workflow());

        assert_eq!(session.save(|_| None).await.unwrap(), None);
        assert_eq!(session.save(|_| Some("   ".into())).await.unwrap(), None);
        assert_eq!(state.read(|s| s.workflow.id.clone()), None);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_workflow_is_updated_with_sanitized_edges() {
        let (mock, state, session) =
            setup(MockService::new().with_workflow("wf-9", fixtures::branching_workflow()));
        session.load("wf-9").await.unwrap();
        state.update(|s| {
            let conn = flowpilot_core::Connection::new("A", "C", None);
            let mut workflow = s.graph.to_workflow("x");
            workflow.connections.push(conn);
            s.graph = WorkflowGraph::from_workflow(&workflow).unwrap();
        });

        let id = session.save(|_| panic!("no name needed")).await.unwrap();
        assert_eq!(id.as_deref(), Some("wf-9"));

        let body = mock
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::UpdateWorkflow { body, .. } => Some(body),
                _ => None,
            })
            .unwrap();
        assert!(body.name.is_none());
        assert!(body.connections.iter().all(|c| c.has_label()));
    }

    #[tokio::test]
    async fn test_timer_nodes_are_registered() {
        let (mock, state, session) = setup(MockService::new());
        open(&state, fixtures::timer_workflow());

        session.save(|_| Some("Every five".into())).await.unwrap();
        assert_eq!(
            mock.count(|c| matches!(c, Call::SetupTimer { node_id, workflow_id } if node_id == "T" && workflow_id == "wf-1")),
            1
        );
        assert_eq!(state.timers().len(), 1);
    }

    #[tokio::test]
    async fn test_timer_setup_failure_does_not_fail_save() {
        let (mock, state, session) = setup(MockService::new());
        mock.fail_setup_timer(true);
        open(&state, fixtures::timer_workflow());

        let id = session.save(|_| Some("Every five".into())).await.unwrap();
        assert_eq!(id.as_deref(), Some("wf-1"));
        assert!(state.timers().is_empty());
    }

    #[tokio::test]
    async fn test_offline_save_fails_fast() {
        let (mock, state, session) = setup(MockService::new());
        state.set_service_status(ServiceStatus::Offline);
        assert!(matches!(
            session.save(|_| Some("x".into())).await,
            Err(FlowError::ServiceUnavailable(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_new_list_delete() {
        let (_mock, state, session) = setup(
            MockService::new()
                .with_workflow("wf-1", fixtures::branching_workflow())
                .with_workflow("wf-2", fixtures::linear_workflow()),
        );

        let names: Vec<String> = session.list().await.unwrap().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["Branching", "Linear"]);

        session.load("wf-2").await.unwrap();
        assert_eq!(state.read(|s| s.graph.nodes().len()), 3);
        assert_eq!(state.read(|s| s.workflow.name.clone()), "Linear");

        session.delete("wf-1").await.unwrap();
        assert_eq!(state.read(|s| s.workflow.id.clone()).as_deref(), Some("wf-2"));

        session.delete("wf-2").await.unwrap();
        assert!(state.read(|s| s.graph.is_empty()));
        assert_eq!(state.read(|s| s.workflow.clone()), WorkflowRef::default());

        assert!(session.load("wf-2").await.is_err());
    }
}
