use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flowpilot_core::traits::{ExecutionService, WorkflowStore};
use flowpilot_core::{
    AppConfig, Connection, EditorEvent, EventBus, Result, ServiceStatus, Workflow, WorkflowRef,
    WorkflowSummary,
};
use flowpilot_graph::{Question, SourceRef, WorkflowGraph};

use crate::health::HealthMonitor;
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::poller::StatusPoller;
use crate::reveal::RevealTiming;
use crate::session::Session;
use crate::state::SharedState;
use crate::task::BackgroundTask;
use crate::timers::TimerRegistry;

/// The editor core: one state container plus the components acting on it.
pub struct Editor {
    config: AppConfig,
    state: SharedState,
    orchestrator: Orchestrator,
    session: Session,
    timers: TimerRegistry,
    health: Arc<HealthMonitor>,
    poller: Arc<StatusPoller>,
    root: CancellationToken,
    background: Mutex<Vec<BackgroundTask>>,
}

impl Editor {
    /// Build an editor over a backend that is both execution service and
    /// workflow store (the HTTP client, or a mock).
    pub fn new<S>(config: AppConfig, backend: Arc<S>) -> Self
    where
        S: ExecutionService + WorkflowStore,
    {
        let service: Arc<dyn ExecutionService> = backend.clone();
        let store: Arc<dyn WorkflowStore> = backend;
        Self::with_parts(config, service, store)
    }

    pub fn with_parts(
        config: AppConfig,
        service: Arc<dyn ExecutionService>,
        store: Arc<dyn WorkflowStore>,
    ) -> Self {
        let state = SharedState::new(Arc::new(EventBus::default()));
        let timing = RevealTiming::from(&config.execution);

        let timers = TimerRegistry::new(
            state.clone(),
            service.clone(),
            timing,
            config.timers.refresh_interval(),
        );
        let session = Session::new(state.clone(), store, service.clone(), timers.clone());
        let orchestrator = Orchestrator::new(
            state.clone(),
            service.clone(),
            session.clone(),
            timers.clone(),
            timing,
        );
        let health = Arc::new(HealthMonitor::new(
            state.clone(),
            service.clone(),
            config.health.clone(),
        ));
        let poller = Arc::new(StatusPoller::new(
            state.clone(),
            service,
            config.poller.clone(),
            timing.highlight,
        ));

        Self {
            config,
            state,
            orchestrator,
            session,
            timers,
            health,
            poller,
            root: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.state.events().subscribe()
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    // ── Graph ───────────────────────────────────────────────────

    /// Read the graph.
    pub fn graph<R>(&self, f: impl FnOnce(&WorkflowGraph) -> R) -> R {
        self.state.read(|s| f(&s.graph))
    }

    /// Mutate the graph. Graph operations validate before touching anything,
    /// so an `Err` from `f` leaves the graph as it was.
    pub fn edit_graph<R>(&self, f: impl FnOnce(&mut WorkflowGraph) -> R) -> R {
        self.state.update(|s| f(&mut s.graph))
    }

    /// Connect two nodes, asking `confirm` when the policy needs an answer.
    ///
    /// The confirmation runs while the editor state is locked, so it must not
    /// call back into the editor.
    pub fn connect_with<F>(&self, source: &SourceRef, target: &str, confirm: F) -> Result<Option<Connection>>
    where
        F: FnMut(&Question) -> bool,
    {
        self.edit_graph(|g| g.connect_with(source, target, confirm))
    }

    /// Replace the canvas with a workflow document, e.g. one read from disk.
    pub fn open_document(&self, workflow: &Workflow, id: Option<String>) -> Result<()> {
        let graph = WorkflowGraph::from_workflow(workflow)?;
        self.state.update(|s| {
            s.graph = graph;
            s.workflow = WorkflowRef {
                id,
                name: workflow.name.clone(),
            };
        });
        self.state.reset_output();
        Ok(())
    }

    /// The current canvas as a stored document.
    pub fn document(&self) -> Workflow {
        self.state.read(|s| s.graph.to_workflow(s.workflow.name.clone()))
    }

    // ── Persistence ─────────────────────────────────────────────

    pub async fn save<N>(&self, namer: N) -> Result<Option<String>>
    where
        N: FnOnce(&str) -> Option<String> + Send,
    {
        self.session.save(namer).await
    }

    pub async fn load(&self, id: &str) -> Result<()> {
        self.session.load(id).await
    }

    pub fn new_workflow(&self) {
        self.session.new_workflow()
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        self.session.list().await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.session.delete(id).await
    }

    // ── Execution ───────────────────────────────────────────────

    pub async fn run<N>(&self, start_node_id: Option<String>, namer: N) -> Result<RunOutcome>
    where
        N: FnOnce(&str) -> Option<String> + Send,
    {
        self.orchestrator.run(start_node_id, namer).await
    }

    pub async fn run_single_node<N>(&self, node_id: &str, namer: N) -> Result<RunOutcome>
    where
        N: FnOnce(&str) -> Option<String> + Send,
    {
        self.orchestrator.run_single_node(node_id, namer).await
    }

    pub fn stop(&self) -> Result<()> {
        self.orchestrator.stop()
    }

    /// Probe the service once.
    pub async fn check_health(&self) -> ServiceStatus {
        self.health.probe().await
    }

    // ── Background loops ────────────────────────────────────────

    /// Start the health, poller and timer refresh loops. Returns `false` if
    /// they are already running.
    pub fn start_background(&self) -> bool {
        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        if !background.is_empty() {
            return false;
        }

        let health = self.health.clone();
        background.push(BackgroundTask::spawn("health", &self.root, move |cancel| async move {
            health.run(cancel).await
        }));

        let timers = self.timers.clone();
        background.push(BackgroundTask::spawn("timers", &self.root, move |cancel| async move {
            timers.run(cancel).await
        }));

        if self.config.poller.enabled {
            let poller = self.poller.clone();
            background.push(BackgroundTask::spawn("poller", &self.root, move |cancel| async move {
                poller.run(cancel).await
            }));
        }

        info!(tasks = background.len(), "Background loops started");
        true
    }

    pub fn background_running(&self) -> usize {
        self.background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|t| t.is_running())
            .count()
    }

    /// Stop any active run and tear the background loops down.
    pub async fn shutdown(&self) {
        if self.orchestrator.stop().is_ok() {
            info!("Active run stopped on shutdown");
        }
        let tasks = std::mem::take(&mut *self.background.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.shutdown().await;
        }
        info!("Editor shut down");
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
