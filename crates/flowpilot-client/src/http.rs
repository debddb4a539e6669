use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use flowpilot_core::protocol::*;
use flowpilot_core::traits::{ExecutionService, WorkflowStore};
use flowpilot_core::{AppConfig, FlowError, Node, Result, TimerRecord, Workflow, WorkflowSummary};

/// JSON-over-HTTP client for the execution service and the workflow store.
///
/// Engine endpoints hang off `service.base_url`; workflow storage and timer
/// setup live under `service.workflows_prefix`.
pub struct HttpService {
    client: reqwest::Client,
    base_url: String,
    workflows_base: String,
    health_timeout: Duration,
}

impl HttpService {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service.request_timeout_secs))
            .build()
            .map_err(|e| FlowError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.service_url(""),
            workflows_base: config.workflows_url(""),
            health_timeout: config.health.timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn workflows_url(&self, path: &str) -> String {
        format!("{}{}", self.workflows_base, path)
    }

    fn timer_url(&self, timer_id: &str, action: Option<&str>) -> Result<reqwest::Url> {
        let mut segments = vec!["timers", timer_id];
        segments.extend(action);
        resource_url(&self.base_url, &segments)
    }

    fn workflow_url(&self, id: &str) -> Result<reqwest::Url> {
        resource_url(&self.workflows_base, &["workflows", id])
    }

    /// Send a request and decode a JSON body.
    async fn fetch<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, what: &str) -> Result<T> {
        let resp = self.dispatch(req, what).await?;
        resp.json()
            .await
            .map_err(|e| FlowError::Parse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Send a request, discarding any body.
    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<()> {
        self.dispatch(req, what).await.map(|_| ())
    }

    /// Timer commands may answer with an empty body or a `{success, error}` object.
    async fn timer_command(&self, req: reqwest::RequestBuilder, what: &str) -> Result<()> {
        let resp = self.dispatch(req, what).await?;
        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<TimerCommandResponse>(&text) {
            Ok(body) => body.into_result(what),
            Err(_) => Ok(()),
        }
    }

    async fn dispatch(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = req.send().await.map_err(|e| map_send_error(e, what))?;

        let status = resp.status();
        debug!(request = what, status = status.as_u16(), "Service responded");
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FlowError::Remote(error_message(status, &body, what)));
        }
        Ok(resp)
    }
}

/// `base` followed by `segments`, each percent-encoded as a single path
/// segment so ids cannot reach a different route.
fn resource_url(base: &str, segments: &[&str]) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| FlowError::Http(format!("Invalid service URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| FlowError::Http(format!("Service URL cannot carry a path: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn map_send_error(e: reqwest::Error, what: &str) -> FlowError {
    if e.is_connect() {
        FlowError::ServiceUnavailable(format!("{} request failed: {}", what, e))
    } else if e.is_timeout() {
        FlowError::Http(format!("{} request timed out", what))
    } else {
        FlowError::Http(format!("{} request failed: {}", what, e))
    }
}

/// Human-readable reason for a non-2xx response. Prefers the `detail` field
/// of a JSON error body, then the raw body, then the status text.
fn error_message(status: reqwest::StatusCode, body: &str, what: &str) -> String {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .filter(|d| !d.is_empty());

    let reason = match detail {
        Some(detail) => detail,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };
    format!("{} failed ({}): {}", what, status.as_u16(), reason)
}

#[derive(Deserialize)]
struct TimerCommandResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TimerCommandResponse {
    fn into_result(self, what: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(FlowError::Remote(format!(
                "{} failed: {}",
                what,
                self.error.unwrap_or_else(|| "Unknown error".into())
            )))
        }
    }
}

impl ExecutionService for HttpService {
    fn health(&self) -> BoxFuture<'_, Result<HealthResponse>> {
        Box::pin(async move {
            let req = self.client.get(self.url("/health")).timeout(self.health_timeout);
            self.fetch(req, "health").await
        })
    }

    fn execute_workflow(
        &self,
        request: ExecuteWorkflowRequest,
    ) -> BoxFuture<'_, Result<ExecuteWorkflowResponse>> {
        Box::pin(async move {
            let req = self.client.post(self.url("/execute-workflow")).json(&request);
            self.fetch(req, "execute-workflow").await
        })
    }

    fn execute_node(
        &self,
        request: ExecuteNodeRequest,
    ) -> BoxFuture<'_, Result<ExecuteNodeResponse>> {
        Box::pin(async move {
            let req = self
                .client
                .post(self.url("/execute-node"))
                .query(&[("node_type", request.node_data.kind().as_str())])
                .json(&request);
            self.fetch(req, "execute-node").await
        })
    }

    fn node_status(&self, node_ids: Vec<String>) -> BoxFuture<'_, Result<NodeStatusResponse>> {
        Box::pin(async move {
            let req = self.client.post(self.url("/node-status")).json(&node_ids);
            self.fetch(req, "node-status").await
        })
    }

    fn list_timers(&self) -> BoxFuture<'_, Result<Vec<TimerRecord>>> {
        Box::pin(async move {
            let req = self.client.get(self.url("/timers"));
            let body: TimersResponse = self.fetch(req, "timers").await?;
            Ok(body.timers)
        })
    }

    fn pause_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>> {
        let url = self.timer_url(timer_id, Some("pause"));
        Box::pin(async move { self.timer_command(self.client.post(url?), "pause timer").await })
    }

    fn resume_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>> {
        let url = self.timer_url(timer_id, Some("resume"));
        Box::pin(async move { self.timer_command(self.client.post(url?), "resume timer").await })
    }

    fn delete_timer(&self, timer_id: &str) -> BoxFuture<'_, Result<()>> {
        let url = self.timer_url(timer_id, None);
        Box::pin(async move { self.timer_command(self.client.delete(url?), "delete timer").await })
    }

    fn execute_timer_now(&self, timer_id: &str) -> BoxFuture<'_, Result<ExecuteWorkflowResponse>> {
        let url = self.timer_url(timer_id, Some("execute-now"));
        Box::pin(async move { self.fetch(self.client.post(url?), "execute timer").await })
    }

    fn setup_timer(&self, node: Node, workflow_id: &str) -> BoxFuture<'_, Result<serde_json::Value>> {
        let body = SetupTimerRequest {
            node,
            workflow_id: workflow_id.to_string(),
        };
        Box::pin(async move {
            let req = self.client.post(self.workflows_url("/setup-timer")).json(&body);
            self.fetch(req, "setup-timer").await
        })
    }
}

impl WorkflowStore for HttpService {
    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>> {
        Box::pin(async move {
            let req = self.client.get(self.workflows_url("/workflows"));
            let body: WorkflowListResponse = self.fetch(req, "list workflows").await?;
            Ok(body.workflows)
        })
    }

    fn get_workflow(&self, id: &str) -> BoxFuture<'_, Result<Workflow>> {
        let url = self.workflow_url(id);
        Box::pin(async move { self.fetch(self.client.get(url?), "get workflow").await })
    }

    fn create_workflow(&self, name: &str, body: WorkflowBody) -> BoxFuture<'_, Result<String>> {
        let body = WorkflowBody {
            name: Some(name.to_string()),
            ..body
        };
        Box::pin(async move {
            let req = self.client.post(self.workflows_url("/workflows")).json(&body);
            let created: CreateWorkflowResponse = self.fetch(req, "create workflow").await?;
            Ok(created.workflow_id)
        })
    }

    fn update_workflow(&self, id: &str, body: WorkflowBody) -> BoxFuture<'_, Result<()>> {
        let url = self.workflow_url(id);
        Box::pin(async move { self.send(self.client.put(url?).json(&body), "update workflow").await })
    }

    fn delete_workflow(&self, id: &str) -> BoxFuture<'_, Result<()>> {
        let url = self.workflow_url(id);
        Box::pin(async move { self.send(self.client.delete(url?), "delete workflow").await })
    }
}
