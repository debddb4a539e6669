use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::node::Node;

/// Node id used for orchestrator-level log entries.
pub const SYSTEM_NODE: &str = "system";

/// Label suffix marking an intentional back-edge.
pub const GOTO_SUFFIX: &str = ":goto";

/// Results returned by the remote service, keyed by node id.
pub type ResultMap = HashMap<String, serde_json::Value>;

/// A named exit of a conditional node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    True,
    False,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
        }
    }

    /// Label of a goto edge leaving this port, e.g. `true:goto`.
    pub fn goto_label(&self) -> String {
        format!("{}{}", self.as_str(), GOTO_SUFFIX)
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "true" => Ok(Self::True),
            "false" => Ok(Self::False),
            other => Err(format!("unknown branch port: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ConnectionData>,
}

impl Connection {
    /// Create a connection with a fresh unique id.
    pub fn new(source: impl Into<String>, target: impl Into<String>, label: Option<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}-{}-{}", source, target, Uuid::new_v4().simple()),
            source,
            target,
            data: label.map(|l| ConnectionData { label: Some(l) }),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.label.as_deref())
    }

    /// Treats an empty label as missing.
    pub fn has_label(&self) -> bool {
        self.label().is_some_and(|l| !l.is_empty())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data = Some(ConnectionData {
            label: Some(label.into()),
        });
        self
    }

    pub fn is_goto(&self) -> bool {
        self.label().is_some_and(|l| l.ends_with(GOTO_SUFFIX))
    }

    /// Branch this edge leaves from, if the label encodes one.
    pub fn branch(&self) -> Option<Branch> {
        let label = self.label()?;
        label.strip_suffix(GOTO_SUFFIX).unwrap_or(label).parse().ok()
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Stored workflow document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
}

/// The workflow currently open in the editor.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRef {
    /// Durable id; `None` until the workflow is first saved.
    pub id: Option<String>,
    pub name: String,
}

impl Default for WorkflowRef {
    fn default() -> Self {
        Self {
            id: None,
            name: "New workflow".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Running,
    Success,
    Error,
}

impl LogStatus {
    /// Map a remote log level; unknown levels read as in-progress.
    pub fn from_level(level: &str) -> Self {
        match level {
            "error" => Self::Error,
            "success" => Self::Success,
            _ => Self::Running,
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A user-facing execution log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub node_id: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(node_id: impl Into<String>, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        Self::new(SYSTEM_NODE, LogStatus::Error, message)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_system(&self) -> bool {
        self.node_id == SYSTEM_NODE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Active,
    Paused,
    Error,
}

/// A remote schedule, mirrored from `GET /timers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "interval")]
    pub interval_minutes: u32,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub next_execution: DateTime<Utc>,
    pub status: TimerStatus,
}

/// Parse an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Reachability of the remote execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceStatus {
    #[default]
    Checking,
    Online,
    Offline,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checking => write!(f, "checking"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Editor event broadcast to all observers.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    /// A log entry became visible.
    LogAppended(LogEntry),
    /// A node started its highlight pulse.
    NodeHighlighted { node_id: String },
    /// The highlighted node went dark.
    HighlightCleared,
    /// Logs and results were reset for a new run.
    OutputReset,
    /// The result map was replaced wholesale.
    ResultsReplaced { count: usize },
    /// Results were merged in for these nodes.
    ResultsMerged { node_ids: Vec<String> },
    /// The orchestrator changed state.
    RunStateChanged(RunState),
    /// The service health probe changed its verdict.
    ServiceStatusChanged(ServiceStatus),
    /// The timer registry was refetched.
    TimersRefreshed { count: usize },
    /// The workflow was persisted.
    WorkflowSaved { workflow_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_labels() {
        let plain = Connection::new("a", "b", None);
        assert!(plain.id.starts_with("a-b-"));
        assert_eq!(plain.label(), None);
        assert!(!plain.is_goto());
        assert_eq!(plain.branch(), None);

        let goto = Connection::new("a", "b", Some(Branch::False.goto_label()));
        assert_eq!(goto.label(), Some("false:goto"));
        assert!(goto.is_goto());
        assert_eq!(goto.branch(), Some(Branch::False));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = Connection::new("x", "y", None);
        let b = Connection::new("x", "y", None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_connection_wire_shape() {
        let json = r#"{"id":"c1","source":"a","target":"b","sourceHandle":"true","data":{"label":"true"}}"#;
        let conn: Connection = serde_json::from_str(json).unwrap();
        assert_eq!(conn.label(), Some("true"));

        let plain = serde_json::to_value(Connection::new("a", "b", None)).unwrap();
        assert!(plain.get("data").is_none());
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(LogStatus::from_level("error"), LogStatus::Error);
        assert_eq!(LogStatus::from_level("success"), LogStatus::Success);
        assert_eq!(LogStatus::from_level("info"), LogStatus::Running);
    }

    #[test]
    fn test_timer_record_naive_timestamp() {
        let json = r#"{"id":"tm-1","node_id":"n1","interval":5,"next_execution":"2026-03-01T12:30:00.123456","status":"paused"}"#;
        let timer: TimerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(timer.interval_minutes, 5);
        assert_eq!(timer.status, TimerStatus::Paused);
        assert_eq!(timer.next_execution.format("%H:%M").to_string(), "12:30");
    }

    #[test]
    fn test_timer_record_rfc3339_timestamp() {
        let json = r#"{"id":"tm-1","node_id":"n1","interval":1,"next_execution":"2026-03-01T12:30:00+02:00","status":"active"}"#;
        let timer: TimerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(timer.next_execution.format("%H:%M").to_string(), "10:30");
    }
}
