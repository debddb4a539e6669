use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Kind of automation step a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Gigachat,
    WebhookTrigger,
    Webhook,
    Timer,
    Email,
    Database,
    Join,
    RequestIterator,
    IfElse,
    Dispatcher,
}

impl NodeKind {
    pub const ALL: [NodeKind; 10] = [
        Self::Gigachat,
        Self::WebhookTrigger,
        Self::Webhook,
        Self::Timer,
        Self::Email,
        Self::Database,
        Self::Join,
        Self::RequestIterator,
        Self::IfElse,
        Self::Dispatcher,
    ];

    /// Wire name, as used in `type` fields and the `node_type` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gigachat => "gigachat",
            Self::WebhookTrigger => "webhook_trigger",
            Self::Webhook => "webhook",
            Self::Timer => "timer",
            Self::Email => "email",
            Self::Database => "database",
            Self::Join => "join",
            Self::RequestIterator => "request_iterator",
            Self::IfElse => "if_else",
            Self::Dispatcher => "dispatcher",
        }
    }

    /// Name shown in the palette; also the default label of a new node.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gigachat => "GigaChat AI",
            Self::WebhookTrigger => "Webhook Trigger",
            Self::Webhook => "Send Webhook",
            Self::Timer => "Timer Trigger",
            Self::Email => "Send Email",
            Self::Database => "Database Query",
            Self::Join => "Join/Merge",
            Self::RequestIterator => "Request Iterator",
            Self::IfElse => "If/Else",
            Self::Dispatcher => "Dispatcher",
        }
    }

    /// Conditional nodes expose `true`/`false` branch ports.
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::IfElse)
    }

    /// Scheduling nodes need a persisted workflow for the remote scheduler.
    pub fn is_scheduling(&self) -> bool {
        matches!(self, Self::Timer)
    }

    /// Whether a run may be started from this kind of node.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            Self::Gigachat | Self::WebhookTrigger | Self::Timer | Self::IfElse
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = FlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| FlowError::InvalidConfig {
                kind: s.to_string(),
                message: "unknown node type".into(),
            })
    }
}

/// Canvas coordinates. Only carried through; layout is not computed here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Config keys a typed struct does not model. Kept so the document survives a
/// load/save round trip; the backend reads several of them.
pub type Extra = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GigachatConfig {
    pub role: String,
    pub auth_token: String,
    pub system_message: String,
    pub user_message: String,
    pub clear_history: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for GigachatConfig {
    fn default() -> Self {
        Self {
            role: "assistant".into(),
            auth_token: String::new(),
            system_message: "You are a helpful assistant who answers briefly and to the point."
                .into(),
            user_message: "Hi! Tell me something interesting about programming.".into(),
            clear_history: false,
            extra: Extra::new(),
        }
    }
}

/// Outgoing webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HookConfig {
    pub url: String,
    pub method: String,
    pub headers: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            url: "https://api.example.com/webhook".into(),
            method: "POST".into(),
            headers: "Content-Type: application/json".into(),
            extra: Extra::new(),
        }
    }
}

/// Incoming webhook. The endpoint is assigned by the service, so a fresh
/// trigger carries no keys at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookTriggerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailConfig {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            to: "user@example.com".into(),
            subject: String::new(),
            body: String::new(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub query: String,
    pub connection: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            query: String::new(),
            connection: "postgres".into(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerConfig {
    /// Interval in minutes.
    pub interval: u32,
    pub timezone: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: 5,
            timezone: "UTC".into(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinConfig {
    pub wait_for_all: bool,
    pub merge_strategy: String,
    pub separator: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            wait_for_all: true,
            merge_strategy: "combine_text".into(),
            separator: "\n\n---\n\n".into(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestIteratorConfig {
    pub base_url: String,
    pub execution_mode: String,
    pub common_headers: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for RequestIteratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".into(),
            execution_mode: "sequential".into(),
            common_headers: "{}".into(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IfElseConfig {
    pub condition_type: String,
    pub field_path: String,
    pub compare_value: String,
    pub case_sensitive: bool,
    /// Offer every new branch edge as a goto edge.
    pub enable_goto: bool,
    pub max_goto_iterations: u32,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for IfElseConfig {
    fn default() -> Self {
        Self {
            condition_type: "equals".into(),
            field_path: "output.text".into(),
            compare_value: String::new(),
            case_sensitive: false,
            enable_goto: false,
            max_goto_iterations: 10,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchRoute {
    pub workflow_id: String,
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatcherConfig {
    #[serde(rename = "useAI")]
    pub use_ai: bool,
    pub dispatcher_auth_token: String,
    pub routes: BTreeMap<String, DispatchRoute>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Per-kind node configuration, one variant per [`NodeKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Gigachat(GigachatConfig),
    WebhookTrigger(WebhookTriggerConfig),
    Webhook(HookConfig),
    Timer(TimerConfig),
    Email(EmailConfig),
    Database(DatabaseConfig),
    Join(JoinConfig),
    RequestIterator(RequestIteratorConfig),
    IfElse(IfElseConfig),
    Dispatcher(DispatcherConfig),
}

impl NodeConfig {
    /// Default configuration for a freshly added node.
    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Gigachat => Self::Gigachat(Default::default()),
            NodeKind::WebhookTrigger => Self::WebhookTrigger(Default::default()),
            NodeKind::Webhook => Self::Webhook(Default::default()),
            NodeKind::Timer => Self::Timer(Default::default()),
            NodeKind::Email => Self::Email(Default::default()),
            NodeKind::Database => Self::Database(Default::default()),
            NodeKind::Join => Self::Join(Default::default()),
            NodeKind::RequestIterator => Self::RequestIterator(Default::default()),
            NodeKind::IfElse => Self::IfElse(Default::default()),
            NodeKind::Dispatcher => Self::Dispatcher(Default::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Gigachat(_) => NodeKind::Gigachat,
            Self::WebhookTrigger(_) => NodeKind::WebhookTrigger,
            Self::Webhook(_) => NodeKind::Webhook,
            Self::Timer(_) => NodeKind::Timer,
            Self::Email(_) => NodeKind::Email,
            Self::Database(_) => NodeKind::Database,
            Self::Join(_) => NodeKind::Join,
            Self::RequestIterator(_) => NodeKind::RequestIterator,
            Self::IfElse(_) => NodeKind::IfElse,
            Self::Dispatcher(_) => NodeKind::Dispatcher,
        }
    }

    /// Decode a raw JSON config for the given kind. `null` yields the defaults.
    pub fn from_value(kind: NodeKind, value: serde_json::Value) -> crate::Result<Self> {
        let value = if value.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            value
        };
        let invalid = |e: serde_json::Error| FlowError::InvalidConfig {
            kind: kind.to_string(),
            message: e.to_string(),
        };
        Ok(match kind {
            NodeKind::Gigachat => Self::Gigachat(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::WebhookTrigger => {
                Self::WebhookTrigger(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::Webhook => Self::Webhook(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::Timer => Self::Timer(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::Email => Self::Email(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::Database => Self::Database(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::Join => Self::Join(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::RequestIterator => {
                Self::RequestIterator(serde_json::from_value(value).map_err(invalid)?)
            }
            NodeKind::IfElse => Self::IfElse(serde_json::from_value(value).map_err(invalid)?),
            NodeKind::Dispatcher => {
                Self::Dispatcher(serde_json::from_value(value).map_err(invalid)?)
            }
        })
    }

    pub fn to_value(&self) -> serde_json::Value {
        let encoded = match self {
            Self::Gigachat(c) => serde_json::to_value(c),
            Self::WebhookTrigger(c) => serde_json::to_value(c),
            Self::Webhook(c) => serde_json::to_value(c),
            Self::Timer(c) => serde_json::to_value(c),
            Self::Email(c) => serde_json::to_value(c),
            Self::Database(c) => serde_json::to_value(c),
            Self::Join(c) => serde_json::to_value(c),
            Self::RequestIterator(c) => serde_json::to_value(c),
            Self::IfElse(c) => serde_json::to_value(c),
            Self::Dispatcher(c) => serde_json::to_value(c),
        };
        // Plain structs of strings, bools and JSON maps always encode.
        encoded.unwrap_or(serde_json::Value::Null)
    }

    /// Whether new branch edges should be offered as goto edges.
    pub fn goto_enabled(&self) -> bool {
        matches!(self, Self::IfElse(c) if c.enable_goto)
    }
}

/// A node on the canvas.
///
/// Serialized as `{id, type, position, data: {label, config}}`; the `config`
/// object is decoded according to `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub position: Position,
    pub label: String,
    pub config: NodeConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            position: Position::default(),
            label: label.into(),
            config,
        }
    }

    /// Node of the given kind with default configuration.
    pub fn of_kind(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self::new(id, label, NodeConfig::default_for(kind))
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    data: RawNodeData,
}

#[derive(Default, Serialize, Deserialize)]
struct RawNodeData {
    #[serde(default)]
    label: String,
    #[serde(default)]
    config: serde_json::Value,
}

impl TryFrom<RawNode> for Node {
    type Error = FlowError;

    fn try_from(raw: RawNode) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            config: NodeConfig::from_value(raw.kind, raw.data.config)?,
            id: raw.id,
            position: raw.position,
            label: raw.data.label,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        Self {
            kind: node.kind(),
            data: RawNodeData {
                label: node.label,
                config: node.config.to_value(),
            },
            id: node.id,
            position: node.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_editor_node() {
        let json = r#"{
            "id": "node-1712",
            "type": "if_else",
            "position": {"x": 300, "y": 200},
            "data": {
                "label": "Check reply",
                "config": {"conditionType": "contains", "fieldPath": "output.text", "enableGoto": true}
            }
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind(), NodeKind::IfElse);
        assert_eq!(node.label, "Check reply");
        assert_eq!(node.position, Position::new(300.0, 200.0));
        match &node.config {
            NodeConfig::IfElse(c) => {
                assert_eq!(c.condition_type, "contains");
                assert!(c.enable_goto);
                // Missing keys fall back to defaults.
                assert_eq!(c.max_goto_iterations, 10);
            }
            other => panic!("unexpected config: {:?}", other),
        }
        assert!(node.config.goto_enabled());
    }

    #[test]
    fn test_encode_keeps_wire_shape() {
        let node = Node::of_kind("t1", "Every five", NodeKind::Timer);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "timer");
        assert_eq!(value["data"]["label"], "Every five");
        assert_eq!(value["data"]["config"]["interval"], 5);
        assert_eq!(value["data"]["config"]["timezone"], "UTC");
    }

    #[test]
    fn test_config_shape_mismatch_is_rejected() {
        let json = r#"{"id":"t1","type":"timer","data":{"label":"T","config":{"interval":"soon"}}}"#;
        let err = serde_json::from_str::<Node>(json).unwrap_err();
        assert!(err.to_string().contains("timer"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = r#"{"id":"x","type":"teleport","data":{"label":"X"}}"#;
        assert!(serde_json::from_str::<Node>(json).is_err());
    }

    #[test]
    fn test_null_config_uses_defaults() {
        let json = r#"{"id":"j","type":"join","data":{"label":"J","config":null}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.config, NodeConfig::default_for(NodeKind::Join));
    }

    #[test]
    fn test_kind_roundtrip_from_str() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
            assert_eq!(NodeConfig::default_for(kind).kind(), kind);
        }
        assert!(NodeKind::IfElse.is_conditional());
        assert!(!NodeKind::Gigachat.is_conditional());
        assert!(NodeKind::Timer.is_scheduling());
    }

    #[test]
    fn test_dispatcher_routes() {
        let json = r#"{"id":"d","type":"dispatcher","data":{"label":"D","config":{
            "useAI": true,
            "routes": {"billing": {"workflow_id": "wf-1", "keywords": ["invoice"]}}
        }}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        match node.config {
            NodeConfig::Dispatcher(c) => {
                assert!(c.use_ai);
                assert_eq!(c.routes["billing"].keywords, vec!["invoice"]);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn test_unmodeled_config_keys_survive_round_trip() {
        let iterator = serde_json::json!({
            "id": "ri", "type": "request_iterator", "position": {"x": 0.0, "y": 0.0},
            "data": {"label": "Fan out", "config": {
                "baseUrl": "http://x",
                "executionMode": "parallel",
                "commonHeaders": "{}",
                "jsonInput": "[{\"endpoint\": \"/a\"}]",
                "maxConcurrent": 4
            }}
        });
        let trigger = serde_json::json!({
            "id": "wt", "type": "webhook_trigger", "position": {"x": 10.0, "y": 20.0},
            "data": {"label": "Inbound", "config": {
                "webhookUrl": "http://svc/webhooks/abc",
                "allowedIps": "10.0.0.1",
                "authRequired": true
            }}
        });

        for original in [iterator, trigger] {
            let node: Node = serde_json::from_value(original.clone()).unwrap();
            assert_eq!(serde_json::to_value(&node).unwrap(), original);
        }
    }

    #[test]
    fn test_webhook_trigger_has_no_outgoing_fields() {
        let config = NodeConfig::default_for(NodeKind::WebhookTrigger).to_value();
        assert_eq!(config, serde_json::json!({}));

        let json = r#"{"id":"wt","type":"webhook_trigger","data":{"label":"In","config":{"webhookUrl":"http://svc/hook"}}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        match &node.config {
            NodeConfig::WebhookTrigger(c) => {
                assert_eq!(c.webhook_url.as_deref(), Some("http://svc/hook"));
                assert!(c.extra.is_empty());
            }
            other => panic!("unexpected config: {:?}", other),
        }
        let encoded = node.config.to_value();
        assert!(encoded.get("url").is_none());
        assert!(encoded.get("method").is_none());
    }

    #[test]
    fn test_dispatcher_extras_kept_per_route() {
        let config = serde_json::json!({
            "useAI": false,
            "dispatcherAuthToken": "",
            "dispatcherType": "keyword",
            "routes": {"billing": {"workflow_id": "wf-1", "keywords": ["invoice"], "priority": 2}}
        });
        let decoded = NodeConfig::from_value(NodeKind::Dispatcher, config.clone()).unwrap();
        match &decoded {
            NodeConfig::Dispatcher(c) => {
                assert_eq!(c.extra["dispatcherType"], "keyword");
                assert_eq!(c.routes["billing"].extra["priority"], 2);
            }
            other => panic!("unexpected config: {:?}", other),
        }
        assert_eq!(decoded.to_value(), config);
    }
}
