use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph structure errors
    #[error("Node label must not be empty")]
    EmptyLabel,

    #[error("Node label already in use: {0}")]
    DuplicateLabel(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node id already in use: {0}")]
    DuplicateNodeId(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Connection {from} -> {target} rejected: {reason}")]
    ConnectionRejected {
        from: String,
        target: String,
        reason: String,
    },

    #[error("Node {node_id} has no branch port '{port}'")]
    InvalidPort { node_id: String, port: String },

    #[error("Invalid config for {kind} node: {message}")]
    InvalidConfig { kind: String, message: String },

    #[error("Workflow has no nodes")]
    EmptyWorkflow,

    // Remote service errors
    #[error("Execution service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    // Orchestration errors
    #[error("No execution is running")]
    NotRunning,

    #[error("Execution cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether the error is a structural rejection the user can correct.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyLabel
                | Self::DuplicateLabel(_)
                | Self::DuplicateNodeId(_)
                | Self::ConnectionRejected { .. }
                | Self::InvalidPort { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
