use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level flowpilot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub timers: TimerRegistryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where the remote execution service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path prefix of the workflow store endpoints.
    #[serde(default = "default_workflows_prefix")]
    pub workflows_prefix: String,
    /// Upper bound for a single request; workflow runs can be slow.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            workflows_prefix: default_workflows_prefix(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_workflows_prefix() -> String { "/api/v1".to_string() }
fn default_request_timeout() -> u64 { 300 }

/// Liveness probing of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

fn default_health_timeout() -> u64 { 5 }
fn default_probe_interval() -> u64 { 30 }

/// Presentation timing of run output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Delay between consecutive revealed log entries.
    #[serde(default = "default_reveal_step")]
    pub reveal_step_ms: u64,
    /// How long a node stays highlighted.
    #[serde(default = "default_highlight")]
    pub highlight_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            reveal_step_ms: default_reveal_step(),
            highlight_ms: default_highlight(),
        }
    }
}

impl ExecutionConfig {
    pub fn reveal_step(&self) -> Duration {
        Duration::from_millis(self.reveal_step_ms)
    }

    pub fn highlight(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }
}

fn default_reveal_step() -> u64 { 500 }
fn default_highlight() -> u64 { 1000 }

/// Background discovery of timer- and webhook-driven results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poller_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Delay between reveals of newly discovered results.
    #[serde(default = "default_poll_stagger")]
    pub stagger_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_poller_enabled(),
            interval_ms: default_poll_interval(),
            stagger_ms: default_poll_stagger(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

fn default_poller_enabled() -> bool { true }
fn default_poll_interval() -> u64 { 3000 }
fn default_poll_stagger() -> u64 { 1500 }

/// Timer registry refresh cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerRegistryConfig {
    #[serde(default = "default_timer_refresh")]
    pub refresh_secs: u64,
}

impl Default for TimerRegistryConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_timer_refresh(),
        }
    }
}

impl TimerRegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }
}

fn default_timer_refresh() -> u64 { 10 }

/// Diagnostic logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "flowpilot=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse TOML text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Absolute URL of a service endpoint.
    pub fn service_url(&self, path: &str) -> String {
        format!("{}{}", self.service.base_url.trim_end_matches('/'), path)
    }

    /// Absolute URL of a workflow store endpoint.
    pub fn workflows_url(&self, path: &str) -> String {
        let prefix = self.service.workflows_prefix.trim_end_matches('/');
        self.service_url(&format!("{}{}", prefix, path))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
