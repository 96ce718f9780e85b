//! System configuration parsing.

use std::path::PathBuf;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use shipit_core::job::QueueName;

use crate::{ConfigError, ConfigResult};

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Root directory for per-job working directories.
    pub workspace_root: PathBuf,
    /// Root directory of the filesystem template store.
    pub templates_root: PathBuf,
    /// Address the API server binds to.
    pub listen: String,
    /// Upper bound on a single external command invocation.
    pub shell_timeout_secs: u64,
    /// How long `drain_and_close` waits for active jobs before force-closing.
    pub drain_timeout_secs: u64,
    /// One entry per queue; queues absent from the config get defaults.
    pub queues: Vec<QueueConfig>,
}

/// Scheduling configuration for a single queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: QueueName,
    /// Number of simultaneously active jobs. Does not bound queue depth.
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Exponential backoff: `base * 2^(attempts-1)`, capped.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// A job active this long with no progress update is considered stalled.
    pub heartbeat_timeout_ms: u64,
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn defaults_for(name: QueueName) -> Self {
        let (concurrency, max_attempts) = match name {
            QueueName::Generation => (4, 3),
            QueueName::Build => (2, 3),
            QueueName::Deployment => (2, 3),
            // Cleanup is never retried; see QueueName::allows_retry.
            QueueName::Cleanup => (1, 1),
        };
        Self {
            name,
            concurrency,
            max_attempts,
            backoff_base_ms: 5_000,
            backoff_cap_ms: 300_000,
            heartbeat_timeout_ms: 120_000,
            poll_interval_ms: 500,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./workspaces"),
            templates_root: PathBuf::from("./templates"),
            listen: "0.0.0.0:3000".to_string(),
            shell_timeout_secs: 600,
            drain_timeout_secs: 30,
            queues: QueueName::ALL.map(QueueConfig::defaults_for).to_vec(),
        }
    }
}

impl SystemConfig {
    /// The configuration for one queue, falling back to defaults.
    pub fn queue(&self, name: QueueName) -> QueueConfig {
        self.queues
            .iter()
            .find(|q| q.name == name)
            .cloned()
            .unwrap_or_else(|| QueueConfig::defaults_for(name))
    }
}

/// Load system configuration from a KDL file.
pub fn load_system_config(path: &std::path::Path) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
///
/// ```kdl
/// workspace-root "/var/lib/shipit/workspaces"
/// templates-root "/var/lib/shipit/templates"
/// listen "0.0.0.0:3000"
/// shell-timeout-secs 600
///
/// queue "generation" {
///     concurrency 4
///     max-attempts 3
///     backoff-base-ms 5000
/// }
/// ```
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = SystemConfig::default();
    let mut seen_queues: Vec<QueueName> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "workspace-root" => {
                config.workspace_root = PathBuf::from(require_string_arg(node, "workspace-root")?);
            }
            "templates-root" => {
                config.templates_root = PathBuf::from(require_string_arg(node, "templates-root")?);
            }
            "listen" => {
                config.listen = require_string_arg(node, "listen")?;
            }
            "shell-timeout-secs" => {
                config.shell_timeout_secs = require_int_arg(node, "shell-timeout-secs")?;
            }
            "drain-timeout-secs" => {
                config.drain_timeout_secs = require_int_arg(node, "drain-timeout-secs")?;
            }
            "queue" => {
                let queue = parse_queue(node)?;
                if seen_queues.contains(&queue.name) {
                    return Err(ConfigError::Duplicate(format!("queue \"{}\"", queue.name)));
                }
                seen_queues.push(queue.name);
                if let Some(existing) = config.queues.iter_mut().find(|q| q.name == queue.name) {
                    *existing = queue;
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_queue(node: &KdlNode) -> ConfigResult<QueueConfig> {
    let name_str = require_string_arg(node, "queue name")?;
    let name: QueueName = name_str
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            field: "queue name".to_string(),
            message: format!("unknown queue: {}", name_str),
        })?;

    let mut queue = QueueConfig::defaults_for(name);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "concurrency" => {
                    queue.concurrency = require_int_arg::<usize>(child, "concurrency")?.max(1);
                }
                "max-attempts" => {
                    queue.max_attempts = require_int_arg::<u32>(child, "max-attempts")?.max(1);
                }
                "backoff-base-ms" => {
                    queue.backoff_base_ms = require_int_arg(child, "backoff-base-ms")?;
                }
                "backoff-cap-ms" => {
                    queue.backoff_cap_ms = require_int_arg(child, "backoff-cap-ms")?;
                }
                "heartbeat-timeout-ms" => {
                    queue.heartbeat_timeout_ms = require_int_arg(child, "heartbeat-timeout-ms")?;
                }
                "poll-interval-ms" => {
                    queue.poll_interval_ms = require_int_arg(child, "poll-interval-ms")?;
                }
                _ => {}
            }
        }
    }

    // Cleanup jobs must not silently re-run.
    if !name.allows_retry() {
        queue.max_attempts = 1;
    }

    Ok(queue)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn require_string_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn require_int_arg<T: TryFrom<i128>>(node: &KdlNode, field: &str) -> ConfigResult<T> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    T::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} out of range", value),
    })
}
