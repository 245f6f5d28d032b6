// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::HttpScheme;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// termination_grace_period_seconds = 3
///
/// [config.semaphores]
/// db = 1
///
/// [env]
/// RUST_LOG = "info"
///
/// [task.build]
/// command = ["cargo", "build"]
///
/// [task.api]
/// command = ["./target/debug/api"]
/// dependencies = ["build"]
/// ports = [8080]
///
/// [task.api.readiness_probe]
/// http_get = { port = 8080, path = "/healthz" }
///
/// [task.api.liveness_probe]
/// tcp_socket = { port = 8080 }
/// ```
///
/// All sections except `[task.<name>]` are optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Environment shared by every task; task-level `env` wins on conflict.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Volume declarations from `[volume.<name>]`.
    #[serde(default)]
    pub volume: BTreeMap<String, VolumeConfig>,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (see
/// `config::validate`), so holders can rely on the invariants checked there.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub env: BTreeMap<String, String>,
    pub volume: BTreeMap<String, VolumeConfig>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            env: raw.env,
            volume: raw.volume,
            task: raw.task,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Time each task gets to exit cleanly on shutdown before it is killed.
    #[serde(default = "default_termination_grace_period_seconds")]
    pub termination_grace_period_seconds: u64,

    /// Named counting semaphores: name -> capacity.
    #[serde(default)]
    pub semaphores: BTreeMap<String, usize>,

    /// Initial delay before restarting a crashed service.
    #[serde(default = "default_restart_backoff_seconds")]
    pub restart_backoff_seconds: f64,

    /// Upper bound for the doubling restart delay.
    #[serde(default = "default_max_restart_backoff_seconds")]
    pub max_restart_backoff_seconds: f64,
}

fn default_termination_grace_period_seconds() -> u64 {
    3
}

fn default_restart_backoff_seconds() -> f64 {
    0.5
}

fn default_max_restart_backoff_seconds() -> f64 {
    30.0
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            termination_grace_period_seconds: default_termination_grace_period_seconds(),
            semaphores: BTreeMap::new(),
            restart_backoff_seconds: default_restart_backoff_seconds(),
            max_restart_backoff_seconds: default_max_restart_backoff_seconds(),
        }
    }
}

/// `[volume.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    pub host_path: String,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Program and leading arguments, e.g. `["go", "run", "."]`.
    #[serde(default)]
    pub command: Vec<String>,

    /// Extra arguments appended after `command`.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Host ports this task listens on; checked to be free before start.
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Tasks that must be fulfilled before this one may start.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Tasks sharing a mutex name never run at the same time.
    #[serde(default)]
    pub mutex: Option<String>,

    /// Name of a semaphore declared in `[config.semaphores]`.
    #[serde(default)]
    pub semaphore: Option<String>,

    #[serde(default)]
    pub liveness_probe: Option<ProbeConfig>,

    #[serde(default)]
    pub readiness_probe: Option<ProbeConfig>,
}

/// A probe table, e.g. `readiness_probe = { tcp_socket = { port = 8080 } }`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default)]
    pub tcp_socket: Option<TcpSocketConfig>,

    #[serde(default)]
    pub http_get: Option<HttpGetConfig>,

    #[serde(default)]
    pub initial_delay_seconds: u64,

    /// `None` means 10 seconds.
    #[serde(default)]
    pub period_seconds: Option<u64>,

    /// `None` means 1.
    #[serde(default)]
    pub success_threshold: Option<u32>,

    /// `None` means 3.
    #[serde(default)]
    pub failure_threshold: Option<u32>,

    /// Per-check timeout; `None` means 1 second.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpSocketConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpGetConfig {
    #[serde(default)]
    pub scheme: HttpScheme,

    /// Defaults to 80 or 443 depending on `scheme`.
    #[serde(default)]
    pub port: Option<u16>,

    /// Defaults to `/`.
    #[serde(default)]
    pub path: Option<String>,
}
