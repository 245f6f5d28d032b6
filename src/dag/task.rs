// src/dag/task.rs

//! Immutable task definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::model::TaskConfig;
use crate::engine::TaskName;
use crate::errors::Result;
use crate::probe::Probe;
use crate::types::TaskKind;

/// What the process driver needs to start a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program followed by its leading arguments.
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Fully merged environment (global env overridden by task env).
    pub env: BTreeMap<String, String>,
    pub ports: Vec<u16>,
}

impl CommandSpec {
    /// `command` and `args` joined for logging.
    pub fn display(&self) -> String {
        self.command
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A single task definition.
///
/// Tasks are immutable once built; the `kind` is derived from the probes
/// whenever they change through the builder methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    name: TaskName,
    dependencies: Vec<TaskName>,
    mutex: Option<String>,
    semaphore: Option<String>,
    liveness: Option<Probe>,
    readiness: Option<Probe>,
    command: CommandSpec,
    kind: TaskKind,
}

impl Task {
    pub fn new(name: impl Into<TaskName>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            mutex: None,
            semaphore: None,
            liveness: None,
            readiness: None,
            command: CommandSpec::default(),
            kind: TaskKind::Job,
        }
    }

    /// Build a task from its `[task.<name>]` section.
    ///
    /// `global_env` is merged underneath the task's own `env`.
    pub fn from_config(
        name: &str,
        cfg: &TaskConfig,
        global_env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let liveness = cfg.liveness_probe.as_ref().map(Probe::try_from).transpose()?;
        let readiness = cfg.readiness_probe.as_ref().map(Probe::try_from).transpose()?;

        let mut env = global_env.clone();
        env.extend(cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let command = CommandSpec {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            working_dir: cfg.working_dir.as_ref().map(PathBuf::from),
            env,
            ports: cfg.ports.clone(),
        };

        Ok(Self::new(name)
            .with_dependencies(cfg.dependencies.iter().cloned())
            .with_mutex(cfg.mutex.clone())
            .with_semaphore(cfg.semaphore.clone())
            .with_probes(liveness, readiness)
            .with_command(command))
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mutex(mut self, mutex: Option<String>) -> Self {
        self.mutex = mutex;
        self
    }

    pub fn with_semaphore(mut self, semaphore: Option<String>) -> Self {
        self.semaphore = semaphore;
        self
    }

    pub fn with_probes(mut self, liveness: Option<Probe>, readiness: Option<Probe>) -> Self {
        self.liveness = liveness;
        self.readiness = readiness;
        self.kind = if self.liveness.is_some() && self.readiness.is_some() {
            TaskKind::Service
        } else {
            TaskKind::Job
        };
        self
    }

    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.command = command;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[TaskName] {
        &self.dependencies
    }

    pub fn mutex(&self) -> Option<&str> {
        self.mutex.as_deref()
    }

    pub fn semaphore(&self) -> Option<&str> {
        self.semaphore.as_deref()
    }

    pub fn liveness_probe(&self) -> Option<&Probe> {
        self.liveness.as_ref()
    }

    pub fn readiness_probe(&self) -> Option<&Probe> {
        self.readiness.as_ref()
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_service(&self) -> bool {
        self.kind.is_service()
    }

    /// Whether the task needs admission control before its run phase.
    pub fn needs_admission(&self) -> bool {
        self.mutex.is_some() || self.semaphore.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{ProbeConfig, TcpSocketConfig};

    fn tcp_probe(port: u16) -> ProbeConfig {
        ProbeConfig {
            tcp_socket: Some(TcpSocketConfig { port }),
            ..Default::default()
        }
    }

    #[test]
    fn service_requires_both_probes() {
        let only_readiness = Task::new("a").with_probes(None, Some(Probe::tcp(80)));
        assert_eq!(only_readiness.kind(), TaskKind::Job);

        let both = Task::new("a").with_probes(Some(Probe::tcp(80)), Some(Probe::tcp(80)));
        assert_eq!(both.kind(), TaskKind::Service);

        let dropped = both.with_probes(None, None);
        assert_eq!(dropped.kind(), TaskKind::Job);
    }

    #[test]
    fn from_config_merges_env_with_task_precedence() {
        let cfg = TaskConfig {
            command: vec!["sh".into(), "-c".into()],
            args: vec!["echo hi".into()],
            env: BTreeMap::from([("A".to_string(), "task".to_string())]),
            dependencies: vec!["db".into()],
            mutex: Some("m".into()),
            liveness_probe: Some(tcp_probe(8080)),
            readiness_probe: Some(tcp_probe(8080)),
            ..Default::default()
        };
        let global = BTreeMap::from([
            ("A".to_string(), "global".to_string()),
            ("B".to_string(), "global".to_string()),
        ]);

        let task = Task::from_config("api", &cfg, &global).unwrap();

        assert_eq!(task.name(), "api");
        assert!(task.is_service());
        assert_eq!(task.dependencies(), ["db".to_string()]);
        assert_eq!(task.mutex(), Some("m"));
        assert_eq!(task.command().env["A"], "task");
        assert_eq!(task.command().env["B"], "global");
        assert_eq!(task.command().display(), "sh -c echo hi");
    }
}
