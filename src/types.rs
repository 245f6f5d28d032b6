use std::fmt;

use serde::Deserialize;

/// Classification of a task, computed once when the catalog is built.
///
/// - `Job`: runs once to completion; success/failure is terminal.
/// - `Service`: expected to run indefinitely. A task is a service iff it
///   declares both a liveness and a readiness probe. Services are restarted
///   when their run step exits without cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Job,
    Service,
}

impl TaskKind {
    pub fn is_service(self) -> bool {
        matches!(self, TaskKind::Service)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Job => f.write_str("job"),
            TaskKind::Service => f.write_str("service"),
        }
    }
}

/// Phase of a task node within one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPhase::Waiting => "waiting",
            TaskPhase::Running => "running",
            TaskPhase::Succeeded => "succeeded",
            TaskPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL scheme used by HTTP probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    Http,
    Https,
}

impl Default for HttpScheme {
    fn default() -> Self {
        HttpScheme::Http
    }
}

impl HttpScheme {
    pub fn default_port(self) -> u16 {
        match self {
            HttpScheme::Http => 80,
            HttpScheme::Https => 443,
        }
    }
}

impl fmt::Display for HttpScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpScheme::Http => f.write_str("http"),
            HttpScheme::Https => f.write_str("https"),
        }
    }
}
