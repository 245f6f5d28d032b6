// src/engine/mod.rs

//! Orchestration engine for kit.
//!
//! This module ties together:
//! - the scheduler (which waiting tasks may start)
//! - the supervisors that walk each task through its process driver
//! - the probe loops feeding liveness/readiness back in
//! - shutdown on cancellation
//!
//! The pure core state machine lives in [`core`] (with the per-event logic
//! in [`event_handlers`]); the async/IO shell is implemented in [`runtime`].

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::model::ConfigFile;
use crate::probe::{ProbeKind, ProbeUpdate};

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Lifecycle report from a task's supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Not running yet (or again): waiting for admission, building,
    /// restarting, stopping.
    Waiting { reason: String },
    /// The run step has started.
    Running,
    /// A job's run step returned cleanly.
    Succeeded,
    /// A job failed terminally (or a task failed before its first run).
    Failed { message: String },
    /// A service's run step ended on its own; it will be restarted.
    Crashed { message: String },
    /// The supervisor finished its stop path after cancellation.
    Terminated {
        reason: String,
        message: Option<String>,
    },
    /// The supervisor future is gone. `error` is set if it panicked or
    /// was aborted.
    SupervisorExited { error: Option<String> },
}

/// Events flowing into the runtime from supervisors and probe loops.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Task {
        task: TaskName,
        event: TaskEvent,
    },
    Probe {
        task: TaskName,
        kind: ProbeKind,
        update: ProbeUpdate,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

impl RuntimeEvent {
    pub fn task(task: impl Into<TaskName>, event: TaskEvent) -> Self {
        RuntimeEvent::Task {
            task: task.into(),
            event,
        }
    }
}

/// Knobs shared by the core, the shell and the supervisors.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// How long a task gets to stop before it is killed.
    pub termination_grace_period: Duration,
    /// Semaphore name -> capacity.
    pub semaphores: BTreeMap<String, usize>,
    pub restart_backoff: Duration,
    pub max_restart_backoff: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            termination_grace_period: Duration::from_secs(3),
            semaphores: BTreeMap::new(),
            restart_backoff: Duration::from_millis(500),
            max_restart_backoff: Duration::from_secs(30),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let c = &cfg.config;
        Self {
            termination_grace_period: Duration::from_secs(c.termination_grace_period_seconds),
            semaphores: c.semaphores.clone(),
            restart_backoff: seconds(c.restart_backoff_seconds),
            max_restart_backoff: seconds(c.max_restart_backoff_seconds),
        }
    }
}

/// Validation bounds these; saturate rather than panic on anything else.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreOrchestrator;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Orchestrator;
