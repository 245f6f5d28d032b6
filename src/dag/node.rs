// src/dag/node.rs

//! Per-task runtime state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dag::task::Task;
use crate::types::{TaskKind, TaskPhase};

/// Runtime state of one task within an orchestrator run.
///
/// Owned exclusively by the scheduler; nothing else mutates it.
#[derive(Debug)]
pub struct TaskNode {
    task: Arc<Task>,
    phase: TaskPhase,
    /// Human-readable reason for the current phase, e.g. "exit status 1".
    message: String,
    /// Present exactly while a supervisor is active for this node.
    cancel: Option<CancellationToken>,
}

impl TaskNode {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            phase: TaskPhase::Waiting,
            message: String::new(),
            cancel: None,
        }
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether dependents of this task must keep waiting.
    ///
    /// A service unblocks dependents once it is running (it never completes);
    /// a job only once it has succeeded.
    pub fn blocked(&self) -> bool {
        match self.task.kind() {
            TaskKind::Service => self.phase != TaskPhase::Running,
            TaskKind::Job => self.phase != TaskPhase::Succeeded,
        }
    }

    /// Whether a supervisor is currently active for this node.
    pub fn is_launched(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal() && !self.is_launched()
    }

    /// Mark the node as launched, returning the cancellation handle for its
    /// supervisor (a child of `parent`).
    pub fn launch(&mut self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.cancel = Some(token.clone());
        token
    }

    /// Forget the supervisor handle once the supervisor has finished.
    pub fn release(&mut self) {
        self.cancel = None;
    }

    /// Cancel the active supervisor, if any. The handle is kept until the
    /// supervisor reports back.
    pub fn cancel(&self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }

    /// Apply a phase transition.
    ///
    /// Allowed: waiting→running, waiting→failed, running→succeeded,
    /// running→failed, and failed→waiting (deliberate restart). Re-entering
    /// the current phase only updates the message. Returns `false` and leaves
    /// the node untouched for anything else.
    pub fn transition(&mut self, to: TaskPhase, message: impl Into<String>) -> bool {
        use TaskPhase::*;

        let allowed = self.phase == to
            || matches!(
                (self.phase, to),
                (Waiting, Running)
                    | (Waiting, Failed)
                    | (Running, Succeeded)
                    | (Running, Failed)
                    | (Failed, Waiting)
            );

        if allowed {
            self.phase = to;
            self.message = message.into();
        }
        allowed
    }
}
