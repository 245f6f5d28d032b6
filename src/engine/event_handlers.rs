// src/engine/event_handlers.rs

//! Event handling logic for the core orchestrator.

use tracing::{debug, info, warn};

use crate::dag::{ScheduledTask, Scheduler};
use crate::engine::{TaskEvent, TaskName};
use crate::errors::{KitError, Result};
use crate::probe::{ProbeKind, ProbeUpdate};
use crate::status::{
    REASON_ERROR, REASON_EXITED, REASON_SKIPPED, REASON_SUCCESS, StatusStore, TaskState,
};
use crate::types::TaskPhase;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Start a supervisor for each of these tasks.
    Launch(Vec<ScheduledTask>),
    /// The task's liveness probe failed; its supervisor must stop the
    /// current run.
    StopUnhealthy(TaskName),
    /// Every task is terminal; the shell should return.
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Handle a lifecycle report from a supervisor.
pub fn handle_task_event(
    scheduler: &mut Scheduler,
    status: &StatusStore,
    task: TaskName,
    event: TaskEvent,
) -> Result<CoreStep> {
    let node = scheduler.node_mut(&task)?;

    match event {
        TaskEvent::Waiting { reason } => {
            // A crashed service coming back for another attempt.
            if node.phase() == TaskPhase::Failed {
                node.transition(TaskPhase::Waiting, reason.as_str());
            }
            debug!(task = %task, reason = %reason, "task waiting");
            status.set_state(&task, TaskState::waiting(reason), None);
        }
        TaskEvent::Running => {
            node.transition(TaskPhase::Running, "");
            info!(task = %task, "task running");
            status.set_state(&task, TaskState::Running, None);
        }
        TaskEvent::Succeeded => {
            node.transition(TaskPhase::Succeeded, REASON_SUCCESS);
            info!(task = %task, "task succeeded");
            status.set_state(&task, TaskState::terminated(REASON_SUCCESS), None);
        }
        TaskEvent::Failed { message } => {
            node.transition(TaskPhase::Failed, message.as_str());
            warn!(task = %task, error = %message, "task failed");
            status.set_state(&task, TaskState::terminated(REASON_ERROR), Some(message));
            skip_dependents(scheduler, status, &task);
        }
        TaskEvent::Crashed { message } => {
            node.transition(TaskPhase::Failed, message.as_str());
            warn!(task = %task, error = %message, "service crashed");
            status.set_state(&task, TaskState::terminated(REASON_ERROR), Some(message));
        }
        TaskEvent::Terminated { reason, message } => {
            if !node.phase().is_terminal() {
                node.transition(TaskPhase::Failed, reason.as_str());
            }
            info!(task = %task, reason = %reason, "task terminated");
            status.update(&task, |s| {
                s.state = TaskState::terminated(reason);
                s.message = message;
                s.ready = false;
            });
        }
        TaskEvent::SupervisorExited { error } => {
            node.release();
            if let Some(error) = error {
                if !node.phase().is_terminal() {
                    node.transition(TaskPhase::Failed, error.as_str());
                }
                warn!(task = %task, error = %error, "supervisor ended abnormally");
                status.update(&task, |s| {
                    s.state = TaskState::terminated(REASON_ERROR);
                    s.message = Some(error);
                    s.ready = false;
                });
            }
        }
    }

    Ok(finish_step(scheduler, status, Vec::new()))
}

/// Handle a probe transition or transport error.
pub fn handle_probe_event(
    scheduler: &mut Scheduler,
    status: &StatusStore,
    task: TaskName,
    kind: ProbeKind,
    update: ProbeUpdate,
) -> Result<CoreStep> {
    let phase = scheduler
        .phase_of(&task)
        .ok_or_else(|| KitError::TaskNotFound(task.clone()))?;
    let mut commands = Vec::new();

    match (kind, update) {
        (_, ProbeUpdate::Error(message)) => {
            debug!(task = %task, probe = %kind, error = %message, "probe check failed");
        }
        (ProbeKind::Readiness, ProbeUpdate::Changed(ready)) => {
            info!(task = %task, ready, "readiness changed");
            status.set_ready(&task, ready);
        }
        (ProbeKind::Liveness, ProbeUpdate::Changed(true)) => {
            info!(task = %task, "liveness probe passing");
        }
        (ProbeKind::Liveness, ProbeUpdate::Changed(false)) => {
            if phase == TaskPhase::Running && !scheduler.is_stopping() {
                warn!(task = %task, "liveness probe failing; stopping task");
                commands.push(CoreCommand::StopUnhealthy(task));
            }
        }
    }

    Ok(finish_step(scheduler, status, commands))
}

/// Stop launching, cancel every supervisor and close out tasks that never
/// started.
pub fn handle_shutdown(scheduler: &mut Scheduler, status: &StatusStore) -> CoreStep {
    info!(active = scheduler.active_count(), "shutting down");
    scheduler.begin_shutdown();

    for name in scheduler.abandon_pending("cancelled before start") {
        status.set_state(
            &name,
            TaskState::terminated(REASON_EXITED),
            Some("cancelled before start".to_string()),
        );
    }

    finish_step(scheduler, status, Vec::new())
}

/// Launch whatever became eligible and decide whether the run is over.
pub fn finish_step(
    scheduler: &mut Scheduler,
    status: &StatusStore,
    mut commands: Vec<CoreCommand>,
) -> CoreStep {
    let ready = scheduler.collect_ready();
    if !ready.is_empty() {
        for task in &ready {
            status.set_state(task.name(), TaskState::waiting("starting"), None);
        }
        commands.push(CoreCommand::Launch(ready));
    }

    let keep_running = !scheduler.all_terminal();
    if !keep_running {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

fn skip_dependents(scheduler: &mut Scheduler, status: &StatusStore, failed: &str) {
    for name in scheduler.mark_dependents_skipped(failed) {
        let message = scheduler
            .node(&name)
            .map(|n| n.message().to_string())
            .unwrap_or_default();
        info!(task = %name, upstream = %failed, "task skipped");
        status.set_state(&name, TaskState::terminated(REASON_SKIPPED), Some(message));
    }
}
