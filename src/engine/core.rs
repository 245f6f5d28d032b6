// src/engine/core.rs

//! Pure core orchestrator state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`RuntimeEvent`]s and produces:
//! - updated node state and status records
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell ([`crate::engine::runtime::Orchestrator`]) is responsible
//! for reading events, spawning supervisors, delivering liveness failures
//! and enforcing the shutdown deadline.
//!
//! The core can be unit tested without processes, sockets or timers.

use tokio_util::sync::CancellationToken;

use crate::dag::{Scheduler, TaskCatalog};
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, finish_step, handle_probe_event, handle_shutdown, handle_task_event,
};
use crate::errors::{KitError, Result};
use crate::status::StatusStore;

/// Pure core orchestrator state.
///
/// The only writer of task nodes and of the [`StatusStore`].
#[derive(Debug)]
pub struct CoreOrchestrator {
    scheduler: Scheduler,
    status: StatusStore,
    /// Set once shutdown was requested; the run then counts as cancelled.
    cancelled: bool,
}

impl CoreOrchestrator {
    /// `root` is the run-wide cancellation token; every node's token is a
    /// child of it.
    pub fn new(catalog: TaskCatalog, root: CancellationToken) -> Self {
        let status = StatusStore::with_tasks(catalog.names());
        Self {
            scheduler: Scheduler::new(catalog, root),
            status,
            cancelled: false,
        }
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Initial scan: launch every task with no blocked dependency.
    pub fn start(&mut self) -> CoreStep {
        finish_step(&mut self.scheduler, &self.status, Vec::new())
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    ///
    /// Events naming unknown tasks are rejected with
    /// [`KitError::TaskNotFound`].
    pub fn step(&mut self, event: RuntimeEvent) -> Result<CoreStep> {
        match event {
            RuntimeEvent::Task { task, event } => {
                handle_task_event(&mut self.scheduler, &self.status, task, event)
            }
            RuntimeEvent::Probe { task, kind, update } => {
                handle_probe_event(&mut self.scheduler, &self.status, task, kind, update)
            }
            RuntimeEvent::ShutdownRequested => {
                self.cancelled = true;
                Ok(handle_shutdown(&mut self.scheduler, &self.status))
            }
        }
    }

    /// Result of the whole run once it is over.
    ///
    /// A cancelled run is never reported as failed.
    pub fn outcome(&self) -> Result<()> {
        if self.cancelled {
            return Ok(());
        }
        let failed = self.scheduler.failed_tasks();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(KitError::TasksFailed(failed))
        }
    }
}
