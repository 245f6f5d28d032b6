// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionControl;
use crate::config::validate::MAX_CONFIG_SECONDS;
use crate::dag::{ScheduledTask, TaskCatalog};
use crate::driver::DriverFactory;
use crate::errors::{KitError, Result};
use crate::exec::{RestartBackoff, SupervisorContext, supervise};
use crate::probe::ProbeChecker;
use crate::status::StatusStore;

use super::core::CoreOrchestrator;
use super::{CoreCommand, OrchestratorOptions, RuntimeEvent, TaskEvent, TaskName};

/// Extra time, on top of the grace period, before lingering supervisors are
/// aborted during shutdown.
pub const SHUTDOWN_SLACK: Duration = Duration::from_secs(2);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runs one orchestrator run: feeds `RuntimeEvent`s into the
/// [`CoreOrchestrator`] and carries out the commands it returns.
///
/// This is a pure IO shell; all scheduling semantics live in the core.
pub struct Orchestrator {
    core: CoreOrchestrator,
    options: OrchestratorOptions,
    drivers: Arc<dyn DriverFactory>,
    checker: Arc<dyn ProbeChecker>,
    admission: Arc<AdmissionControl>,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Outer futures that resolve once the matching supervisor ends.
    supervisors: JoinSet<(TaskName, std::result::Result<(), JoinError>)>,
    aborts: HashMap<TaskName, AbortHandle>,
    unhealthy: HashMap<TaskName, Arc<Notify>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("core", &self.core)
            .field("options", &self.options)
            .field("active", &self.aborts.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// `cancel` is the run's root token: cancelling it shuts everything down.
    pub fn new(
        catalog: TaskCatalog,
        options: OrchestratorOptions,
        drivers: Arc<dyn DriverFactory>,
        checker: Arc<dyn ProbeChecker>,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let admission = Arc::new(AdmissionControl::new(&options.semaphores));
        Self {
            core: CoreOrchestrator::new(catalog, cancel.child_token()),
            options,
            drivers,
            checker,
            admission,
            cancel,
            event_tx,
            event_rx,
            supervisors: JoinSet::new(),
            aborts: HashMap::new(),
            unhealthy: HashMap::new(),
        }
    }

    /// Live status view; stays valid after `run` returns.
    pub fn status(&self) -> StatusStore {
        self.core.status().clone()
    }

    /// Sender for injecting events, e.g. [`RuntimeEvent::ShutdownRequested`].
    pub fn events(&self) -> mpsc::Sender<RuntimeEvent> {
        self.event_tx.clone()
    }

    /// Main event loop.
    ///
    /// Returns once every task is terminal with no supervisor left. After a
    /// cancellation that is `Ok(())`; otherwise failed jobs turn into
    /// [`KitError::TasksFailed`].
    pub async fn run(mut self) -> Result<()> {
        info!(tasks = self.core.scheduler().catalog().len(), "orchestrator started");

        let step = self.core.start();
        let mut keep_running = self.execute(step.commands, step.keep_running);

        let mut deadline: Option<Instant> = None;
        let mut aborted = false;

        while keep_running {
            let step = tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if deadline.is_none() => {
                    info!("cancellation requested; stopping all tasks");
                    deadline = Some(shutdown_deadline(self.options.termination_grace_period));
                    self.core.step(RuntimeEvent::ShutdownRequested)
                }

                Some(event) = self.event_rx.recv() => {
                    if matches!(event, RuntimeEvent::ShutdownRequested) {
                        self.cancel.cancel();
                        continue;
                    }
                    debug!(?event, "orchestrator received event");
                    self.core.step(event)
                }

                Some(joined) = self.supervisors.join_next() => {
                    let (task, res) = match joined {
                        Ok(done) => done,
                        Err(err) => {
                            error!(error = %err, "supervisor watcher failed");
                            continue;
                        }
                    };
                    self.aborts.remove(&task);
                    self.unhealthy.remove(&task);
                    let error = res.err().map(|err| {
                        if err.is_panic() {
                            "supervisor panicked".to_string()
                        } else {
                            "aborted after grace period".to_string()
                        }
                    });
                    self.core.step(RuntimeEvent::task(task, TaskEvent::SupervisorExited { error }))
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() && !aborted => {
                    warn!(remaining = self.aborts.len(), "grace period elapsed; aborting remaining supervisors");
                    aborted = true;
                    for handle in self.aborts.values() {
                        handle.abort();
                    }
                    continue;
                }
            };

            match step {
                Ok(step) => keep_running = self.execute(step.commands, step.keep_running),
                Err(err) => return Err(self.fail(err).await),
            }
        }

        info!("orchestrator exiting");
        self.core.outcome()
    }

    /// Execute the commands from one core step. Returns whether to keep
    /// running.
    fn execute(&mut self, commands: Vec<CoreCommand>, keep_running: bool) -> bool {
        for command in commands {
            match command {
                CoreCommand::Launch(tasks) => {
                    for task in tasks {
                        self.spawn_supervisor(task);
                    }
                }
                CoreCommand::StopUnhealthy(task) => match self.unhealthy.get(&task) {
                    Some(notify) => notify.notify_waiters(),
                    None => debug!(task = %task, "no active supervisor to stop"),
                },
                CoreCommand::RequestExit => {
                    info!("all tasks finished");
                }
            }
        }
        keep_running
    }

    fn spawn_supervisor(&mut self, scheduled: ScheduledTask) {
        let name = scheduled.name().to_string();
        let unhealthy = Arc::new(Notify::new());

        let ctx = SupervisorContext {
            driver: self.drivers.create(&scheduled.task),
            task: scheduled.task,
            admission: Arc::clone(&self.admission),
            checker: Arc::clone(&self.checker),
            events: self.event_tx.clone(),
            cancel: scheduled.cancel,
            unhealthy: Arc::clone(&unhealthy),
            grace: self.options.termination_grace_period,
            backoff: RestartBackoff::new(
                self.options.restart_backoff,
                self.options.max_restart_backoff,
            ),
        };

        debug!(task = %name, "spawning supervisor");
        let handle = tokio::spawn(supervise(ctx));
        self.aborts.insert(name.clone(), handle.abort_handle());
        self.unhealthy.insert(name.clone(), unhealthy);
        self.supervisors.spawn(async move { (name, handle.await) });
    }

    /// Tear everything down after an internal error.
    async fn fail(&mut self, err: KitError) -> KitError {
        error!(error = %err, "orchestrator invariant violated; aborting run");
        self.cancel.cancel();
        for handle in self.aborts.values() {
            handle.abort();
        }
        while self.supervisors.join_next().await.is_some() {}
        err
    }
}

/// When a cancelled run stops waiting for supervisors and aborts them.
fn shutdown_deadline(grace: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(grace.saturating_add(SHUTDOWN_SLACK))
        .unwrap_or_else(|| now + Duration::from_secs(MAX_CONFIG_SECONDS))
}
