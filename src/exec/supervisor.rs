// src/exec/supervisor.rs

//! Per-task supervisor.
//!
//! One supervisor runs for each launched task. It drives the task's
//! [`ProcessDriver`] through init → (admit → build → run)*, reports every
//! lifecycle change to the core as a [`TaskEvent`], and runs the stop path
//! once its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::AdmissionControl;
use crate::dag::Task;
use crate::driver::{OutputSink, ProcessDriver};
use crate::engine::{RuntimeEvent, TaskEvent, TaskName};
use crate::errors::{KitError, Result};
use crate::probe::{ProbeChecker, ProbeKind, run_probe_loop};
use crate::status::{REASON_ERROR, REASON_EXITED, REASON_STOPPING};
use crate::types::TaskKind;

/// Delay before restarting a crashed service: starts at `initial` and
/// doubles up to `max`.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Everything a supervisor needs; built by the orchestrator shell.
pub struct SupervisorContext {
    pub task: Arc<Task>,
    pub driver: Arc<dyn ProcessDriver>,
    pub admission: Arc<AdmissionControl>,
    pub checker: Arc<dyn ProbeChecker>,
    pub events: mpsc::Sender<RuntimeEvent>,
    /// This task's node token (child of the run's root token).
    pub cancel: CancellationToken,
    /// Signalled by the shell when the liveness probe fails.
    pub unhealthy: Arc<Notify>,
    pub grace: Duration,
    pub backoff: RestartBackoff,
}

/// How one admit → build → run attempt ended.
enum Attempt {
    /// The run step returned cleanly.
    Exited,
    Failed(KitError),
    /// Cancelled while running; carries the outcome of the stop path.
    Stopped(Result<()>),
}

/// Supervise one task until it is terminal or cancelled.
pub async fn supervise(mut ctx: SupervisorContext) {
    let name = ctx.task.name().to_string();
    info!(task = %name, kind = %ctx.task.kind(), "supervisor started");

    // Probe loops live for as long as the supervisor does.
    let probes = ctx.cancel.child_token();
    let _probes_guard = probes.clone().drop_guard();
    ctx.start_probes(&probes);

    ctx.report(TaskEvent::Waiting {
        reason: "initializing".into(),
    })
    .await;

    if let Err(err) = ctx.driver.init(ctx.cancel.clone()).await {
        if err.is_cancelled() || ctx.cancel.is_cancelled() {
            ctx.shutdown().await;
        } else {
            ctx.report(TaskEvent::Failed {
                message: format!("init: {err}"),
            })
            .await;
        }
        return;
    }

    loop {
        let started = Instant::now();
        let attempt = ctx.attempt().await;

        let message = match (ctx.task.kind(), attempt) {
            (_, Attempt::Stopped(stopped)) => {
                ctx.report_stopped(stopped).await;
                return;
            }
            _ if ctx.cancel.is_cancelled() => {
                ctx.shutdown().await;
                return;
            }
            (TaskKind::Job, Attempt::Exited) => {
                ctx.report(TaskEvent::Succeeded).await;
                return;
            }
            (TaskKind::Job, Attempt::Failed(err)) => {
                ctx.report(TaskEvent::Failed {
                    message: err.to_string(),
                })
                .await;
                return;
            }
            (TaskKind::Service, Attempt::Exited) => "exited unexpectedly".to_string(),
            (TaskKind::Service, Attempt::Failed(err)) => err.to_string(),
        };

        ctx.report(TaskEvent::Crashed { message }).await;

        if started.elapsed() >= ctx.backoff.max() {
            ctx.backoff.reset();
        }
        let delay = ctx.backoff.next_delay();
        info!(task = %name, delay = ?delay, "restarting service after backoff");

        ctx.report(TaskEvent::Waiting {
            reason: "restarting".into(),
        })
        .await;
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                ctx.shutdown().await;
                return;
            }
            _ = sleep(delay) => {}
        }
    }
}

impl SupervisorContext {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn start_probes(&self, cancel: &CancellationToken) {
        let probes = [
            (ProbeKind::Liveness, self.task.liveness_probe()),
            (ProbeKind::Readiness, self.task.readiness_probe()),
        ];
        for (kind, probe) in probes {
            let Some(probe) = probe else { continue };
            tokio::spawn(run_probe_loop(
                self.name().to_string(),
                kind,
                probe.clone(),
                Arc::clone(&self.checker),
                cancel.clone(),
                self.events.clone(),
            ));
        }
    }

    async fn report(&self, event: TaskEvent) {
        let name: TaskName = self.name().to_string();
        if self.events.send(RuntimeEvent::task(name, event)).await.is_err() {
            debug!(task = %self.name(), "orchestrator gone; dropping task event");
        }
    }

    /// One admit → build → run cycle. Admission is held until run returns.
    async fn attempt(&self) -> Attempt {
        let (stdout, stderr) = OutputSink::pair(self.name());

        if self.task.needs_admission() {
            self.report(TaskEvent::Waiting {
                reason: "admission".into(),
            })
            .await;
        }
        let guard = match self.admission.admit(&self.task, &self.cancel).await {
            Ok(guard) => guard,
            Err(err) => return Attempt::Failed(err),
        };

        self.report(TaskEvent::Waiting {
            reason: "building".into(),
        })
        .await;
        if let Err(err) = self
            .driver
            .build(self.cancel.clone(), stdout.clone(), stderr.clone())
            .await
        {
            return Attempt::Failed(prefixed("build", err));
        }

        self.report(TaskEvent::Running).await;
        let attempt = self.run_phase(stdout, stderr).await;
        self.admission.release(guard);
        attempt
    }

    /// Run the process until it exits, the task is cancelled, or the
    /// liveness probe fails.
    ///
    /// The run step gets its own token, cancelled only after `stop` had its
    /// grace period. Cancelling it is the last resort.
    async fn run_phase(&self, stdout: OutputSink, stderr: OutputSink) -> Attempt {
        let hard_cancel = CancellationToken::new();
        let run = self.driver.run(hard_cancel.clone(), stdout, stderr);
        tokio::pin!(run);

        tokio::select! {
            res = &mut run => match res {
                Ok(()) => Attempt::Exited,
                Err(err) => Attempt::Failed(err),
            },
            _ = self.cancel.cancelled() => {
                self.report(TaskEvent::Waiting {
                    reason: REASON_STOPPING.into(),
                })
                .await;
                let stopped = self.stop_process().await;
                self.finish_run(&hard_cancel, &mut run).await;
                Attempt::Stopped(stopped)
            }
            // Only wakes while this run is in progress; stop requests that
            // arrive between attempts are dropped.
            _ = self.unhealthy.notified() => {
                warn!(task = %self.name(), "liveness probe failed; stopping current run");
                if let Err(err) = self.stop_process().await {
                    warn!(task = %self.name(), error = %err, "failed to stop unhealthy task");
                }
                self.finish_run(&hard_cancel, &mut run).await;
                Attempt::Failed(KitError::lifecycle("liveness probe failed"))
            }
        }
    }

    /// Let the run step return after the process was stopped or killed.
    async fn finish_run<F>(&self, hard_cancel: &CancellationToken, run: &mut F)
    where
        F: std::future::Future<Output = Result<()>> + Unpin,
    {
        hard_cancel.cancel();
        if timeout(self.grace, run).await.is_err() {
            warn!(task = %self.name(), "run step did not return after stop");
        }
    }

    /// Stop bounded by the grace period, falling back to kill. Returns the
    /// stop error, if any, even when the kill succeeded.
    async fn stop_process(&self) -> Result<()> {
        let stopped = match timeout(
            self.grace,
            self.driver.stop(CancellationToken::new(), self.grace),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(KitError::lifecycle(format!(
                "stop timed out after {}s",
                self.grace.as_secs_f64()
            ))),
        };

        if let Err(err) = &stopped {
            warn!(task = %self.name(), error = %err, "stop failed; killing");
            match timeout(self.grace, self.driver.kill(CancellationToken::new())).await {
                Ok(Ok(())) => {}
                Ok(Err(kill_err)) => {
                    warn!(task = %self.name(), error = %kill_err, "kill failed");
                }
                Err(_) => warn!(task = %self.name(), "kill timed out"),
            }
        }
        stopped
    }

    /// Cancellation path: report stopping, stop the process, report the
    /// final state.
    async fn shutdown(&self) {
        self.report(TaskEvent::Waiting {
            reason: REASON_STOPPING.into(),
        })
        .await;
        let stopped = self.stop_process().await;
        self.report_stopped(stopped).await;
    }

    /// Report the final state after the stop path ran.
    async fn report_stopped(&self, stopped: Result<()>) {
        let (reason, message) = match stopped {
            Ok(()) => (REASON_EXITED, None),
            Err(err) => (REASON_ERROR, Some(err.to_string())),
        };
        info!(task = %self.name(), reason, "task stopped");
        self.report(TaskEvent::Terminated {
            reason: reason.into(),
            message,
        })
        .await;
    }
}

fn prefixed(step: &str, err: KitError) -> KitError {
    match err {
        KitError::Cancelled => KitError::Cancelled,
        other => KitError::lifecycle(format!("{step}: {other}")),
    }
}
