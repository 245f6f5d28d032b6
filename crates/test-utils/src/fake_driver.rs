use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use kit::dag::Task;
use kit::driver::{DriverFactory, DriverFuture, OutputSink, ProcessDriver};
use kit::errors::KitError;

/// What a fake task does when driven.
#[derive(Debug, Clone)]
pub enum FakeBehaviour {
    /// `run` returns `Ok` after the delay.
    Succeed(Duration),
    /// `run` fails with the message after the delay.
    Fail(Duration, String),
    /// `run` never returns on its own.
    RunForever,
    /// `run` fails after `after` for the first `crashes` attempts, then runs
    /// forever.
    CrashThenRun { crashes: usize, after: Duration },
    /// `init` fails with the message.
    InitFails(String),
    /// `build` fails with the message.
    BuildFails(String),
    /// Like `RunForever`, but `stop` hangs so the caller has to kill.
    IgnoreStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Init,
    Build,
    RunStart,
    RunEnd,
    Stop,
    Kill,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub task: String,
    pub op: Op,
    pub at: Instant,
}

/// Shared, ordered record of every driver call.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn record(&self, task: &str, op: Op) {
        self.entries.lock().unwrap().push(JournalEntry {
            task: task.to_string(),
            op,
            at: Instant::now(),
        });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, task: &str, op: Op) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.task == task && e.op == op)
            .count()
    }

    /// Time of the first `op` recorded for `task`.
    pub fn first(&self, task: &str, op: Op) -> Option<Instant> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.task == task && e.op == op)
            .map(|e| e.at)
    }

    /// Index of the first `op` recorded for `task`.
    pub fn position(&self, task: &str, op: Op) -> Option<usize> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .position(|e| e.task == task && e.op == op)
    }

    /// Tasks in the order their first run started.
    pub fn run_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for e in self.entries.lock().unwrap().iter() {
            if e.op == Op::RunStart && !order.contains(&e.task) {
                order.push(e.task.clone());
            }
        }
        order
    }

    /// Highest number of `tasks` that were inside their run phase at once.
    pub fn max_concurrent_runs(&self, tasks: &[&str]) -> usize {
        let mut current = 0usize;
        let mut max = 0usize;
        for e in self.entries.lock().unwrap().iter() {
            if !tasks.contains(&e.task.as_str()) {
                continue;
            }
            match e.op {
                Op::RunStart => {
                    current += 1;
                    max = max.max(current);
                }
                Op::RunEnd => current = current.saturating_sub(1),
                _ => {}
            }
        }
        max
    }
}

/// A scripted [`ProcessDriver`] that never touches real processes.
pub struct FakeDriver {
    name: String,
    behaviour: FakeBehaviour,
    journal: Journal,
    attempts: Mutex<usize>,
    stop: Mutex<Option<CancellationToken>>,
}

impl FakeDriver {
    pub fn new(name: &str, behaviour: FakeBehaviour, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            journal,
            attempts: Mutex::new(0),
            stop: Mutex::new(None),
        }
    }

    fn next_attempt(&self) -> usize {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        *attempts
    }

    async fn script(&self, attempt: usize) -> kit::errors::Result<()> {
        match &self.behaviour {
            FakeBehaviour::Succeed(delay) => {
                sleep(*delay).await;
                Ok(())
            }
            FakeBehaviour::Fail(delay, message) => {
                sleep(*delay).await;
                Err(KitError::lifecycle(message.clone()))
            }
            FakeBehaviour::CrashThenRun { crashes, after } if attempt <= *crashes => {
                sleep(*after).await;
                Err(KitError::lifecycle(format!("crash #{attempt}")))
            }
            _ => std::future::pending().await,
        }
    }
}

impl ProcessDriver for FakeDriver {
    fn init(&self, cancel: CancellationToken) -> DriverFuture<'_> {
        Box::pin(async move {
            self.journal.record(&self.name, Op::Init);
            if cancel.is_cancelled() {
                return Err(KitError::Cancelled);
            }
            match &self.behaviour {
                FakeBehaviour::InitFails(message) => Err(KitError::lifecycle(message.clone())),
                _ => Ok(()),
            }
        })
    }

    fn build(
        &self,
        cancel: CancellationToken,
        _stdout: OutputSink,
        _stderr: OutputSink,
    ) -> DriverFuture<'_> {
        Box::pin(async move {
            self.journal.record(&self.name, Op::Build);
            if cancel.is_cancelled() {
                return Err(KitError::Cancelled);
            }
            match &self.behaviour {
                FakeBehaviour::BuildFails(message) => Err(KitError::lifecycle(message.clone())),
                _ => Ok(()),
            }
        })
    }

    fn run(
        &self,
        cancel: CancellationToken,
        stdout: OutputSink,
        _stderr: OutputSink,
    ) -> DriverFuture<'_> {
        Box::pin(async move {
            let attempt = self.next_attempt();
            let stop = CancellationToken::new();
            *self.stop.lock().unwrap() = Some(stop.clone());

            self.journal.record(&self.name, Op::RunStart);
            stdout.write_line(&format!("fake run #{attempt}"));

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(KitError::Cancelled),
                _ = stop.cancelled() => Err(KitError::lifecycle("process stopped")),
                res = self.script(attempt) => res,
            };

            self.journal.record(&self.name, Op::RunEnd);
            *self.stop.lock().unwrap() = None;
            result
        })
    }

    fn stop(&self, cancel: CancellationToken, _grace: Duration) -> DriverFuture<'_> {
        Box::pin(async move {
            self.journal.record(&self.name, Op::Stop);
            if matches!(self.behaviour, FakeBehaviour::IgnoreStop) {
                cancel.cancelled().await;
                return Err(KitError::Cancelled);
            }
            if let Some(stop) = self.stop.lock().unwrap().as_ref() {
                stop.cancel();
            }
            Ok(())
        })
    }

    fn kill(&self, _cancel: CancellationToken) -> DriverFuture<'_> {
        Box::pin(async move {
            self.journal.record(&self.name, Op::Kill);
            if let Some(stop) = self.stop.lock().unwrap().as_ref() {
                stop.cancel();
            }
            Ok(())
        })
    }
}

/// Hands out [`FakeDriver`]s with per-task behaviour; unscripted tasks
/// succeed after 10ms.
#[derive(Clone, Default)]
pub struct FakeDriverFactory {
    behaviours: Arc<Mutex<HashMap<String, FakeBehaviour>>>,
    journal: Journal,
}

impl FakeDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, task: &str, behaviour: FakeBehaviour) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(task.to_string(), behaviour);
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl DriverFactory for FakeDriverFactory {
    fn create(&self, task: &Arc<Task>) -> Arc<dyn ProcessDriver> {
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(task.name())
            .cloned()
            .unwrap_or(FakeBehaviour::Succeed(Duration::from_millis(10)));
        Arc::new(FakeDriver::new(task.name(), behaviour, self.journal.clone()))
    }
}
