// src/driver/mod.rs

//! Process driver abstraction.
//!
//! The orchestrator never touches processes directly. Each task gets its own
//! [`ProcessDriver`] from a [`DriverFactory`], and the supervisor walks it
//! through `init` → (`build` → `run`)* → `stop` / `kill`.
//!
//! - [`host`] runs tasks as plain host processes via `tokio::process`.
//! - Tests plug in a scripted driver (see the `kit-test-utils` crate).

pub mod host;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dag::Task;
use crate::engine::TaskName;
use crate::errors::Result;

pub use host::{HostDriverFactory, HostProcessDriver};

/// Boxed future returned by every driver operation.
pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Lifecycle operations for one task's process.
///
/// Every operation observes its cancellation token and returns
/// [`crate::errors::KitError::Cancelled`] when it fires before completion.
pub trait ProcessDriver: Send + Sync {
    /// One-time preparation before the first build.
    fn init(&self, cancel: CancellationToken) -> DriverFuture<'_>;

    /// Prepare an attempt (called before every run, including restarts).
    fn build(
        &self,
        cancel: CancellationToken,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> DriverFuture<'_>;

    /// Run the process until it exits. `Ok` means a clean exit.
    fn run(
        &self,
        cancel: CancellationToken,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> DriverFuture<'_>;

    /// Ask the current process to stop, waiting at most `grace`.
    fn stop(&self, cancel: CancellationToken, grace: Duration) -> DriverFuture<'_>;

    /// Terminate the current process without waiting.
    fn kill(&self, cancel: CancellationToken) -> DriverFuture<'_>;
}

/// Creates one driver per launched task.
pub trait DriverFactory: Send + Sync {
    fn create(&self, task: &Arc<Task>) -> Arc<dyn ProcessDriver>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Where a driver writes process output. Lines end up in the log under the
/// `kit::output` target, tagged with the task and stream.
#[derive(Debug, Clone)]
pub struct OutputSink {
    task: TaskName,
    stream: OutputStream,
}

impl OutputSink {
    pub fn new(task: impl Into<TaskName>, stream: OutputStream) -> Self {
        Self {
            task: task.into(),
            stream,
        }
    }

    /// The stdout/stderr pair for a task.
    pub fn pair(task: &str) -> (Self, Self) {
        (
            Self::new(task, OutputStream::Stdout),
            Self::new(task, OutputStream::Stderr),
        )
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn stream(&self) -> OutputStream {
        self.stream
    }

    pub fn write_line(&self, line: &str) {
        info!(target: "kit::output", task = %self.task, stream = %self.stream, "{}", line);
    }
}
