// src/driver/host.rs

//! Host process driver: runs a task's command directly on this machine.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::dag::{CommandSpec, Task};
use crate::driver::{DriverFactory, DriverFuture, OutputSink, ProcessDriver};
use crate::engine::TaskName;
use crate::errors::{KitError, Result};

/// Handle on the process currently started by `run`.
#[derive(Debug, Clone)]
struct ActiveChild {
    /// Also the process group id; the child leads its own group.
    pid: Option<u32>,
    /// Cancelled by `kill` to make `run` SIGKILL the child.
    force: CancellationToken,
    /// Flips to `true` (or closes) once `run` has reaped the child.
    exited: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HostProcessDriver {
    task: TaskName,
    spec: CommandSpec,
    active: Mutex<Option<ActiveChild>>,
}

impl HostProcessDriver {
    pub fn new(task: impl Into<TaskName>, spec: CommandSpec) -> Self {
        Self {
            task: task.into(),
            spec,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> Option<ActiveChild> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, child: Option<ActiveChild>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = child;
    }

    fn command(&self) -> Result<Command> {
        let (program, leading) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| KitError::lifecycle(format!("task '{}' has no command", self.task)))?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so signals reach everything the command forks.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    async fn check_ports(&self) -> Result<()> {
        for &port in &self.spec.ports {
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
                Ok(listener) => drop(listener),
                Err(err) => {
                    return Err(KitError::lifecycle(format!(
                        "port {port} is not free: {err}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn wait_child(
        &self,
        child: &mut Child,
        cancel: CancellationToken,
        force: CancellationToken,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<()> {
        if let Some(out) = child.stdout.take() {
            tokio::spawn(pump_lines(out, stdout));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(pump_lines(err, stderr));
        }

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                debug!(task = %self.task, %status, "host process exited");
                if status.success() {
                    Ok(())
                } else {
                    Err(KitError::lifecycle(match status.code() {
                        Some(code) => format!("exit status {code}"),
                        None => "terminated by signal".to_string(),
                    }))
                }
            }
            _ = cancel.cancelled() => {
                kill_child(&self.task, child).await;
                Err(KitError::Cancelled)
            }
            _ = force.cancelled() => {
                kill_child(&self.task, child).await;
                Err(KitError::lifecycle("process killed"))
            }
        }
    }
}

/// SIGKILL the child's process group, then the child itself.
async fn kill_child(task: &str, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if let Err(err) = signal_group(pid, Signal::SIGKILL) {
            warn!(task = %task, error = %err, "failed to kill process group");
        }
    }
    if let Err(err) = child.kill().await {
        warn!(task = %task, error = %err, "failed to kill host process");
    }
}

/// Send `signal` to the process group led by `pid`. A group that is
/// already gone is not an error.
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| KitError::lifecycle(format!("pid {pid} is out of range")))?;
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(KitError::lifecycle(format!(
            "failed to send {signal} to process group {pid}: {errno}"
        ))),
    }
}

async fn wait_exited(mut exited: watch::Receiver<bool>) {
    // A closed channel means `run` is gone, which counts as exited.
    let _ = exited.wait_for(|done| *done).await;
}

async fn pump_lines<R>(reader: R, sink: OutputSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.write_line(&line);
    }
}

impl ProcessDriver for HostProcessDriver {
    fn init(&self, cancel: CancellationToken) -> DriverFuture<'_> {
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(KitError::Cancelled),
                res = self.check_ports() => res,
            }
        })
    }

    fn build(
        &self,
        cancel: CancellationToken,
        _stdout: OutputSink,
        _stderr: OutputSink,
    ) -> DriverFuture<'_> {
        // Host commands run as-is; nothing to build.
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(KitError::Cancelled);
            }
            Ok(())
        })
    }

    fn run(
        &self,
        cancel: CancellationToken,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> DriverFuture<'_> {
        Box::pin(async move {
            let mut child = self.command()?.spawn().map_err(|err| {
                KitError::lifecycle(format!("failed to start '{}': {err}", self.spec.display()))
            })?;
            let pid = child.id();
            info!(
                task = %self.task,
                pid = pid.unwrap_or_default(),
                cmd = %self.spec.display(),
                "started host process"
            );

            let force = CancellationToken::new();
            let (exited_tx, exited_rx) = watch::channel(false);
            self.set_active(Some(ActiveChild {
                pid,
                force: force.clone(),
                exited: exited_rx,
            }));

            let result = self
                .wait_child(&mut child, cancel, force, stdout, stderr)
                .await;

            self.set_active(None);
            let _ = exited_tx.send(true);
            result
        })
    }

    /// SIGTERM the process group and wait up to `grace` for the child to
    /// exit. Escalation is left to `kill`.
    fn stop(&self, cancel: CancellationToken, grace: Duration) -> DriverFuture<'_> {
        Box::pin(async move {
            let Some(child) = self.active() else {
                return Ok(());
            };
            if let Some(pid) = child.pid {
                self.terminate(pid)?;
            }

            tokio::select! {
                _ = cancel.cancelled() => Err(KitError::Cancelled),
                res = tokio::time::timeout(grace, wait_exited(child.exited)) => match res {
                    Ok(()) => Ok(()),
                    Err(_) => Err(KitError::lifecycle(format!(
                        "process did not exit within {}s",
                        grace.as_secs_f64()
                    ))),
                },
            }
        })
    }

    fn kill(&self, cancel: CancellationToken) -> DriverFuture<'_> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(KitError::Cancelled);
            }
            // `run` SIGKILLs the whole group once it sees the token.
            if let Some(child) = self.active() {
                child.force.cancel();
            }
            Ok(())
        })
    }
}

impl HostProcessDriver {
    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<()> {
        debug!(task = %self.task, pid, "sending SIGTERM to process group");
        signal_group(pid, Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&self, _pid: u32) -> Result<()> {
        Err(KitError::lifecycle(
            "graceful stop is not supported on this platform",
        ))
    }
}

/// Creates a [`HostProcessDriver`] per task from its [`CommandSpec`].
#[derive(Debug, Clone, Default)]
pub struct HostDriverFactory;

impl DriverFactory for HostDriverFactory {
    fn create(&self, task: &Arc<Task>) -> Arc<dyn ProcessDriver> {
        Arc::new(HostProcessDriver::new(task.name(), task.command().clone()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            command: vec!["sh".into(), "-c".into()],
            args: vec![script.into()],
            ..Default::default()
        }
    }

    fn sinks() -> (OutputSink, OutputSink) {
        OutputSink::pair("t")
    }

    #[tokio::test]
    async fn clean_exit_is_ok() {
        let driver = HostProcessDriver::new("t", sh("echo hello"));
        let (out, err) = sinks();
        driver.run(CancellationToken::new(), out, err).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_lifecycle_error() {
        let driver = HostProcessDriver::new("t", sh("exit 3"));
        let (out, err) = sinks();
        let res = driver.run(CancellationToken::new(), out, err).await;
        assert!(matches!(res, Err(KitError::Lifecycle(msg)) if msg == "exit status 3"));
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sh("test \"$KIT_TEST\" = yes && test \"$(pwd)\" = \"$EXPECTED\"");
        spec.env.insert("KIT_TEST".into(), "yes".into());
        let expected = dir.path().canonicalize().unwrap();
        spec.env
            .insert("EXPECTED".into(), expected.to_string_lossy().into_owned());
        spec.working_dir = Some(expected);

        let driver = HostProcessDriver::new("t", spec);
        let (out, err) = sinks();
        driver.run(CancellationToken::new(), out, err).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let driver = HostProcessDriver::new("t", sh("sleep 30"));
        let cancel = CancellationToken::new();
        let (out, err) = sinks();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), driver.run(cancel, out, err))
            .await
            .unwrap();
        assert!(res.unwrap_err().is_cancelled());
    }

    fn spawn_run(driver: &Arc<HostProcessDriver>) -> tokio::task::JoinHandle<Result<()>> {
        let driver = Arc::clone(driver);
        tokio::spawn(async move {
            let (out, err) = OutputSink::pair("t");
            driver.run(CancellationToken::new(), out, err).await
        })
    }

    async fn wait_for_file(path: &std::path::Path) {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn stop_ends_a_running_process_within_grace() {
        let driver = Arc::new(HostProcessDriver::new("t", sh("sleep 30")));
        let runner = spawn_run(&driver);

        while driver.active().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        driver
            .stop(CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap();

        let res = runner.await.unwrap();
        assert!(matches!(res, Err(KitError::Lifecycle(msg)) if msg == "terminated by signal"));
    }

    #[tokio::test]
    async fn stop_lets_the_term_handler_run() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let marker = dir.path().join("bye");
        let mut spec = sh(
            "trap 'echo bye > \"$MARKER\"; exit 0' TERM; touch \"$READY\"; \
             while true; do sleep 0.1; done",
        );
        spec.env
            .insert("READY".into(), ready.to_string_lossy().into_owned());
        spec.env
            .insert("MARKER".into(), marker.to_string_lossy().into_owned());

        let driver = Arc::new(HostProcessDriver::new("t", spec));
        let runner = spawn_run(&driver);
        tokio::time::timeout(Duration::from_secs(5), wait_for_file(&ready))
            .await
            .unwrap();

        driver
            .stop(CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap();

        // The handler exits 0, so the run itself is clean.
        runner.await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "bye");
    }

    #[tokio::test]
    async fn ignored_term_needs_a_kill() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let mut spec = sh("trap '' TERM; touch \"$READY\"; while true; do sleep 0.1; done");
        spec.env
            .insert("READY".into(), ready.to_string_lossy().into_owned());

        let driver = Arc::new(HostProcessDriver::new("t", spec));
        let runner = spawn_run(&driver);
        tokio::time::timeout(Duration::from_secs(5), wait_for_file(&ready))
            .await
            .unwrap();

        let err = driver
            .stop(CancellationToken::new(), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not exit"), "{err}");
        assert!(!runner.is_finished());

        driver.kill(CancellationToken::new()).await.unwrap();
        let res = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(KitError::Lifecycle(msg)) if msg == "process killed"));
    }

    #[tokio::test]
    async fn stop_without_a_process_is_a_no_op() {
        let driver = HostProcessDriver::new("t", sh("true"));
        driver
            .stop(CancellationToken::new(), Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn init_rejects_a_busy_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut spec = sh("true");
        spec.ports = vec![port];
        let driver = HostProcessDriver::new("t", spec);

        let err = driver.init(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains(&format!("port {port}")));
    }
}
