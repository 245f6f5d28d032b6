// src/probe/engine.rs

//! Periodic probe loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{RuntimeEvent, TaskName};
use crate::probe::{Probe, ProbeChecker, ProbeKind, ProbeState, ProbeUpdate};

/// Run `probe` until `cancel` fires, reporting to `events`.
///
/// - Waits `initial_delay` once, then checks every `period`.
/// - Every transport error is reported as `ProbeUpdate::Error`.
/// - Threshold crossings are reported as `ProbeUpdate::Changed`.
///
/// Cancellation aborts an in-flight check. The loop also ends if the event
/// channel is closed.
pub async fn run_probe_loop(
    task: TaskName,
    kind: ProbeKind,
    probe: Probe,
    checker: Arc<dyn ProbeChecker>,
    cancel: CancellationToken,
    events: mpsc::Sender<RuntimeEvent>,
) {
    debug!(
        task = %task,
        probe = %kind,
        target = %probe.action,
        period = ?probe.period,
        "probe loop started"
    );

    if !probe.initial_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(probe.initial_delay) => {}
        }
    }

    let mut state = ProbeState::new(probe.success_threshold, probe.failure_threshold);
    let mut ticker = interval(probe.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = checker.check(&probe.action, probe.timeout) => r,
        };

        let success = match result {
            Ok(()) => true,
            Err(err) => {
                debug!(task = %task, probe = %kind, error = %err, "probe check failed");
                if !emit(&events, &cancel, &task, kind, ProbeUpdate::Error(err.to_string())).await {
                    break;
                }
                false
            }
        };

        if let Some(passing) = state.record(success) {
            info!(task = %task, probe = %kind, passing, "probe state changed");
            if !emit(&events, &cancel, &task, kind, ProbeUpdate::Changed(passing)).await {
                break;
            }
        }
    }

    debug!(task = %task, probe = %kind, "probe loop finished");
}

/// Send one update. Returns `false` once the loop should stop.
async fn emit(
    events: &mpsc::Sender<RuntimeEvent>,
    cancel: &CancellationToken,
    task: &TaskName,
    kind: ProbeKind,
    update: ProbeUpdate,
) -> bool {
    let event = RuntimeEvent::Probe {
        task: task.clone(),
        kind,
        update,
    };
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::probe::{ProbeAction, ProbeError, ProbeFuture};

    /// Replays a fixed list of outcomes, then keeps failing.
    struct Scripted(Mutex<VecDeque<bool>>);

    impl ProbeChecker for Scripted {
        fn check<'a>(&'a self, action: &'a ProbeAction, _timeout: Duration) -> ProbeFuture<'a> {
            let next = self.0.lock().unwrap().pop_front().unwrap_or(false);
            Box::pin(async move {
                if next {
                    Ok(())
                } else {
                    Err(ProbeError::Http {
                        url: action.url(),
                        message: "scripted failure".to_string(),
                    })
                }
            })
        }
    }

    fn changes(rx: &mut mpsc::Receiver<RuntimeEvent>) -> Vec<bool> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RuntimeEvent::Probe {
                update: ProbeUpdate::Changed(passing),
                ..
            } = event
            {
                out.push(passing);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn reports_transitions_and_stops_on_cancel() {
        let checker: Arc<dyn ProbeChecker> = Arc::new(Scripted(Mutex::new(VecDeque::from(vec![
            false, true, false, true, false, false, false,
        ]))));
        let probe = Probe::tcp(1)
            .with_period(Duration::from_secs(1))
            .with_thresholds(1, 3);
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_probe_loop(
            "svc".to_string(),
            ProbeKind::Liveness,
            probe,
            checker,
            cancel.clone(),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        // fail, pass(flip), fail, pass, fail, fail, fail(flip)
        assert_eq!(changes(&mut rx), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_postpones_first_check() {
        let checker: Arc<dyn ProbeChecker> =
            Arc::new(Scripted(Mutex::new(VecDeque::from(vec![true]))));
        let probe = Probe::tcp(1)
            .with_initial_delay(Duration::from_secs(5))
            .with_period(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_probe_loop(
            "svc".to_string(),
            ProbeKind::Readiness,
            probe,
            checker,
            cancel.clone(),
            tx,
        ));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(changes(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(changes(&mut rx), vec![true]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
