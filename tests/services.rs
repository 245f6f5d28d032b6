// tests/services.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kit::admission::AdmissionControl;
use kit::dag::Task;
use kit::driver::DriverFactory;
use kit::engine::{RuntimeEvent, TaskEvent};
use kit::exec::{RestartBackoff, SupervisorContext, supervise};
use kit::probe::Probe;
use kit_test_utils::builders::{ConfigFileBuilder, ProbeConfigBuilder, TaskConfigBuilder};
use kit_test_utils::fake_driver::{FakeBehaviour, FakeDriverFactory, Op};
use kit_test_utils::harness::{fake_orchestrator, wait_until};
use kit_test_utils::probes::SwitchChecker;
use kit_test_utils::{init_tracing, with_timeout};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn crashed_service_restarts_with_growing_backoff() {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_restart_backoff(0.1, 1.0)
        .with_task("api", TaskConfigBuilder::new("api").service_on(8080).build())
        .build();
    let drivers = FakeDriverFactory::new().with(
        "api",
        FakeBehaviour::CrashThenRun {
            crashes: 2,
            after: Duration::from_millis(50),
        },
    );
    let journal = drivers.journal();
    let cancel = CancellationToken::new();

    let orchestrator = fake_orchestrator(&cfg, &drivers, &SwitchChecker::new(), cancel.clone());
    let status = orchestrator.status();
    let run = tokio::spawn(orchestrator.run());

    with_timeout(wait_until(|| journal.count("api", Op::RunStart) == 3)).await;

    // Init happens once; every attempt builds again.
    assert_eq!(journal.count("api", Op::Init), 1);
    assert_eq!(journal.count("api", Op::Build), 3);

    let ends: Vec<_> = journal
        .entries()
        .into_iter()
        .filter(|e| e.task == "api" && e.op == Op::RunEnd)
        .map(|e| e.at)
        .collect();
    let starts: Vec<_> = journal
        .entries()
        .into_iter()
        .filter(|e| e.task == "api" && e.op == Op::RunStart)
        .map(|e| e.at)
        .collect();
    assert!(starts[1] - ends[0] >= Duration::from_millis(100));
    assert!(starts[2] - ends[1] >= Duration::from_millis(200));

    with_timeout(wait_until(|| {
        status.get("api").is_some_and(|s| s.reason() == "running")
    }))
    .await;

    cancel.cancel();
    with_timeout(run).await.unwrap().unwrap();
    assert_eq!(status.get("api").unwrap().reason(), "exited");
}

#[tokio::test(start_paused = true)]
async fn failing_liveness_restarts_the_service() {
    init_tracing();

    let liveness = ProbeConfigBuilder::tcp(9000)
        .period(1)
        .thresholds(1, 1)
        .build();
    let cfg = ConfigFileBuilder::new()
        .with_restart_backoff(0.1, 1.0)
        .with_task(
            "svc",
            TaskConfigBuilder::new("svc")
                .liveness(liveness)
                .readiness(ProbeConfigBuilder::tcp(9001).build())
                .build(),
        )
        .build();
    let drivers = FakeDriverFactory::new().with("svc", FakeBehaviour::RunForever);
    let journal = drivers.journal();
    let checker = SwitchChecker::new();
    checker.set(9000, true);
    let cancel = CancellationToken::new();

    let orchestrator = fake_orchestrator(&cfg, &drivers, &checker, cancel.clone());
    let status = orchestrator.status();
    let run = tokio::spawn(orchestrator.run());

    with_timeout(wait_until(|| checker.checks(9000) >= 2)).await;
    assert_eq!(journal.count("svc", Op::RunStart), 1);

    checker.set(9000, false);
    with_timeout(wait_until(|| journal.count("svc", Op::RunStart) == 2)).await;
    assert_eq!(journal.count("svc", Op::Stop), 1);

    cancel.cancel();
    with_timeout(run).await.unwrap().unwrap();
    assert_eq!(status.get("svc").unwrap().reason(), "exited");
}

#[tokio::test(start_paused = true)]
async fn failing_liveness_fails_a_job_for_good() {
    init_tracing();

    // Liveness without readiness: still a job.
    let liveness = ProbeConfigBuilder::tcp(9100)
        .period(1)
        .thresholds(1, 1)
        .build();
    let cfg = ConfigFileBuilder::new()
        .with_task("batch", TaskConfigBuilder::new("batch").liveness(liveness).build())
        .with_task("after", TaskConfigBuilder::new("after").after("batch").build())
        .build();
    let drivers = FakeDriverFactory::new().with("batch", FakeBehaviour::RunForever);
    let journal = drivers.journal();
    let checker = SwitchChecker::new();
    checker.set(9100, true);

    let orchestrator = fake_orchestrator(&cfg, &drivers, &checker, CancellationToken::new());
    let status = orchestrator.status();
    let run = tokio::spawn(orchestrator.run());

    with_timeout(wait_until(|| checker.checks(9100) >= 2)).await;
    checker.set(9100, false);

    let err = with_timeout(run).await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "tasks failed: after, batch");

    let batch = status.get("batch").unwrap();
    assert_eq!(batch.reason(), "error");
    assert_eq!(batch.message.as_deref(), Some("liveness probe failed"));
    assert_eq!(status.get("after").unwrap().reason(), "skipped");
    assert_eq!(journal.count("batch", Op::RunStart), 1);
}

#[tokio::test(start_paused = true)]
async fn readiness_flips_the_ready_flag_only() {
    init_tracing();

    let readiness = ProbeConfigBuilder::tcp(7000)
        .period(1)
        .thresholds(1, 1)
        .build();
    let cfg = ConfigFileBuilder::new()
        .with_task("web", TaskConfigBuilder::new("web").readiness(readiness).build())
        .build();
    let drivers = FakeDriverFactory::new().with("web", FakeBehaviour::RunForever);
    let journal = drivers.journal();
    let checker = SwitchChecker::new();
    let cancel = CancellationToken::new();

    let orchestrator = fake_orchestrator(&cfg, &drivers, &checker, cancel.clone());
    let status = orchestrator.status();
    let run = tokio::spawn(orchestrator.run());

    with_timeout(wait_until(|| checker.checks(7000) >= 2)).await;
    assert!(!status.get("web").unwrap().is_ready());

    checker.set(7000, true);
    with_timeout(wait_until(|| status.get("web").unwrap().is_ready())).await;
    assert_eq!(status.get("web").unwrap().reason(), "ready");

    checker.set(7000, false);
    with_timeout(wait_until(|| !status.get("web").unwrap().is_ready())).await;

    // Losing readiness never restarts anything.
    assert_eq!(journal.count("web", Op::RunStart), 1);
    assert_eq!(journal.count("web", Op::Stop), 0);

    cancel.cancel();
    with_timeout(run).await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn liveness_failure_between_runs_does_not_stop_the_next_run() {
    init_tracing();

    let task = Arc::new(
        Task::new("svc").with_probes(Some(Probe::tcp(9100)), Some(Probe::tcp(9101))),
    );
    let drivers = FakeDriverFactory::new().with(
        "svc",
        FakeBehaviour::CrashThenRun {
            crashes: 1,
            after: Duration::from_millis(50),
        },
    );
    let journal = drivers.journal();
    let unhealthy = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let (tx, mut rx) = mpsc::channel(64);
    let crashes = Arc::new(Mutex::new(0usize));
    {
        let crashes = Arc::clone(&crashes);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let RuntimeEvent::Task {
                    event: TaskEvent::Crashed { .. },
                    ..
                } = event
                {
                    *crashes.lock().unwrap() += 1;
                }
            }
        });
    }

    let supervisor = tokio::spawn(supervise(SupervisorContext {
        driver: drivers.create(&task),
        task,
        admission: Arc::new(AdmissionControl::new(&BTreeMap::new())),
        checker: Arc::new(SwitchChecker::new()),
        events: tx,
        cancel: cancel.clone(),
        unhealthy: Arc::clone(&unhealthy),
        grace: Duration::from_secs(1),
        backoff: RestartBackoff::new(Duration::from_secs(1), Duration::from_secs(1)),
    }));

    // First run crashes; the failure lands while the supervisor backs off.
    with_timeout(wait_until(|| journal.count("svc", Op::RunEnd) == 1)).await;
    unhealthy.notify_waiters();

    with_timeout(wait_until(|| journal.count("svc", Op::RunStart) == 2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(journal.count("svc", Op::Stop), 0);
    assert_eq!(journal.count("svc", Op::RunEnd), 1);

    // A failure during the run still stops it.
    unhealthy.notify_waiters();
    with_timeout(wait_until(|| journal.count("svc", Op::RunEnd) == 2)).await;
    assert_eq!(journal.count("svc", Op::Stop), 1);
    with_timeout(wait_until(|| *crashes.lock().unwrap() == 2)).await;

    cancel.cancel();
    with_timeout(supervisor).await.unwrap();
}
