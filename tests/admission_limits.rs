// tests/admission_limits.rs

use std::time::Duration;

use kit_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use kit_test_utils::fake_driver::{FakeBehaviour, FakeDriverFactory};
use kit_test_utils::harness::fake_orchestrator;
use kit_test_utils::probes::SwitchChecker;
use kit_test_utils::{init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn mutex_holders_never_overlap() {
    init_tracing();

    let names = ["m1", "m2", "m3"];
    let mut builder = ConfigFileBuilder::new();
    let mut drivers = FakeDriverFactory::new();
    for name in names {
        builder = builder.with_task(name, TaskConfigBuilder::new("migrate").mutex("db").build());
        drivers = drivers.with(name, FakeBehaviour::Succeed(Duration::from_millis(50)));
    }
    let journal = drivers.journal();

    let orchestrator = fake_orchestrator(
        &builder.build(),
        &drivers,
        &SwitchChecker::new(),
        CancellationToken::new(),
    );
    let status = orchestrator.status();
    with_timeout(orchestrator.run()).await.unwrap();

    assert_eq!(journal.max_concurrent_runs(&names), 1);
    assert_eq!(journal.run_order().len(), 3);
    assert!(status.snapshot().iter().all(|s| s.is_success()));
}

#[tokio::test(start_paused = true)]
async fn semaphore_caps_concurrent_runs() {
    init_tracing();

    let names = ["s1", "s2", "s3", "s4", "s5"];
    let mut builder = ConfigFileBuilder::new().with_semaphore("cpu", 2);
    let mut drivers = FakeDriverFactory::new();
    for name in names {
        builder = builder.with_task(name, TaskConfigBuilder::new("work").semaphore("cpu").build());
        drivers = drivers.with(name, FakeBehaviour::Succeed(Duration::from_millis(50)));
    }
    // Not limited: runs alongside the others.
    builder = builder.with_task("free", TaskConfigBuilder::new("work").build());
    drivers = drivers.with("free", FakeBehaviour::Succeed(Duration::from_millis(50)));
    let journal = drivers.journal();

    let orchestrator = fake_orchestrator(
        &builder.build(),
        &drivers,
        &SwitchChecker::new(),
        CancellationToken::new(),
    );
    with_timeout(orchestrator.run()).await.unwrap();

    assert_eq!(journal.max_concurrent_runs(&names), 2);
    let mut all = names.to_vec();
    all.push("free");
    assert_eq!(journal.max_concurrent_runs(&all), 3);
}

#[tokio::test(start_paused = true)]
async fn waiting_for_admission_is_visible_in_status() {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_task("holder", TaskConfigBuilder::new("lock").mutex("db").build())
        .with_task("waiter", TaskConfigBuilder::new("lock").mutex("db").build())
        .build();
    let drivers = FakeDriverFactory::new()
        .with("holder", FakeBehaviour::RunForever)
        .with("waiter", FakeBehaviour::RunForever);
    let cancel = CancellationToken::new();

    let orchestrator = fake_orchestrator(&cfg, &drivers, &SwitchChecker::new(), cancel.clone());
    let status = orchestrator.status();
    let run = tokio::spawn(orchestrator.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let reasons: Vec<String> = status
        .snapshot()
        .iter()
        .map(|s| s.reason().to_string())
        .collect();
    assert!(reasons.contains(&"running".to_string()), "{reasons:?}");
    assert!(reasons.contains(&"admission".to_string()), "{reasons:?}");

    // The waiter is released by cancellation without ever running.
    cancel.cancel();
    with_timeout(run).await.unwrap().unwrap();
    assert!(status.snapshot().iter().all(|s| s.is_terminated()));
}
