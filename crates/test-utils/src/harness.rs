use std::sync::Arc;

use kit::config::ConfigFile;
use kit::dag::TaskCatalog;
use kit::engine::{Orchestrator, OrchestratorOptions};
use tokio_util::sync::CancellationToken;

use crate::fake_driver::FakeDriverFactory;
use crate::probes::SwitchChecker;

/// An orchestrator over `cfg` wired to fake drivers and a switchable probe
/// checker.
pub fn fake_orchestrator(
    cfg: &ConfigFile,
    drivers: &FakeDriverFactory,
    checker: &SwitchChecker,
    cancel: CancellationToken,
) -> Orchestrator {
    let catalog = TaskCatalog::from_config(cfg).expect("Failed to build task catalog");
    Orchestrator::new(
        catalog,
        OrchestratorOptions::from_config(cfg),
        Arc::new(drivers.clone()),
        Arc::new(checker.clone()),
        cancel,
    )
}

/// Poll `cond` every 10ms until it holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
