// src/lib.rs

pub mod admission;
pub mod cli;
pub mod config;
pub mod dag;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod probe;
pub mod status;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::TaskCatalog;
use crate::driver::HostDriverFactory;
use crate::engine::{Orchestrator, OrchestratorOptions};
use crate::probe::NetworkChecker;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the task catalog (narrowed to the requested targets)
/// - the orchestrator with the host process driver and network probes
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let catalog = select_tasks(TaskCatalog::from_config(&cfg)?, &args.tasks)?;

    if args.dry_run {
        print_dry_run(&cfg, &catalog);
        return Ok(());
    }

    let cancel = CancellationToken::new();

    // Ctrl-C → graceful shutdown.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("received Ctrl+C; shutting down");
            cancel.cancel();
        });
    }

    let orchestrator = Orchestrator::new(
        catalog,
        OrchestratorOptions::from_config(&cfg),
        Arc::new(HostDriverFactory),
        Arc::new(NetworkChecker::new()?),
        cancel,
    );
    let status = orchestrator.status();

    let result = orchestrator.run().await;
    for s in status.snapshot() {
        info!(status = %s, "final task status");
    }
    Ok(result?)
}

/// Narrow the catalog to `targets` and their dependencies. No targets means
/// everything.
pub fn select_tasks(catalog: TaskCatalog, targets: &[String]) -> crate::errors::Result<TaskCatalog> {
    if targets.is_empty() {
        return Ok(catalog);
    }
    let narrowed = catalog.needed_for(targets)?;
    info!(
        ?targets,
        selected = narrowed.len(),
        total = catalog.len(),
        "narrowed task graph to requested targets"
    );
    Ok(narrowed)
}

/// Simple dry-run output: print the plan in start order.
fn print_dry_run(cfg: &ConfigFile, catalog: &TaskCatalog) {
    println!("kit dry-run");
    println!(
        "  config.termination_grace_period_seconds = {}",
        cfg.config.termination_grace_period_seconds
    );
    for (name, capacity) in &cfg.config.semaphores {
        println!("  config.semaphores.{name} = {capacity}");
    }
    println!();

    println!("tasks ({}):", catalog.len());
    for name in catalog.topological_order() {
        let Some(task) = catalog.get(&name) else {
            continue;
        };
        println!("  - {name} ({})", task.kind());
        println!("      command: {}", task.command().display());
        if !task.dependencies().is_empty() {
            println!("      dependencies: {:?}", task.dependencies());
        }
        if let Some(mutex) = task.mutex() {
            println!("      mutex: {mutex}");
        }
        if let Some(semaphore) = task.semaphore() {
            println!("      semaphore: {semaphore}");
        }
        if let Some(probe) = task.liveness_probe() {
            println!("      liveness: {}", probe.action);
        }
        if let Some(probe) = task.readiness_probe() {
            println!("      readiness: {}", probe.action);
        }
    }

    debug!("dry-run complete (no execution)");
}
