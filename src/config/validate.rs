// src/config/validate.rs

use std::collections::BTreeMap;

use tokio::sync::Semaphore;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::graph::check_dependencies;
use crate::errors::{KitError, Result};
use crate::probe::Probe;

/// Upper bound for the grace period and restart backoff settings.
pub const MAX_CONFIG_SECONDS: u64 = 86_400;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = KitError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_volumes(cfg)?;
    validate_tasks(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(KitError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    let section = &cfg.config;

    for (name, capacity) in section.semaphores.iter() {
        if *capacity > Semaphore::MAX_PERMITS {
            return Err(KitError::ConfigError(format!(
                "semaphore '{}' capacity {} exceeds maximum {}",
                name,
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }
    }

    let initial = section.restart_backoff_seconds;
    let max = section.max_restart_backoff_seconds;
    if !initial.is_finite() || !max.is_finite() || initial < 0.0 || max < initial {
        return Err(KitError::ConfigError(format!(
            "[config] restart backoff must satisfy 0 <= restart_backoff_seconds ({initial}) \
             <= max_restart_backoff_seconds ({max})"
        )));
    }
    if max > MAX_CONFIG_SECONDS as f64 {
        return Err(KitError::ConfigError(format!(
            "[config] max_restart_backoff_seconds ({max}) exceeds maximum {MAX_CONFIG_SECONDS}"
        )));
    }

    let grace = section.termination_grace_period_seconds;
    if grace > MAX_CONFIG_SECONDS {
        return Err(KitError::ConfigError(format!(
            "[config] termination_grace_period_seconds ({grace}) exceeds maximum {MAX_CONFIG_SECONDS}"
        )));
    }

    Ok(())
}

fn validate_volumes(cfg: &RawConfigFile) -> Result<()> {
    for (name, volume) in cfg.volume.iter() {
        if volume.host_path.trim().is_empty() {
            return Err(KitError::ConfigError(format!(
                "volume '{}' has an empty host_path",
                name
            )));
        }
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if name.trim().is_empty() {
            return Err(KitError::ConfigError("task names must not be empty".to_string()));
        }

        if task.command.is_empty() {
            return Err(KitError::ConfigError(format!(
                "task '{}' has an empty `command`",
                name
            )));
        }

        if let Some(semaphore) = task.semaphore.as_deref() {
            if !cfg.config.semaphores.contains_key(semaphore) {
                return Err(KitError::ConfigError(format!(
                    "task '{}' references undeclared semaphore '{}'",
                    name, semaphore
                )));
            }
        }

        if let Some(mutex) = task.mutex.as_deref() {
            if mutex.trim().is_empty() {
                return Err(KitError::ConfigError(format!(
                    "task '{}' has an empty `mutex` name",
                    name
                )));
            }
        }

        for (kind, probe) in [
            ("liveness_probe", &task.liveness_probe),
            ("readiness_probe", &task.readiness_probe),
        ] {
            if let Some(probe) = probe {
                Probe::try_from(probe).map_err(|e| match e {
                    KitError::ConfigError(msg) => {
                        KitError::ConfigError(format!("task '{}' {}: {}", name, kind, msg))
                    }
                    other => other,
                })?;
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let edges: BTreeMap<&str, &[String]> = cfg
        .task
        .iter()
        .map(|(name, task)| (name.as_str(), task.dependencies.as_slice()))
        .collect();
    check_dependencies(&edges)
}
