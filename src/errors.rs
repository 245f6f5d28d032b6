// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KitError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Admission control was used in a way the config does not allow
    /// (e.g. an undeclared semaphore).
    #[error("Admission error: {0}")]
    Admission(String),

    /// A process-driver lifecycle step (init/build/run/stop/kill) failed.
    #[error("{0}")]
    Lifecycle(String),

    /// The operation was cancelled. Never reported as a task failure.
    #[error("operation cancelled")]
    Cancelled,

    #[error("tasks failed: {}", .0.join(", "))]
    TasksFailed(Vec<String>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KitError {
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        KitError::Lifecycle(msg.into())
    }

    /// `true` for [`KitError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, KitError::Cancelled)
    }

    /// Configuration-time errors are fatal before any task starts.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            KitError::ConfigError(_)
                | KitError::DagCycle(_)
                | KitError::TaskNotFound(_)
                | KitError::TomlError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, KitError>;
