// src/status.rs

//! Externally visible per-task status.
//!
//! The orchestrator core is the only writer; anything holding a clone of the
//! [`StatusStore`] may read whole records at any time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::TaskName;

pub const REASON_SUCCESS: &str = "success";
pub const REASON_ERROR: &str = "error";
pub const REASON_EXITED: &str = "exited";
pub const REASON_SKIPPED: &str = "skipped";
pub const REASON_STOPPING: &str = "stopping";

/// Exactly one of waiting, running or terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Waiting { reason: String },
    Running,
    Terminated { reason: String },
}

impl TaskState {
    pub fn waiting(reason: impl Into<String>) -> Self {
        TaskState::Waiting {
            reason: reason.into(),
        }
    }

    pub fn terminated(reason: impl Into<String>) -> Self {
        TaskState::Terminated {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub name: TaskName,
    pub ready: bool,
    pub state: TaskState,
    pub message: Option<String>,
}

impl TaskStatus {
    pub fn new(name: impl Into<TaskName>) -> Self {
        Self {
            name: name.into(),
            ready: false,
            state: TaskState::waiting("pending"),
            message: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, TaskState::Terminated { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(&self.state, TaskState::Terminated { reason } if reason == REASON_SUCCESS)
    }

    pub fn failed(&self) -> bool {
        self.is_terminated() && !self.is_success()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Successfully completed, or currently ready.
    pub fn is_fulfilled(&self) -> bool {
        self.is_success() || self.is_ready()
    }

    pub fn reason(&self) -> &str {
        match &self.state {
            TaskState::Waiting { reason } | TaskState::Terminated { reason } => reason,
            TaskState::Running if self.ready => "ready",
            TaskState::Running => "running",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            TaskState::Waiting { .. } => "waiting",
            TaskState::Running => "running",
            TaskState::Terminated { .. } => "terminated",
        };
        write!(f, "{}: {} ({})", self.name, state, self.reason())?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

/// Shared, live view of every task's [`TaskStatus`].
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<BTreeMap<TaskName, TaskStatus>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with a pending record for each name.
    pub fn with_tasks<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let map = names
            .into_iter()
            .map(|name| (name.to_string(), TaskStatus::new(name)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, name: &str) -> Option<TaskStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<TaskStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Apply `f` to the record for `name`, creating it if missing.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut TaskStatus)) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let status = map
            .entry(name.to_string())
            .or_insert_with(|| TaskStatus::new(name));
        f(status);
    }

    pub fn set_state(&self, name: &str, state: TaskState, message: Option<String>) {
        self.update(name, |status| {
            status.state = state;
            status.message = message;
        });
    }

    pub fn set_ready(&self, name: &str, ready: bool) {
        self.update(name, |status| status.ready = ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_follow_the_state() {
        let mut s = TaskStatus::new("a");
        assert!(!s.is_terminated());
        assert_eq!(s.reason(), "pending");

        s.state = TaskState::Running;
        assert_eq!(s.reason(), "running");
        s.ready = true;
        assert_eq!(s.reason(), "ready");
        assert!(s.is_fulfilled());

        s.ready = false;
        s.state = TaskState::terminated(REASON_SUCCESS);
        assert!(s.is_success());
        assert!(!s.failed());
        assert!(s.is_fulfilled());

        s.state = TaskState::terminated(REASON_SKIPPED);
        assert!(s.failed());
        assert!(!s.is_fulfilled());
    }

    #[test]
    fn store_is_shared_between_clones() {
        let store = StatusStore::with_tasks(["a", "b"]);
        let reader = store.clone();

        store.set_state("a", TaskState::Running, None);
        store.set_ready("a", true);

        let a = reader.get("a").unwrap();
        assert!(a.is_ready());
        assert_eq!(a.state, TaskState::Running);
        assert_eq!(reader.snapshot().len(), 2);
        assert!(reader.get("zzz").is_none());
    }

    #[test]
    fn display_includes_message() {
        let mut s = TaskStatus::new("api");
        s.state = TaskState::terminated(REASON_ERROR);
        s.message = Some("exit status 2".into());
        assert_eq!(s.to_string(), "api: terminated (error): exit status 2");
    }
}
