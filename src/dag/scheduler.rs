// src/dag/scheduler.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dag::graph::TaskCatalog;
use crate::dag::node::TaskNode;
use crate::dag::task::Task;
use crate::engine::TaskName;
use crate::errors::{KitError, Result};
use crate::types::TaskPhase;

/// A task the scheduler wants started now, with its supervisor's
/// cancellation handle.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task: Arc<Task>,
    pub cancel: CancellationToken,
}

impl ScheduledTask {
    pub fn name(&self) -> &str {
        self.task.name()
    }
}

/// Scheduler holds the immutable catalog plus one [`TaskNode`] per task.
///
/// It is responsible for:
/// - deciding which waiting tasks have all dependencies unblocked
/// - handing out cancellation handles for launched tasks
/// - skipping dependents of permanently failed tasks
/// - telling when every task has reached a terminal phase
#[derive(Debug)]
pub struct Scheduler {
    catalog: TaskCatalog,
    nodes: BTreeMap<TaskName, TaskNode>,
    /// Parent of every node's cancellation handle.
    root: CancellationToken,
    /// Set once shutdown began; nothing new is launched afterwards.
    stopping: bool,
}

impl Scheduler {
    pub fn new(catalog: TaskCatalog, root: CancellationToken) -> Self {
        let nodes = catalog
            .tasks()
            .map(|task| (task.name().to_string(), TaskNode::new(Arc::clone(task))))
            .collect();

        Self {
            catalog,
            nodes,
            root,
            stopping: false,
        }
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    /// Mutable access to a node; unknown names are an invariant violation.
    pub fn node_mut(&mut self, name: &str) -> Result<&mut TaskNode> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| KitError::TaskNotFound(name.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    pub fn phase_of(&self, name: &str) -> Option<TaskPhase> {
        self.nodes.get(name).map(TaskNode::phase)
    }

    /// Whether none of `name`'s direct dependencies is blocked.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, name: &str) -> Option<bool> {
        let node = self.nodes.get(name)?;
        Some(
            node.task()
                .dependencies()
                .iter()
                .all(|dep| self.nodes.get(dep).is_some_and(|d| !d.blocked())),
        )
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Collect waiting, not-yet-launched tasks whose dependencies are all
    /// unblocked, mark them launched, and return them.
    pub fn collect_ready(&mut self) -> Vec<ScheduledTask> {
        if self.stopping {
            return Vec::new();
        }

        // Decide first against one consistent view, then mutate.
        let candidates: Vec<TaskName> = self
            .nodes
            .values()
            .filter(|node| node.phase() == TaskPhase::Waiting && !node.is_launched())
            .filter(|node| self.deps_satisfied(node.name()).unwrap_or(false))
            .map(|node| node.name().to_string())
            .collect();

        let mut ready = Vec::with_capacity(candidates.len());
        for name in candidates {
            if let Some(node) = self.nodes.get_mut(&name) {
                let cancel = node.launch(&self.root);
                info!(task = %name, kind = %node.task().kind(), "dependencies satisfied; launching task");
                ready.push(ScheduledTask {
                    task: Arc::clone(node.task()),
                    cancel,
                });
            }
        }
        ready
    }

    /// Mark every waiting, not-launched dependent of `failed` (transitively)
    /// as failed. Returns the names that were newly skipped.
    pub fn mark_dependents_skipped(&mut self, failed: &str) -> Vec<TaskName> {
        let mut stack: Vec<(TaskName, TaskName)> = self
            .catalog
            .downstream(failed)
            .into_iter()
            .map(|t| (t.name().to_string(), failed.to_string()))
            .collect();

        let mut skipped = Vec::new();
        while let Some((name, upstream)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&name) else {
                continue;
            };
            if node.phase() != TaskPhase::Waiting || node.is_launched() {
                continue;
            }

            node.transition(TaskPhase::Failed, format!("dependency '{upstream}' failed"));
            debug!(task = %name, upstream = %upstream, "skipping task due to upstream failure");
            skipped.push(name.clone());

            stack.extend(
                self.catalog
                    .downstream(&name)
                    .into_iter()
                    .map(|t| (t.name().to_string(), name.clone())),
            );
        }
        skipped
    }

    /// Whether every task is terminal with no supervisor left.
    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(TaskNode::is_terminal)
    }

    /// Number of nodes with an active supervisor.
    pub fn active_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_launched()).count()
    }

    /// Stop launching and cancel every active supervisor.
    pub fn begin_shutdown(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        self.root.cancel();
        for node in self.nodes.values() {
            node.cancel();
        }
    }

    /// Fail every waiting task that was never launched. Used on shutdown,
    /// after which nothing new starts.
    pub fn abandon_pending(&mut self, message: &str) -> Vec<TaskName> {
        let mut abandoned = Vec::new();
        for node in self.nodes.values_mut() {
            if node.phase() == TaskPhase::Waiting && !node.is_launched() {
                node.transition(TaskPhase::Failed, message);
                abandoned.push(node.name().to_string());
            }
        }
        abandoned
    }

    /// Names of tasks that ended in `failed`.
    pub fn failed_tasks(&self) -> Vec<TaskName> {
        self.nodes
            .values()
            .filter(|n| n.phase() == TaskPhase::Failed)
            .map(|n| n.name().to_string())
            .collect()
    }
}
