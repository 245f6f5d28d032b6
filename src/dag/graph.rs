// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::ConfigFile;
use crate::dag::task::Task;
use crate::engine::TaskName;
use crate::errors::{KitError, Result};

/// Immutable catalog of tasks plus the dependency relation between them.
///
/// Construction validates the graph (unknown dependencies, self-dependencies,
/// cycles), so every method here can assume a well-formed DAG. Nothing in
/// here mutates after construction, and tasks are handed out as `Arc<Task>`.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: BTreeMap<TaskName, Arc<Task>>,
    /// Direct dependents: tasks that list the key in their dependencies.
    dependents: BTreeMap<TaskName, Vec<TaskName>>,
}

impl TaskCatalog {
    /// Build and validate a catalog from task definitions.
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Result<Self> {
        let mut map: BTreeMap<TaskName, Arc<Task>> = BTreeMap::new();
        for task in tasks {
            let name = task.name().to_string();
            if map.insert(name.clone(), Arc::new(task)).is_some() {
                return Err(KitError::ConfigError(format!(
                    "task '{}' is defined more than once",
                    name
                )));
            }
        }

        let edges: BTreeMap<&str, &[String]> = map
            .iter()
            .map(|(name, task)| (name.as_str(), task.dependencies()))
            .collect();
        check_dependencies(&edges)?;

        let mut dependents: BTreeMap<TaskName, Vec<TaskName>> =
            map.keys().map(|name| (name.clone(), Vec::new())).collect();
        for (name, task) in map.iter() {
            for dep in task.dependencies() {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(name.clone());
                }
            }
        }

        Ok(Self {
            tasks: map,
            dependents,
        })
    }

    /// Build a catalog from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let tasks = cfg
            .task
            .iter()
            .map(|(name, tc)| Task::from_config(name, tc, &cfg.env))
            .collect::<Result<Vec<_>>>()?;
        Self::new(tasks)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    /// All tasks, ordered by name.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    /// Tasks with no dependencies: the initial admissible set.
    pub fn leaves(&self) -> Vec<&Arc<Task>> {
        self.tasks
            .values()
            .filter(|task| task.dependencies().is_empty())
            .collect()
    }

    /// Tasks that directly depend on `name`.
    pub fn downstream(&self, name: &str) -> Vec<&Arc<Task>> {
        self.dependents
            .get(name)
            .map(|names| names.iter().filter_map(|n| self.tasks.get(n)).collect())
            .unwrap_or_default()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.tasks
            .get(name)
            .map(|task| task.dependencies())
            .unwrap_or(&[])
    }

    /// The minimal sub-catalog needed to run `names`: the targets plus all of
    /// their transitive dependencies, collected breadth-first.
    pub fn needed_for<S: AsRef<str>>(&self, names: &[S]) -> Result<TaskCatalog> {
        let mut todo: VecDeque<&str> = VecDeque::new();
        for name in names {
            let name = name.as_ref();
            if !self.tasks.contains_key(name) {
                return Err(KitError::TaskNotFound(name.to_string()));
            }
            todo.push_back(name);
        }

        let mut done: BTreeSet<&str> = BTreeSet::new();
        while let Some(name) = todo.pop_front() {
            if !done.insert(name) {
                continue;
            }
            for dep in self.dependencies_of(name) {
                if !done.contains(dep.as_str()) {
                    todo.push_back(dep.as_str());
                }
            }
        }

        let tasks = done
            .into_iter()
            .filter_map(|name| self.tasks.get(name))
            .map(|task| Task::clone(task));
        TaskCatalog::new(tasks)
    }

    /// Names in an order where every task comes after its dependencies.
    pub fn topological_order(&self) -> Vec<TaskName> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in self.tasks.keys() {
            graph.add_node(name.as_str());
        }
        for (name, task) in self.tasks.iter() {
            for dep in task.dependencies() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }
        toposort(&graph, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .unwrap_or_else(|_| self.tasks.keys().cloned().collect())
    }
}

/// Validate a dependency relation given as `task -> dependencies`.
///
/// Rejects unknown dependency names, self-dependencies, and cycles.
pub(crate) fn check_dependencies(edges: &BTreeMap<&str, &[String]>) -> Result<()> {
    for (name, deps) in edges.iter() {
        for dep in deps.iter() {
            if dep == name {
                return Err(KitError::ConfigError(format!(
                    "task '{}' cannot depend on itself",
                    name
                )));
            }
            if !edges.contains_key(dep.as_str()) {
                return Err(KitError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}'",
                    name, dep
                )));
            }
        }
    }

    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in edges.keys() {
        graph.add_node(*name);
    }
    for (name, deps) in edges.iter() {
        for dep in deps.iter() {
            graph.add_edge(dep.as_str(), *name, ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(KitError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}
