// src/dag/mod.rs

//! Task definitions, the dependency graph, and per-run scheduling state.
//!
//! - [`task`] holds the immutable [`Task`] definition.
//! - [`graph`] is the validated [`TaskCatalog`] with leaves / downstream /
//!   needed-for queries.
//! - [`node`] is the per-task runtime state ([`TaskNode`]).
//! - [`scheduler`] decides which waiting tasks may be launched.

pub mod graph;
pub mod node;
pub mod scheduler;
pub mod task;

pub use graph::TaskCatalog;
pub use node::TaskNode;
pub use scheduler::{ScheduledTask, Scheduler};
pub use task::{CommandSpec, Task};
