// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`supervisor`] runs one task's lifecycle through its process driver and
//!   reports back to the orchestrator via `RuntimeEvent`s.

pub mod supervisor;

pub use supervisor::{RestartBackoff, SupervisorContext, supervise};
