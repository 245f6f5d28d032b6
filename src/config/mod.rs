// src/config/mod.rs

//! Configuration loading and validation for kit.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like DAG correctness and probe shape (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ConfigFile, ConfigSection, HttpGetConfig, ProbeConfig, RawConfigFile, TaskConfig,
    TcpSocketConfig, VolumeConfig,
};
