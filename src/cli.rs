// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `kit`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kit",
    version,
    about = "Run a graph of local jobs and services as one supervised unit.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Kit.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Kit.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `KIT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the execution plan, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Only run these tasks and what they depend on. Runs everything if
    /// omitted.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
