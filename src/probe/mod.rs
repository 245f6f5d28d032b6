// src/probe/mod.rs

//! Health probes for long-running tasks.
//!
//! - [`state`] holds the pure threshold bookkeeping (`ProbeState`).
//! - [`checker`] performs a single TCP/HTTP check (`ProbeChecker`,
//!   `NetworkChecker`).
//! - [`engine`] runs the periodic loop and reports transitions as
//!   [`crate::engine::RuntimeEvent::Probe`] events.

pub mod checker;
pub mod engine;
pub mod state;

use std::fmt;
use std::time::Duration;

use crate::config::model::ProbeConfig;
use crate::errors::KitError;
use crate::types::HttpScheme;

pub use checker::{NetworkChecker, ProbeChecker, ProbeError, ProbeFuture};
pub use engine::run_probe_loop;
pub use state::ProbeState;

/// Host every probe targets.
pub const PROBE_HOST: &str = "localhost";

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Which of a task's two probes an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Liveness,
    Readiness,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Liveness => f.write_str("liveness"),
            ProbeKind::Readiness => f.write_str("readiness"),
        }
    }
}

/// What a probe loop reports to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeUpdate {
    /// The probe crossed a threshold and is now passing (`true`) or failing.
    Changed(bool),
    /// A check failed with a transport-level error. Logged only; state
    /// changes are reported separately through `Changed`.
    Error(String),
}

/// The single endpoint a probe checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeAction {
    TcpSocket {
        port: u16,
    },
    HttpGet {
        scheme: HttpScheme,
        port: u16,
        path: String,
    },
}

impl ProbeAction {
    /// `tcp://localhost:8080` or `http://localhost:8080/healthz`.
    pub fn url(&self) -> String {
        match self {
            ProbeAction::TcpSocket { port } => format!("tcp://{PROBE_HOST}:{port}"),
            ProbeAction::HttpGet { scheme, port, path } => {
                format!("{scheme}://{PROBE_HOST}:{port}{path}")
            }
        }
    }
}

impl fmt::Display for ProbeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// A resolved probe definition with all defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub action: ProbeAction,
    pub initial_delay: Duration,
    pub period: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
    pub timeout: Duration,
}

impl Probe {
    /// Probe with default timings for the given action.
    pub fn new(action: ProbeAction) -> Self {
        Self {
            action,
            initial_delay: Duration::ZERO,
            period: DEFAULT_PERIOD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(ProbeAction::TcpSocket { port })
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_thresholds(mut self, success: u32, failure: u32) -> Self {
        self.success_threshold = success;
        self.failure_threshold = failure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl TryFrom<&ProbeConfig> for Probe {
    type Error = KitError;

    fn try_from(cfg: &ProbeConfig) -> Result<Self, Self::Error> {
        let action = match (&cfg.tcp_socket, &cfg.http_get) {
            (Some(tcp), None) => ProbeAction::TcpSocket { port: tcp.port },
            (None, Some(http)) => {
                let path = match http.path.as_deref() {
                    None | Some("") => "/".to_string(),
                    Some(p) if p.starts_with('/') => p.to_string(),
                    Some(p) => format!("/{p}"),
                };
                ProbeAction::HttpGet {
                    scheme: http.scheme,
                    port: http.port.unwrap_or_else(|| http.scheme.default_port()),
                    path,
                }
            }
            _ => {
                return Err(KitError::ConfigError(
                    "probe must declare exactly one of `tcp_socket` or `http_get`".to_string(),
                ));
            }
        };

        let port = match &action {
            ProbeAction::TcpSocket { port } | ProbeAction::HttpGet { port, .. } => *port,
        };
        if port == 0 {
            return Err(KitError::ConfigError("probe port must be >= 1".to_string()));
        }

        let period = cfg.period_seconds.map(Duration::from_secs).unwrap_or(DEFAULT_PERIOD);
        let timeout = cfg.timeout_seconds.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
        let success_threshold = cfg.success_threshold.unwrap_or(DEFAULT_SUCCESS_THRESHOLD);
        let failure_threshold = cfg.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        if period.is_zero() || timeout.is_zero() {
            return Err(KitError::ConfigError(
                "probe period_seconds and timeout_seconds must be >= 1".to_string(),
            ));
        }
        if success_threshold == 0 || failure_threshold == 0 {
            return Err(KitError::ConfigError(
                "probe success_threshold and failure_threshold must be >= 1".to_string(),
            ));
        }

        Ok(Self {
            action,
            initial_delay: Duration::from_secs(cfg.initial_delay_seconds),
            period,
            success_threshold,
            failure_threshold,
            timeout,
        })
    }
}
