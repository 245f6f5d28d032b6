use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kit::probe::{ProbeAction, ProbeChecker, ProbeError, ProbeFuture};

/// A [`ProbeChecker`] whose answers are switched per port from the test.
///
/// Ports start down. Every check is counted.
#[derive(Debug, Clone, Default)]
pub struct SwitchChecker {
    up: Arc<Mutex<HashMap<u16, bool>>>,
    checks: Arc<Mutex<HashMap<u16, usize>>>,
}

impl SwitchChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, port: u16, up: bool) {
        self.up.lock().unwrap().insert(port, up);
    }

    pub fn checks(&self, port: u16) -> usize {
        self.checks.lock().unwrap().get(&port).copied().unwrap_or(0)
    }
}

fn port_of(action: &ProbeAction) -> u16 {
    match action {
        ProbeAction::TcpSocket { port } => *port,
        ProbeAction::HttpGet { port, .. } => *port,
    }
}

impl ProbeChecker for SwitchChecker {
    fn check<'a>(&'a self, action: &'a ProbeAction, _timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async move {
            let port = port_of(action);
            *self.checks.lock().unwrap().entry(port).or_default() += 1;
            let up = self.up.lock().unwrap().get(&port).copied().unwrap_or(false);
            if up {
                Ok(())
            } else {
                Err(ProbeError::Connect {
                    url: action.url(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                })
            }
        })
    }
}
