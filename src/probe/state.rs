// src/probe/state.rs

//! Consecutive-result bookkeeping for a single probe.

/// Threshold state machine for one probe.
///
/// A probe starts out *not* passing. It flips to passing after
/// `success_threshold` consecutive successful checks, and back to failing
/// after `failure_threshold` consecutive failed checks while passing.
#[derive(Debug, Clone)]
pub struct ProbeState {
    success_threshold: u32,
    failure_threshold: u32,
    consecutive_successes: u32,
    consecutive_failures: u32,
    passing: bool,
}

impl ProbeState {
    pub fn new(success_threshold: u32, failure_threshold: u32) -> Self {
        Self {
            success_threshold: success_threshold.max(1),
            failure_threshold: failure_threshold.max(1),
            consecutive_successes: 0,
            consecutive_failures: 0,
            passing: false,
        }
    }

    pub fn passing(&self) -> bool {
        self.passing
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record the outcome of one check.
    ///
    /// Returns `Some(new_passing)` only when this check caused a transition.
    pub fn record(&mut self, success: bool) -> Option<bool> {
        if success {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
            if !self.passing && self.consecutive_successes >= self.success_threshold {
                self.passing = true;
                return Some(true);
            }
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
            if self.passing && self.consecutive_failures >= self.failure_threshold {
                self.passing = false;
                return Some(false);
            }
        }
        None
    }
}
