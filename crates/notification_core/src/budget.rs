//! crates/notification_core/src/budget.rs
//!
//! Soft wall-clock budget of one run. Crossing it raises a single alert and
//! nothing else; the run always continues.

use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug)]
pub struct TimeBudget {
    started: Instant,
    limit: Duration,
    alerted: bool,
}

impl TimeBudget {
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            alerted: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Checks the budget at a phase boundary. Returns `true` once the budget
    /// is exceeded; the alert itself is emitted only the first time.
    pub fn check(&mut self, phase: &str) -> bool {
        let elapsed = self.elapsed();
        if elapsed <= self.limit {
            return false;
        }
        if !self.alerted {
            self.alerted = true;
            warn!(
                target: "alerts",
                phase,
                elapsed_secs = elapsed.as_secs(),
                budget_secs = self.limit.as_secs(),
                "Run exceeded its time budget"
            );
        }
        true
    }

    /// Whether the budget has been exceeded at any checked boundary.
    pub fn exceeded(&self) -> bool {
        self.alerted
    }
}
