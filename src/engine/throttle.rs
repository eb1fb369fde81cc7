//! Rate limiting of read failure notifications.

use tracing::{info, warn};

/// Consecutive failures reported before going silent.
pub const SUPPRESS_AFTER: u32 = 100;

/// Successful reads needed to report failures again.
pub const RECOVER_AFTER: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Failures are reported; counts consecutive failures
    Normal { failures: u32 },
    /// Failures are swallowed; counts successes since going silent
    Silent { successes: u32 },
}

/// Turns a storm of read failures into a bounded burst of notifications.
#[derive(Debug, Clone)]
pub(crate) struct ErrorThrottle {
    phase: Phase,
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self {
            phase: Phase::Normal { failures: 0 },
        }
    }
}

impl ErrorThrottle {
    /// Record a failed read. Returns whether it should be reported.
    pub fn on_failure(&mut self) -> bool {
        match self.phase {
            Phase::Normal { failures } => {
                let failures = failures + 1;
                if failures >= SUPPRESS_AFTER {
                    warn!(
                        failures,
                        "Too many consecutive read failures, suppressing further reports"
                    );
                    self.phase = Phase::Silent { successes: 0 };
                } else {
                    self.phase = Phase::Normal { failures };
                }
                true
            }
            Phase::Silent { .. } => false,
        }
    }

    /// Record a successful read.
    pub fn on_success(&mut self) {
        match self.phase {
            Phase::Normal { .. } => self.phase = Phase::Normal { failures: 0 },
            Phase::Silent { successes } => {
                let successes = successes + 1;
                if successes >= RECOVER_AFTER {
                    info!(successes, "Reads recovered, reporting failures again");
                    self.phase = Phase::Normal { failures: 0 };
                } else {
                    self.phase = Phase::Silent { successes };
                }
            }
        }
    }

    /// Whether failures are currently being swallowed.
    #[cfg(test)]
    pub fn is_silent(&self) -> bool {
        matches!(self.phase, Phase::Silent { .. })
    }
}
