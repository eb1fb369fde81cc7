//! Per-subscriber delivery deadlines.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use super::commands::EngineCommand;
use super::registry::SubscriberId;

/// Schedules [`EngineCommand::SampleTimeout`] messages back to the engine.
///
/// Holds only a weak sender, so pending deadlines never keep a stopped
/// engine's queue alive. A deadline is checked against the subscriber's
/// window and latest deadline number when it fires; a stale one is ignored
/// there.
#[derive(Debug, Clone)]
pub(crate) struct Watchdog {
    commands: mpsc::WeakSender<EngineCommand>,
}

impl Watchdog {
    pub fn new(commands: mpsc::WeakSender<EngineCommand>) -> Self {
        Self { commands }
    }

    /// Fire a timeout for `(id, sample_index, deadline)` after `timeout_ms`.
    pub fn arm(&self, id: SubscriberId, sample_index: u64, deadline: u64, timeout_ms: u32) {
        if timeout_ms == 0 {
            return;
        }
        trace!(subscriber = %id, sample_index, deadline, timeout_ms, "Arming delivery deadline");
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(u64::from(timeout_ms))).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands
                    .send(EngineCommand::SampleTimeout {
                        id,
                        sample_index,
                        deadline,
                    })
                    .await;
            }
        });
    }
}
