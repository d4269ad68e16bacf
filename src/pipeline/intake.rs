//! # Command Intake
//!
//! Single-slot mailbox that turns operator and live-chat input into one ordered stream.
//!
//! ## Submission policies:
//! - **Admin** (`submit`): waits for the slot to free up; an operator command is never dropped.
//! - **Chat** (`try_submit`): if the slot is occupied the message is dropped and counted, so a
//!   busy chat cannot queue up unbounded work behind the current turn.
//!
//! The orchestrator is the only consumer (`CommandReceiver::take`).

use crate::error::PipelineError;
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::types::{Command, CommandKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Exactly one command may wait while the orchestrator is busy.
const INTAKE_CAPACITY: usize = 1;

/// Producer half, cloned into every submission path.
#[derive(Debug, Clone)]
pub struct CommandIntake {
    tx: mpsc::Sender<Command>,
    stats: Arc<PipelineStats>,
}

/// Consumer half, owned by the orchestrator.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

pub fn command_intake(stats: Arc<PipelineStats>) -> (CommandIntake, CommandReceiver) {
    let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
    (CommandIntake { tx, stats }, CommandReceiver { rx })
}

impl CommandIntake {
    /// Route a command to the policy its source requires.
    /// Returns `false` only when a chat message was dropped.
    pub async fn submit(&self, cmd: Command) -> Result<bool, PipelineError> {
        match cmd.kind {
            CommandKind::Admin => self.submit_blocking(cmd).await.map(|_| true),
            CommandKind::ChatMessage => self.try_submit(cmd),
        }
    }

    /// Wait until the slot is free, then enqueue.
    pub async fn submit_blocking(&self, cmd: Command) -> Result<(), PipelineError> {
        debug!(kind = cmd.kind.as_str(), "Queueing command (blocking)");
        self.tx.send(cmd).await.map_err(|_| PipelineError::Closed)?;
        self.stats.record_command_accepted();
        Ok(())
    }

    /// Enqueue if the slot is free; otherwise drop the command.
    pub fn try_submit(&self, cmd: Command) -> Result<bool, PipelineError> {
        match self.tx.try_send(cmd) {
            Ok(()) => {
                self.stats.record_command_accepted();
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                let total = self.stats.record_chat_dropped();
                warn!(
                    kind = dropped.kind.as_str(),
                    dropped_total = total,
                    "Intake busy, dropping command: {}",
                    dropped.text
                );
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::Closed),
        }
    }

    /// Whether a command is currently waiting in the slot.
    pub fn is_occupied(&self) -> bool {
        self.tx.capacity() == 0
    }
}

impl CommandReceiver {
    /// Next command in intake order; `None` once every sender is gone.
    pub async fn take(&mut self) -> Option<Command> {
        self.rx.recv().await
    }
}
