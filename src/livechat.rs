//! # Live-Chat Handler Interface
//!
//! Connectors for live-stream chat platforms (danmaku feeds and the like) are not part of
//! this crate. They call into a [`LiveChatHandler`] with one method per event kind, and the
//! handler decides what reaches the pipeline.
//!
//! [`IntakeChatHandler`] is the production implementation: every chat message is offered to
//! the command intake with the non-blocking policy, so a message arriving mid-turn is
//! dropped rather than queued. `POST /chat_input/` goes through the same handler.

use crate::pipeline::intake::CommandIntake;
use crate::pipeline::types::Command;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// One chat message as delivered by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub user: String,
    pub text: String,
}

#[async_trait]
pub trait LiveChatHandler: Send + Sync {
    /// Returns `true` if the message was accepted for a reply.
    async fn on_message(&self, event: ChatEvent) -> bool;

    /// The connector lost its upstream connection.
    async fn on_connection_lost(&self, reason: &str);
}

pub struct IntakeChatHandler {
    intake: CommandIntake,
}

impl IntakeChatHandler {
    pub fn new(intake: CommandIntake) -> Self {
        Self { intake }
    }
}

#[async_trait]
impl LiveChatHandler for IntakeChatHandler {
    async fn on_message(&self, event: ChatEvent) -> bool {
        let text = event.text.trim();
        if text.is_empty() {
            debug!(user = %event.user, "Ignoring empty chat message");
            return false;
        }

        debug!(user = %event.user, "Chat message: {}", text);
        match self.intake.try_submit(Command::chat(text)) {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(user = %event.user, "Chat message could not be queued: {}", e);
                false
            }
        }
    }

    async fn on_connection_lost(&self, reason: &str) {
        warn!("Live-chat connection lost: {}", reason);
    }
}
