//! # External Collaborators
//!
//! The pipeline talks to three services it does not own:
//! - **LanguageModel**: streams a spoken reply token by token
//! - **SpeechSynthesizer**: turns one sentence into WAV bytes
//! - **EmotionClassifier**: tags one sentence with an [`EmotionTag`]
//!
//! Each is a trait so the pipeline can be driven by in-process fakes in tests and by the
//! HTTP clients in this module in production.

pub mod emotion;
pub mod openai;
pub mod sse;
pub mod tts;

use crate::error::ServiceError;
use crate::pipeline::types::EmotionTag;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use emotion::LlmEmotionClassifier;
pub use openai::OpenAiChatClient;
pub use tts::HttpSpeechSynthesizer;

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation sent to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Text deltas of a streamed reply. An `Err` item ends the reply early.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ServiceError>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a streamed completion. Fails if the request itself is rejected.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream, ServiceError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError>;
}

#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<EmotionTag, ServiceError>;
}
