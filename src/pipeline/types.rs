//! Values that flow through the delivery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a command came from. Decides the submission policy at the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Operator override; never dropped
    Admin,
    /// Ambient live-chat message; dropped when the intake is busy
    ChatMessage,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Admin => "admin",
            CommandKind::ChatMessage => "chat",
        }
    }
}

/// One unit of input for the orchestrator. Immutable once created.
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Command {
    pub fn admin(text: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Admin,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::ChatMessage,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// A punctuation-delimited unit of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub sequence_index: u64,
    pub text: String,
}

/// Facial/vocal tone attached to a delivered sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionTag {
    #[default]
    Neutral,
    Happy,
    Angry,
    Sad,
    Relaxed,
}

impl EmotionTag {
    pub const ALL: [EmotionTag; 5] = [
        EmotionTag::Neutral,
        EmotionTag::Happy,
        EmotionTag::Angry,
        EmotionTag::Sad,
        EmotionTag::Relaxed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionTag::Neutral => "neutral",
            EmotionTag::Happy => "happy",
            EmotionTag::Angry => "angry",
            EmotionTag::Sad => "sad",
            EmotionTag::Relaxed => "relaxed",
        }
    }

    /// Parse a label as produced by the classifier. Surrounding quotes, whitespace
    /// and case are ignored; anything else is `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let cleaned = label.trim().trim_matches(|c| c == '"' || c == '\'').to_ascii_lowercase();
        Self::ALL.into_iter().find(|tag| tag.as_str() == cleaned)
    }
}

impl fmt::Display for EmotionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the synthesis half of a pending delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Audio(Vec<u8>),
    NoAudio,
}

/// Messages the server pushes to viewers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// One sentence with its audio (base64 WAV) and emotion tag
    #[serde(rename = "text_audio")]
    TextAudio {
        content: String,
        data: String,
        tag: EmotionTag,
    },
}

impl ServerMessage {
    pub fn text_audio(sentence: &Sentence, audio: &[u8], tag: EmotionTag) -> Self {
        use base64::Engine as _;

        ServerMessage::TextAudio {
            content: sentence.text.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(audio),
            tag,
        }
    }
}

/// Messages viewers send back. Unknown types are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "playback_complete")]
    PlaybackComplete,

    #[serde(other)]
    Unknown,
}
