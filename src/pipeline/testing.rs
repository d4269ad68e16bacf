//! In-process stand-ins for the external services and for viewers.

use crate::error::ServiceError;
use crate::pipeline::gate::PlaybackGate;
use crate::pipeline::registry::ViewerSink;
use crate::pipeline::types::EmotionTag;
use crate::services::{ChatMessage, EmotionClassifier, LanguageModel, SpeechSynthesizer, TokenStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

enum Script {
    Tokens(Vec<String>),
    Reject,
    BreakAfter(Vec<String>),
}

/// Language model that plays back scripted replies, one per request.
#[derive(Default)]
pub struct ScriptedLanguageModel {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    token_delay: Duration,
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

impl ScriptedLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, tokens: &[&str]) -> Self {
        self.push(Script::Tokens(owned(tokens)))
    }

    /// The request itself fails.
    pub fn reject(self) -> Self {
        self.push(Script::Reject)
    }

    /// Stream `tokens`, then a transport error.
    pub fn break_after(self, tokens: &[&str]) -> Self {
        self.push(Script::BreakAfter(owned(tokens)))
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    fn push(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream, ServiceError> {
        self.requests.lock().unwrap().push(messages.to_vec());

        let script = self.scripts.lock().unwrap().pop_front();
        let items: Vec<Result<String, ServiceError>> = match script {
            Some(Script::Tokens(tokens)) => tokens.into_iter().map(Ok).collect(),
            Some(Script::BreakAfter(tokens)) => tokens
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(ServiceError::Transport("connection reset".to_string()))))
                .collect(),
            Some(Script::Reject) | None => {
                return Err(ServiceError::Status { code: 500, body: "scripted failure".to_string() })
            }
        };

        let delay = self.token_delay;
        let stream = futures_util::stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

/// Synthesizer whose "audio" is the sentence's own bytes.
#[derive(Default)]
pub struct FakeSynthesizer {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    completed: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failures.insert(text.to_string());
        self
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(text) {
            return Err(ServiceError::Status { code: 500, body: "synthesis failed".to_string() });
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(text.as_bytes().to_vec())
    }
}

/// Classifier with fixed answers; unscripted text is an error.
#[derive(Default)]
pub struct ScriptedClassifier {
    tags: HashMap<String, EmotionTag>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, text: &str, tag: EmotionTag) -> Self {
        self.tags.insert(text.to_string(), tag);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmotionClassifier for ScriptedClassifier {
    async fn classify(&self, text: &str) -> Result<EmotionTag, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.tags
            .get(text)
            .copied()
            .ok_or_else(|| ServiceError::Decode(format!("no scripted emotion for '{}'", text)))
    }
}

/// Viewer that records every payload and, once given a gate, acknowledges playback.
pub struct RecordingViewer {
    received: Mutex<Vec<(Instant, String)>>,
    gate: Option<Arc<PlaybackGate>>,
    acks: bool,
    ack_delay: Duration,
    fails: bool,
    stall: Option<Duration>,
}

impl Default for RecordingViewer {
    fn default() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            gate: None,
            acks: true,
            ack_delay: Duration::ZERO,
            fails: false,
            stall: None,
        }
    }
}

impl RecordingViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records payloads but never acknowledges.
    pub fn silent() -> Self {
        Self { acks: false, ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fails: true, ..Self::default() }
    }

    pub fn stalled(stall: Duration) -> Self {
        Self { stall: Some(stall), ..Self::default() }
    }

    pub fn acking(mut self, gate: Arc<PlaybackGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    pub fn payloads(&self) -> Vec<String> {
        self.received.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn arrival_times(&self) -> Vec<Instant> {
        self.received.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.payloads()
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect()
    }

    /// `content` of every delivered sentence, in arrival order.
    pub fn contents(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|m| m["content"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl ViewerSink for RecordingViewer {
    async fn send_text(&self, payload: Arc<str>) -> Result<(), String> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.fails {
            return Err("connection reset by peer".to_string());
        }

        self.received.lock().unwrap().push((Instant::now(), payload.to_string()));

        if let (true, Some(gate)) = (self.acks, self.gate.clone()) {
            let delay = self.ack_delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                gate.signal();
            });
        }
        Ok(())
    }
}
