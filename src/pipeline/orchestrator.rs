//! # Conversation Orchestrator
//!
//! Takes commands off the intake one at a time and turns each into a spoken turn.
//!
//! ## States:
//! - **Idle**: waiting on the intake
//! - **Generating**: a reply is streaming; every completed sentence is handed to the
//!   synthesizer and queued for delivery as soon as it appears
//!
//! A turn lasts until its last sentence has been delivered or abandoned. A failed turn is
//! logged and counted, never retried, and the orchestrator goes back to Idle for the next
//! command.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::intake::CommandReceiver;
use crate::pipeline::segmenter::SentenceSegmenter;
use crate::pipeline::sequencer::{DeliveryQueue, Turn, TurnReport};
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::synthesizer::SentenceSynthesizer;
use crate::pipeline::transcript::Transcript;
use crate::pipeline::types::{Command, CommandKind};
use crate::services::LanguageModel;
use futures_util::StreamExt;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Generating,
}

pub struct ConversationOrchestrator {
    receiver: CommandReceiver,
    llm: Arc<dyn LanguageModel>,
    synthesizer: Arc<SentenceSynthesizer>,
    delivery: DeliveryQueue,
    transcript: Transcript,
    admin_prefix: String,
    chat_prefix: String,
    stats: Arc<PipelineStats>,
    state: Arc<RwLock<OrchestratorState>>,
    cancel: CancellationToken,
}

impl ConversationOrchestrator {
    pub fn new(
        settings: &PipelineConfig,
        receiver: CommandReceiver,
        llm: Arc<dyn LanguageModel>,
        synthesizer: Arc<SentenceSynthesizer>,
        delivery: DeliveryQueue,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            llm,
            synthesizer,
            delivery,
            transcript: Transcript::new(settings.system_prompt.clone(), settings.history_max_turns),
            admin_prefix: settings.admin_prompt_prefix.clone(),
            chat_prefix: settings.chat_prompt_prefix.clone(),
            stats,
            state: Arc::new(RwLock::new(OrchestratorState::Idle)),
            cancel,
        }
    }

    /// Shared view of the current state, readable after `run` has taken ownership.
    pub fn state_handle(&self) -> Arc<RwLock<OrchestratorState>> {
        self.state.clone()
    }

    pub async fn run(mut self) {
        info!("Conversation orchestrator started");
        let cancel = self.cancel.clone();

        loop {
            let cmd = tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = self.receiver.take() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            self.set_state(OrchestratorState::Generating);
            let kind = cmd.kind;
            let waited = chrono::Utc::now() - cmd.received_at;
            debug!(kind = kind.as_str(), waited_ms = waited.num_milliseconds(), "Command taken");

            match self.run_turn(cmd).await {
                Ok(report) => {
                    self.stats.record_turn_completed();
                    info!(
                        turn = report.turn_id,
                        kind = kind.as_str(),
                        delivered = report.delivered,
                        skipped = report.skipped,
                        "Turn completed"
                    );
                }
                Err(PipelineError::Cancelled) => break,
                Err(e) => {
                    self.stats.record_turn_failed();
                    error!(kind = kind.as_str(), "Turn failed: {}", e);
                }
            }
            self.set_state(OrchestratorState::Idle);
        }

        self.set_state(OrchestratorState::Idle);
        info!("Conversation orchestrator stopped");
    }

    fn set_state(&self, state: OrchestratorState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    fn prompt_for(&self, cmd: &Command) -> String {
        let prefix = match cmd.kind {
            CommandKind::Admin => &self.admin_prefix,
            CommandKind::ChatMessage => &self.chat_prefix,
        };
        format!("{}{}", prefix, cmd.text)
    }

    /// Generate, segment and queue one reply, then wait for its delivery to finish.
    pub async fn run_turn(&mut self, cmd: Command) -> Result<TurnReport, PipelineError> {
        let cancel = self.cancel.clone();
        let prompt = self.prompt_for(&cmd);
        self.transcript.push_user(prompt);

        let turn = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            turn = self.delivery.begin_turn() => turn,
        };

        let messages = self.transcript.messages();
        let requested = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            requested = self.llm.stream_chat(&messages) => requested,
        };
        let mut tokens = match requested {
            Ok(tokens) => tokens,
            Err(e) => {
                self.transcript.discard_unanswered();
                return Err(PipelineError::Generation(e.to_string()));
            }
        };

        let mut segmenter = SentenceSegmenter::new();
        let mut reply = String::new();
        let mut failure = None;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = turn.abandoned() => {
                    warn!(turn = turn.id(), "Delivery abandoned, stopping generation");
                    break;
                }
                next = tokens.next() => next,
            };

            match next {
                Some(Ok(token)) => {
                    reply.push_str(&token);
                    for text in segmenter.push(&token) {
                        self.dispatch(&turn, text).await?;
                    }
                }
                Some(Err(e)) => {
                    failure = Some(PipelineError::Generation(e.to_string()));
                    break;
                }
                None => {
                    if let Some(text) = segmenter.finish() {
                        self.dispatch(&turn, text).await?;
                    }
                    break;
                }
            }
        }

        if failure.is_some() || reply.trim().is_empty() {
            self.transcript.discard_unanswered();
        } else {
            self.transcript.push_assistant(reply);
        }

        let delivered = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            delivered = turn.finish() => delivered,
        };

        match failure {
            Some(err) => Err(err),
            None => delivered,
        }
    }

    async fn dispatch(&self, turn: &Turn, text: String) -> Result<(), PipelineError> {
        let sentence = turn.next_sentence(text);
        debug!(turn = turn.id(), sequence = sentence.sequence_index, "Sentence ready: {}", sentence.text);
        turn.submit(self.synthesizer.submit(sentence)).await
    }
}
