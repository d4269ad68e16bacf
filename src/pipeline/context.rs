//! # Pipeline Context
//!
//! Owns every piece of the delivery pipeline and the two background workers. Built once at
//! startup and shared with the HTTP and WebSocket layers through `Arc<PipelineContext>`;
//! nothing lives in process-wide globals.
//!
//! ## Lifecycle:
//! 1. `start()` wires registry, gate, intake, sequencer input and synthesizer together and
//!    spawns the orchestrator and sequencer tasks
//! 2. handlers submit commands, register viewers and forward acknowledgments
//! 3. `shutdown()` cancels the shared token and joins the workers; in-flight service calls
//!    are aborted rather than awaited

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::gate::PlaybackGate;
use crate::pipeline::intake::{command_intake, CommandIntake};
use crate::pipeline::orchestrator::{ConversationOrchestrator, OrchestratorState};
use crate::pipeline::registry::ConnectionRegistry;
use crate::pipeline::sequencer::{delivery_queue, DeliveryQueue, DeliverySequencer, TurnReport};
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::synthesizer::{classify_or_neutral, SentenceSynthesizer};
use crate::pipeline::types::EmotionTag;
use crate::services::{EmotionClassifier, LanguageModel, SpeechSynthesizer};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The external collaborators the pipeline is driven by.
#[derive(Clone)]
pub struct PipelineServices {
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub classifier: Arc<dyn EmotionClassifier>,
}

pub struct PipelineContext {
    registry: Arc<ConnectionRegistry>,
    gate: Arc<PlaybackGate>,
    intake: CommandIntake,
    delivery: DeliveryQueue,
    synthesizer: Arc<SentenceSynthesizer>,
    classifier: Arc<dyn EmotionClassifier>,
    stats: Arc<PipelineStats>,
    orchestrator_state: Arc<RwLock<OrchestratorState>>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineContext {
    /// Build the pipeline and spawn its workers. Must be called inside a tokio runtime.
    pub fn start(settings: &PipelineConfig, services: PipelineServices) -> Arc<Self> {
        let stats = Arc::new(PipelineStats::default());
        let cancel = CancellationToken::new();
        let gate = Arc::new(PlaybackGate::new());
        let registry = Arc::new(ConnectionRegistry::new(
            settings.max_send_failures,
            settings.send_timeout(),
            stats.clone(),
        ));
        let synthesizer = Arc::new(SentenceSynthesizer::new(
            services.tts.clone(),
            services.classifier.clone(),
        ));

        let (intake, receiver) = command_intake(stats.clone());
        let (delivery, delivery_rx) = delivery_queue();

        let sequencer = DeliverySequencer::new(
            delivery_rx,
            registry.clone(),
            gate.clone(),
            stats.clone(),
            settings.playback_timeout(),
            cancel.child_token(),
        );
        let orchestrator = ConversationOrchestrator::new(
            settings,
            receiver,
            services.llm.clone(),
            synthesizer.clone(),
            delivery.clone(),
            stats.clone(),
            cancel.child_token(),
        );
        let orchestrator_state = orchestrator.state_handle();

        let workers = vec![tokio::spawn(sequencer.run()), tokio::spawn(orchestrator.run())];
        info!(
            playback_timeout_secs = settings.playback_timeout_secs,
            history_max_turns = settings.history_max_turns,
            "Delivery pipeline started"
        );

        Arc::new(Self {
            registry,
            gate,
            intake,
            delivery,
            synthesizer,
            classifier: services.classifier,
            stats,
            orchestrator_state,
            cancel,
            workers: Mutex::new(workers),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<PlaybackGate> {
        &self.gate
    }

    pub fn intake(&self) -> &CommandIntake {
        &self.intake
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn orchestrator_state(&self) -> OrchestratorState {
        self.orchestrator_state
            .read()
            .map(|state| *state)
            .unwrap_or(OrchestratorState::Idle)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Deliver `text` as a single sentence and wait until its turn is over.
    ///
    /// Runs as its own turn, so it waits for any reply currently being delivered.
    /// A supplied emotion skips classification.
    pub async fn speak(&self, text: &str, emotion: Option<EmotionTag>) -> Result<TurnReport, PipelineError> {
        if !self.is_running() {
            return Err(PipelineError::Cancelled);
        }

        let turn = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            turn = self.delivery.begin_turn() => turn,
        };
        let sentence = turn.next_sentence(text.trim());
        info!(turn = turn.id(), sequence = sentence.sequence_index, "Speaking: {}", sentence.text);

        let pending = self.synthesizer.submit_with_emotion(sentence, emotion);
        turn.submit(pending).await?;

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = turn.finish() => result,
        };
        match &result {
            Ok(_) => self.stats.record_turn_completed(),
            Err(e) => {
                self.stats.record_turn_failed();
                warn!("Speak request failed: {}", e);
            }
        }
        result
    }

    /// Classify a sentence on its own, outside any turn.
    pub async fn classify(&self, text: &str) -> EmotionTag {
        classify_or_neutral(self.classifier.as_ref(), text).await
    }

    /// Stop the workers and wait for them to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Pipeline worker ended abnormally: {}", e);
            }
        }
        info!("Delivery pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::pipeline::testing::{FakeSynthesizer, RecordingViewer, ScriptedClassifier, ScriptedLanguageModel};
    use crate::pipeline::types::Command;
    use std::time::Duration;
    use uuid::Uuid;

    fn services(llm: ScriptedLanguageModel, classifier: ScriptedClassifier) -> PipelineServices {
        PipelineServices {
            llm: Arc::new(llm),
            tts: Arc::new(FakeSynthesizer::new()),
            classifier: Arc::new(classifier),
        }
    }

    fn settings(playback_timeout_secs: u64) -> PipelineConfig {
        let mut settings = AppConfig::default().pipeline;
        settings.playback_timeout_secs = playback_timeout_secs;
        settings
    }

    #[tokio::test]
    async fn test_speak_waits_for_playback() {
        let pipeline = PipelineContext::start(
            &settings(5),
            services(ScriptedLanguageModel::new(), ScriptedClassifier::new().with_tag("你好。", EmotionTag::Happy)),
        );
        let viewer = Arc::new(RecordingViewer::new().acking(pipeline.gate().clone()));
        pipeline.registry().register(Uuid::new_v4(), viewer.clone()).await;

        let report = pipeline.speak("你好。", None).await.unwrap();
        assert_eq!(report.delivered, 1);

        let messages = viewer.messages();
        assert_eq!(messages[0]["content"], "你好。");
        assert_eq!(messages[0]["tag"], "happy");

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_speak_times_out_without_viewers() {
        let pipeline = PipelineContext::start(&settings(1), services(ScriptedLanguageModel::new(), ScriptedClassifier::new()));

        let result = pipeline.speak("没人听。", Some(EmotionTag::Sad)).await;
        assert!(matches!(result, Err(PipelineError::PlaybackTimeout { .. })));

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_flow_to_viewers() {
        let llm = ScriptedLanguageModel::new().reply(&["欢迎", "来到直播间！"]);
        let pipeline = PipelineContext::start(&settings(5), services(llm, ScriptedClassifier::new()));
        let viewer = Arc::new(RecordingViewer::new().acking(pipeline.gate().clone()));
        pipeline.registry().register(Uuid::new_v4(), viewer.clone()).await;

        pipeline.intake().submit(Command::chat("大家好")).await.unwrap();
        for _ in 0..200 {
            if pipeline.stats().snapshot().turns_completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(viewer.contents(), vec!["欢迎来到直播间！"]);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_waiting_speaker() {
        let pipeline = PipelineContext::start(&settings(30), services(ScriptedLanguageModel::new(), ScriptedClassifier::new()));

        let speaker = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.speak("等一等。", None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), pipeline.shutdown())
            .await
            .expect("shutdown must not wait for the playback timeout");
        let result = speaker.await.unwrap();
        assert!(result.is_err());
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.orchestrator_state(), OrchestratorState::Idle);

        // Further requests are refused
        assert_eq!(pipeline.speak("再来。", None).await, Err(PipelineError::Cancelled));
    }
}
