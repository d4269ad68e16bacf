//! # Delivery Sequencer
//!
//! The single consumer that puts sentences in front of viewers, one at a time, in the order
//! they were submitted.
//!
//! ## Per item:
//! - **Sentence**: wait for its audio and emotion, broadcast it, then block on the playback
//!   gate until a viewer confirms playback or the timeout elapses. A sentence without audio
//!   is skipped with no gate wait.
//! - **EndOfTurn**: report the turn's outcome to whoever is waiting on it.
//!
//! ## Turns:
//! Producers go through [`DeliveryQueue::begin_turn`], which grants exclusive use of the
//! single-slot input until the turn is finished, so sentences of two turns never interleave.
//! A gate timeout abandons the turn: its remaining sentences are discarded unplayed and the
//! end-of-turn report carries [`PipelineError::PlaybackTimeout`].

use crate::error::PipelineError;
use crate::pipeline::gate::{GateOutcome, PlaybackGate};
use crate::pipeline::registry::ConnectionRegistry;
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::synthesizer::PendingDelivery;
use crate::pipeline::types::{Sentence, ServerMessage, SynthesisOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// At most one delivery waits while the sequencer is busy.
const DELIVERY_CAPACITY: usize = 1;

/// Identity of a turn plus the token that is cancelled when it is abandoned.
#[derive(Debug, Clone)]
pub struct TurnTag {
    pub id: u64,
    abandon: CancellationToken,
}

impl TurnTag {
    pub fn is_abandoned(&self) -> bool {
        self.abandon.is_cancelled()
    }
}

pub enum DeliveryItem {
    Sentence { turn: TurnTag, pending: PendingDelivery },
    EndOfTurn { turn: TurnTag, done: oneshot::Sender<Result<TurnReport, PipelineError>> },
}

/// What happened to the sentences of a completed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    pub turn_id: u64,
    pub delivered: usize,
    pub skipped: usize,
}

/// Producer side of the sequencer input.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: Arc<Mutex<mpsc::Sender<DeliveryItem>>>,
    next_turn: Arc<AtomicU64>,
    next_sequence: Arc<AtomicU64>,
}

pub fn delivery_queue() -> (DeliveryQueue, mpsc::Receiver<DeliveryItem>) {
    let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
    let queue = DeliveryQueue {
        tx: Arc::new(Mutex::new(tx)),
        next_turn: Arc::new(AtomicU64::new(1)),
        next_sequence: Arc::new(AtomicU64::new(0)),
    };
    (queue, rx)
}

impl DeliveryQueue {
    /// Wait for any other turn to finish, then take the input for a new one.
    pub async fn begin_turn(&self) -> Turn {
        let tx = self.tx.clone().lock_owned().await;
        let id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        debug!(turn = id, "Turn started");
        Turn {
            tx,
            tag: TurnTag { id, abandon: CancellationToken::new() },
            sequences: self.next_sequence.clone(),
        }
    }
}

/// Exclusive handle on the sequencer input for one turn.
pub struct Turn {
    tx: OwnedMutexGuard<mpsc::Sender<DeliveryItem>>,
    tag: TurnTag,
    sequences: Arc<AtomicU64>,
}

impl Turn {
    pub fn id(&self) -> u64 {
        self.tag.id
    }

    /// Assign the next pipeline-wide sequence index.
    pub fn next_sentence(&self, text: impl Into<String>) -> Sentence {
        Sentence {
            sequence_index: self.sequences.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
        }
    }

    /// Hand a pending delivery to the sequencer. Waits while the slot is occupied.
    pub async fn submit(&self, pending: PendingDelivery) -> Result<(), PipelineError> {
        let item = DeliveryItem::Sentence { turn: self.tag.clone(), pending };
        self.tx.send(item).await.map_err(|_| PipelineError::Closed)
    }

    /// Resolves when the sequencer gives up on this turn.
    pub async fn abandoned(&self) {
        self.tag.abandon.cancelled().await
    }

    /// Mark the end of the turn, release the input and wait for the outcome.
    pub async fn finish(self) -> Result<TurnReport, PipelineError> {
        let (done, outcome) = oneshot::channel();
        let Turn { tx, tag, .. } = self;
        tx.send(DeliveryItem::EndOfTurn { turn: tag, done })
            .await
            .map_err(|_| PipelineError::Closed)?;
        drop(tx);

        outcome.await.map_err(|_| PipelineError::Closed)?
    }
}

#[derive(Debug)]
enum DeliveryOutcome {
    Played,
    Skipped,
    TimedOut { sequence: u64 },
}

#[derive(Debug, Default)]
struct TurnProgress {
    turn_id: u64,
    delivered: usize,
    skipped: usize,
    failure: Option<PipelineError>,
}

impl TurnProgress {
    fn into_result(self) -> Result<TurnReport, PipelineError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(TurnReport {
                turn_id: self.turn_id,
                delivered: self.delivered,
                skipped: self.skipped,
            }),
        }
    }
}

pub struct DeliverySequencer {
    rx: mpsc::Receiver<DeliveryItem>,
    registry: Arc<ConnectionRegistry>,
    gate: Arc<PlaybackGate>,
    stats: Arc<PipelineStats>,
    playback_timeout: Duration,
    cancel: CancellationToken,
    last_sequence: Option<u64>,
}

impl DeliverySequencer {
    pub fn new(
        rx: mpsc::Receiver<DeliveryItem>,
        registry: Arc<ConnectionRegistry>,
        gate: Arc<PlaybackGate>,
        stats: Arc<PipelineStats>,
        playback_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            registry,
            gate,
            stats,
            playback_timeout,
            cancel,
            last_sequence: None,
        }
    }

    pub async fn run(mut self) {
        info!(timeout = ?self.playback_timeout, "Delivery sequencer started");
        let cancel = self.cancel.clone();
        let mut progress: Option<TurnProgress> = None;

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            match item {
                DeliveryItem::Sentence { turn, pending } => {
                    let current = progress_for(&mut progress, &turn);

                    if turn.is_abandoned() {
                        debug!(
                            turn = turn.id,
                            sequence = pending.sentence().sequence_index,
                            "Discarding sentence of abandoned turn"
                        );
                        self.stats.record_sentence_discarded();
                        continue;
                    }

                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => break,
                        outcome = self.deliver(pending) => outcome,
                    };

                    match outcome {
                        DeliveryOutcome::Played => current.delivered += 1,
                        DeliveryOutcome::Skipped => current.skipped += 1,
                        DeliveryOutcome::TimedOut { sequence } => {
                            current.failure = Some(PipelineError::PlaybackTimeout { sequence });
                            turn.abandon.cancel();
                        }
                    }
                }
                DeliveryItem::EndOfTurn { turn, done } => {
                    let finished = match progress.take() {
                        Some(p) if p.turn_id == turn.id => p,
                        other => {
                            progress = other;
                            TurnProgress { turn_id: turn.id, ..Default::default() }
                        }
                    };
                    debug!(turn = turn.id, "Turn reached the end of delivery");
                    // The submitter may have stopped waiting
                    let _ = done.send(finished.into_result());
                }
            }
        }

        info!("Delivery sequencer stopped");
    }

    async fn deliver(&mut self, mut pending: PendingDelivery) -> DeliveryOutcome {
        let (audio, tag) = pending.resolve().await;
        let sentence = pending.sentence();
        let sequence = sentence.sequence_index;

        if let Some(last) = self.last_sequence {
            debug_assert!(sequence > last, "sequence {} delivered after {}", sequence, last);
        }
        self.last_sequence = Some(sequence);

        let bytes = match audio {
            SynthesisOutcome::Audio(bytes) => bytes,
            SynthesisOutcome::NoAudio => {
                warn!(sequence, "No audio for sentence, skipping: {}", sentence.text);
                self.stats.record_sentence_skipped();
                return DeliveryOutcome::Skipped;
            }
        };

        let payload: Arc<str> = match serde_json::to_string(&ServerMessage::text_audio(sentence, &bytes, tag)) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(sequence, "Failed to encode delivery message: {}", e);
                self.stats.record_sentence_skipped();
                return DeliveryOutcome::Skipped;
            }
        };

        // Armed before the broadcast so an acknowledgment that beats us back is kept
        self.gate.arm();
        let reached = self.registry.broadcast_text(payload).await;
        if reached == 0 {
            warn!(sequence, "Broadcast reached no viewers");
        }
        info!(sequence, emotion = %tag, viewers = reached, "Delivered sentence: {}", sentence.text);

        match self.gate.wait_and_clear(self.playback_timeout).await {
            GateOutcome::Signaled => {
                self.stats.record_sentence_delivered();
                DeliveryOutcome::Played
            }
            GateOutcome::TimedOut => {
                self.stats.record_gate_timeout();
                error!(
                    sequence,
                    timeout = ?self.playback_timeout,
                    "Playback was not confirmed, abandoning turn"
                );
                DeliveryOutcome::TimedOut { sequence }
            }
        }
    }
}

fn progress_for<'a>(progress: &'a mut Option<TurnProgress>, turn: &TurnTag) -> &'a mut TurnProgress {
    if progress.as_ref().map(|p| p.turn_id) != Some(turn.id) {
        *progress = Some(TurnProgress { turn_id: turn.id, ..Default::default() });
    }
    progress.get_or_insert_with(Default::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::synthesizer::SentenceSynthesizer;
    use crate::pipeline::testing::{FakeSynthesizer, RecordingViewer, ScriptedClassifier};
    use crate::pipeline::types::EmotionTag;
    use std::time::Instant;
    use uuid::Uuid;

    struct Harness {
        queue: DeliveryQueue,
        synthesizer: SentenceSynthesizer,
        viewer: Arc<RecordingViewer>,
        gate: Arc<PlaybackGate>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    }

    impl Harness {
        async fn start(tts: FakeSynthesizer, classifier: ScriptedClassifier, viewer: RecordingViewer) -> Self {
            Self::start_with_timeout(tts, classifier, viewer, Duration::from_secs(5)).await
        }

        async fn start_with_timeout(
            tts: FakeSynthesizer,
            classifier: ScriptedClassifier,
            viewer: RecordingViewer,
            playback_timeout: Duration,
        ) -> Self {
            let stats = Arc::new(PipelineStats::default());
            let gate = Arc::new(PlaybackGate::new());
            let registry = Arc::new(ConnectionRegistry::new(3, Duration::from_secs(1), stats.clone()));
            let viewer = Arc::new(viewer.acking(gate.clone()));
            registry.register(Uuid::new_v4(), viewer.clone()).await;

            let (queue, rx) = delivery_queue();
            let cancel = CancellationToken::new();
            let sequencer = DeliverySequencer::new(
                rx,
                registry,
                gate.clone(),
                stats.clone(),
                playback_timeout,
                cancel.clone(),
            );
            tokio::spawn(sequencer.run());

            Self {
                queue,
                synthesizer: SentenceSynthesizer::new(Arc::new(tts), Arc::new(classifier)),
                viewer,
                gate,
                stats,
                cancel,
            }
        }

        async fn speak(&self, sentences: &[&str]) -> Result<TurnReport, PipelineError> {
            let turn = self.queue.begin_turn().await;
            for text in sentences {
                let sentence = turn.next_sentence(*text);
                turn.submit(self.synthesizer.submit(sentence)).await?;
            }
            turn.finish().await
        }
    }

    #[tokio::test]
    async fn test_order_survives_shuffled_synthesis_latency() {
        let tts = FakeSynthesizer::new()
            .with_delay("一。", Duration::from_millis(120))
            .with_delay("二。", Duration::from_millis(10))
            .with_delay("三。", Duration::from_millis(60))
            .with_delay("四。", Duration::from_millis(0));
        let harness = Harness::start(tts, ScriptedClassifier::new(), RecordingViewer::new()).await;

        let report = harness.speak(&["一。", "二。", "三。", "四。"]).await.unwrap();

        assert_eq!(report.delivered, 4);
        assert_eq!(harness.viewer.contents(), vec!["一。", "二。", "三。", "四。"]);
    }

    #[tokio::test]
    async fn test_happy_then_neutral_scenario() {
        let classifier = ScriptedClassifier::new().with_tag("你好。", EmotionTag::Happy);
        let harness = Harness::start(FakeSynthesizer::new(), classifier, RecordingViewer::new()).await;

        harness.speak(&["你好。", "今天天气不错？"]).await.unwrap();

        let messages = harness.viewer.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "text_audio");
        assert_eq!(messages[0]["content"], "你好。");
        assert_eq!(messages[0]["tag"], "happy");
        assert_eq!(messages[1]["content"], "今天天气不错？");
        assert_eq!(messages[1]["tag"], "neutral");
        assert!(!harness.gate.is_signaled());
    }

    #[tokio::test]
    async fn test_next_broadcast_waits_for_playback() {
        let viewer = RecordingViewer::new().with_ack_delay(Duration::from_millis(150));
        let harness = Harness::start(FakeSynthesizer::new(), ScriptedClassifier::new(), viewer).await;

        let started = Instant::now();
        harness.speak(&["a。", "b。"]).await.unwrap();

        let times = harness.viewer.arrival_times();
        assert_eq!(times.len(), 2);
        assert!(times[1].duration_since(times[0]) >= Duration::from_millis(150));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_failed_synthesis_is_skipped_without_gate_wait() {
        let tts = FakeSynthesizer::new().failing_on("坏。");
        let harness = Harness::start_with_timeout(
            tts,
            ScriptedClassifier::new(),
            RecordingViewer::new(),
            Duration::from_secs(2),
        )
        .await;

        let started = Instant::now();
        let report = harness.speak(&["坏。", "好。"]).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(harness.viewer.contents(), vec!["好。"]);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(harness.stats.snapshot().sentences_skipped, 1);
    }

    #[tokio::test]
    async fn test_gate_timeout_abandons_rest_of_turn() {
        let harness = Harness::start_with_timeout(
            FakeSynthesizer::new(),
            ScriptedClassifier::new(),
            RecordingViewer::silent(),
            Duration::from_millis(100),
        )
        .await;

        let result = harness.speak(&["一。", "二。", "三。"]).await;

        let first = harness.viewer.messages();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["content"], "一。");
        match result {
            Err(PipelineError::PlaybackTimeout { .. }) => {}
            other => panic!("expected a playback timeout, got {:?}", other),
        }

        let stats = harness.stats.snapshot();
        assert_eq!(stats.gate_timeouts, 1);
        assert_eq!(stats.sentences_discarded, 2);
    }

    #[tokio::test]
    async fn test_next_turn_runs_after_timeout() {
        let harness = Harness::start_with_timeout(
            FakeSynthesizer::new(),
            ScriptedClassifier::new(),
            RecordingViewer::silent(),
            Duration::from_millis(50),
        )
        .await;

        assert!(harness.speak(&["一。", "二。"]).await.is_err());
        // The next turn gets a fresh chance; it times out on its own first sentence
        assert!(harness.speak(&["三。"]).await.is_err());
        assert_eq!(harness.viewer.contents(), vec!["一。", "三。"]);
    }

    #[tokio::test]
    async fn test_turns_do_not_interleave() {
        let harness = Arc::new(
            Harness::start(FakeSynthesizer::new(), ScriptedClassifier::new(), RecordingViewer::new()).await,
        );

        let a = {
            let harness = harness.clone();
            tokio::spawn(async move { harness.speak(&["a1。", "a2。", "a3。"]).await })
        };
        let b = {
            let harness = harness.clone();
            tokio::spawn(async move { harness.speak(&["b1。", "b2。", "b3。"]).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let contents = harness.viewer.contents();
        let first_turn: String = contents[0].chars().take(1).collect();
        assert!(contents[..3].iter().all(|c| c.starts_with(&first_turn)));
        assert!(contents[3..].iter().all(|c| !c.starts_with(&first_turn)));
    }

    #[tokio::test]
    async fn test_sequence_indices_never_reused() {
        let (queue, _rx) = delivery_queue();
        let first = queue.begin_turn().await;
        let a = first.next_sentence("a").sequence_index;
        let b = first.next_sentence("b").sequence_index;
        drop(first);
        let second = queue.begin_turn().await;
        let c = second.next_sentence("c").sequence_index;
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_turn() {
        let harness = Harness::start_with_timeout(
            FakeSynthesizer::new(),
            ScriptedClassifier::new(),
            RecordingViewer::silent(),
            Duration::from_secs(30),
        )
        .await;

        let turn = {
            let queue = harness.queue.clone();
            let pending = harness.synthesizer.submit(Sentence {
                sequence_index: 0,
                text: "x。".to_string(),
            });
            tokio::spawn(async move {
                let turn = queue.begin_turn().await;
                turn.submit(pending).await?;
                turn.finish().await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), turn).await.unwrap().unwrap();
        assert_eq!(result, Err(PipelineError::Closed));
    }
}
