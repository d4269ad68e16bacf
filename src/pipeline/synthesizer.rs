//! # Sentence Synthesizer
//!
//! Starts synthesis and emotion classification for a sentence the moment it is submitted,
//! so sentence N+1 is already being synthesized while sentence N is still playing.
//!
//! Both halves run as independent tokio tasks and never fail: a synthesis error resolves to
//! [`SynthesisOutcome::NoAudio`], a classification error to [`EmotionTag::Neutral`].
//! Dropping a [`PendingDelivery`] aborts whatever is still running.

use crate::pipeline::types::{EmotionTag, Sentence, SynthesisOutcome};
use crate::services::{EmotionClassifier, SpeechSynthesizer};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct SentenceSynthesizer {
    tts: Arc<dyn SpeechSynthesizer>,
    classifier: Arc<dyn EmotionClassifier>,
}

/// A sentence paired with its in-flight synthesis and classification.
pub struct PendingDelivery {
    sentence: Sentence,
    audio: JoinHandle<SynthesisOutcome>,
    emotion: JoinHandle<EmotionTag>,
}

/// Classify `text`, falling back to neutral on any failure.
pub async fn classify_or_neutral(classifier: &dyn EmotionClassifier, text: &str) -> EmotionTag {
    match classifier.classify(text).await {
        Ok(tag) => tag,
        Err(e) => {
            warn!("Emotion classification failed, using neutral: {}", e);
            EmotionTag::Neutral
        }
    }
}

impl SentenceSynthesizer {
    pub fn new(tts: Arc<dyn SpeechSynthesizer>, classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self { tts, classifier }
    }

    pub fn submit(&self, sentence: Sentence) -> PendingDelivery {
        self.submit_with_emotion(sentence, None)
    }

    /// Like [`submit`](Self::submit), but a known emotion skips classification.
    pub fn submit_with_emotion(&self, sentence: Sentence, emotion: Option<EmotionTag>) -> PendingDelivery {
        debug!(sequence = sentence.sequence_index, "Starting synthesis: {}", sentence.text);

        let audio = {
            let tts = self.tts.clone();
            let text = sentence.text.clone();
            let sequence = sentence.sequence_index;
            tokio::spawn(async move {
                match tts.synthesize(&text).await {
                    Ok(bytes) => SynthesisOutcome::Audio(bytes),
                    Err(e) => {
                        warn!(sequence, "Synthesis failed: {}", e);
                        SynthesisOutcome::NoAudio
                    }
                }
            })
        };

        let emotion = match emotion {
            Some(tag) => tokio::spawn(async move { tag }),
            None => {
                let classifier = self.classifier.clone();
                let text = sentence.text.clone();
                tokio::spawn(async move { classify_or_neutral(classifier.as_ref(), &text).await })
            }
        };

        PendingDelivery { sentence, audio, emotion }
    }
}

impl PendingDelivery {
    pub fn sentence(&self) -> &Sentence {
        &self.sentence
    }

    /// Wait for both halves. Completion order does not matter.
    pub async fn resolve(&mut self) -> (SynthesisOutcome, EmotionTag) {
        let (audio, emotion) = tokio::join!(&mut self.audio, &mut self.emotion);

        let audio = audio.unwrap_or_else(|e| {
            warn!(sequence = self.sentence.sequence_index, "Synthesis task ended abnormally: {}", e);
            SynthesisOutcome::NoAudio
        });
        let emotion = emotion.unwrap_or_else(|e| {
            warn!(sequence = self.sentence.sequence_index, "Classification task ended abnormally: {}", e);
            EmotionTag::Neutral
        });
        (audio, emotion)
    }
}

impl Drop for PendingDelivery {
    fn drop(&mut self) {
        self.audio.abort();
        self.emotion.abort();
    }
}
