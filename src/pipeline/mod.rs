//! # Delivery Pipeline
//!
//! Turns operator and live-chat input into spoken sentences delivered to viewers strictly
//! in order, one at a time, each only after the previous one finished playing.
//!
//! ## Data flow:
//! ```text
//! CommandIntake -> ConversationOrchestrator -> SentenceSynthesizer tasks (fan-out)
//!     -> DeliverySequencer (ordered fan-in) -> ConnectionRegistry -> viewers
//! viewers --playback_complete--> PlaybackGate --> DeliverySequencer
//! ```
//!
//! ## Backpressure:
//! The intake and the sequencer input each hold a single item. The orchestrator cannot run
//! more than one sentence ahead of delivery, and a busy chat simply loses messages instead
//! of piling them up.

pub mod context;
pub mod gate;
pub mod intake;
pub mod orchestrator;
pub mod registry;
pub mod segmenter;
pub mod sequencer;
pub mod stats;
pub mod synthesizer;
pub mod transcript;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use context::{PipelineContext, PipelineServices};
