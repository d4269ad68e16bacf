//! Lock-free counters describing what the pipeline has done since startup.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    commands_accepted: AtomicU64,
    chat_commands_dropped: AtomicU64,
    turns_completed: AtomicU64,
    turns_failed: AtomicU64,
    sentences_delivered: AtomicU64,
    sentences_skipped: AtomicU64,
    sentences_discarded: AtomicU64,
    gate_timeouts: AtomicU64,
    viewers_evicted: AtomicU64,
}

/// Point-in-time copy for the health and metrics endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub commands_accepted: u64,
    pub chat_commands_dropped: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub sentences_delivered: u64,
    pub sentences_skipped: u64,
    pub sentences_discarded: u64,
    pub gate_timeouts: u64,
    pub viewers_evicted: u64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl PipelineStats {
    pub fn record_command_accepted(&self) {
        bump(&self.commands_accepted);
    }

    /// Returns the running total so the caller can log it.
    pub fn record_chat_dropped(&self) -> u64 {
        bump(&self.chat_commands_dropped)
    }

    pub fn record_turn_completed(&self) {
        bump(&self.turns_completed);
    }

    pub fn record_turn_failed(&self) {
        bump(&self.turns_failed);
    }

    pub fn record_sentence_delivered(&self) {
        bump(&self.sentences_delivered);
    }

    pub fn record_sentence_skipped(&self) {
        bump(&self.sentences_skipped);
    }

    pub fn record_sentence_discarded(&self) {
        bump(&self.sentences_discarded);
    }

    pub fn record_gate_timeout(&self) {
        bump(&self.gate_timeouts);
    }

    pub fn record_viewer_evicted(&self) {
        bump(&self.viewers_evicted);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            chat_commands_dropped: self.chat_commands_dropped.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            sentences_delivered: self.sentences_delivered.load(Ordering::Relaxed),
            sentences_skipped: self.sentences_skipped.load(Ordering::Relaxed),
            sentences_discarded: self.sentences_discarded.load(Ordering::Relaxed),
            gate_timeouts: self.gate_timeouts.load(Ordering::Relaxed),
            viewers_evicted: self.viewers_evicted.load(Ordering::Relaxed),
        }
    }
}
