//! Feedback tracking: which retrieved chunks actually helped.
//!
//! Signals arrive after the fact (from review outcomes or explicit marks)
//! and feed aggregate stats that operators read when tuning source
//! priorities.

use dashmap::DashMap;
use serde::Serialize;

use crate::types::SourceKind;

/// One chunk's running tally.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ChunkFeedback {
    pub helpful: u64,
    pub unhelpful: u64,
}

impl ChunkFeedback {
    pub fn helpful_ratio(&self) -> Option<f32> {
        let total = self.helpful + self.unhelpful;
        if total == 0 {
            None
        } else {
            Some(self.helpful as f32 / total as f32)
        }
    }
}

/// Aggregate view per source.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SourceFeedback {
    pub helpful: u64,
    pub unhelpful: u64,
}

/// Collects helpful/unhelpful marks per chunk id and per source.
#[derive(Default)]
pub struct FeedbackTracker {
    by_chunk: DashMap<String, ChunkFeedback>,
    by_source: DashMap<SourceKind, SourceFeedback>,
}

impl FeedbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, chunk_id: &str, source: SourceKind, helpful: bool) {
        let mut chunk = self.by_chunk.entry(chunk_id.to_string()).or_default();
        let mut src = self.by_source.entry(source).or_default();
        if helpful {
            chunk.helpful += 1;
            src.helpful += 1;
        } else {
            chunk.unhelpful += 1;
            src.unhelpful += 1;
        }
    }

    pub fn chunk_feedback(&self, chunk_id: &str) -> Option<ChunkFeedback> {
        self.by_chunk.get(chunk_id).map(|e| *e.value())
    }

    pub fn source_feedback(&self, source: SourceKind) -> SourceFeedback {
        self.by_source
            .get(&source)
            .map(|e| *e.value())
            .unwrap_or_default()
    }
}
