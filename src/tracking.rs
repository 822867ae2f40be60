//! Per-session idempotency and turn bookkeeping.
//!
//! Everything here lives inside one `VoiceSession` and is reset at session
//! boundaries; nothing is process-global.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::AudioChunk;

/// "Discard audio for the in-flight agent turn": set on barge-in, cleared by the
/// next agent response. Shared with the playback queue, which checks it before
/// starting each chunk.
#[derive(Debug, Clone, Default)]
pub struct TurnAbort(Arc<AtomicBool>);

impl TurnAbort {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ids of chunks already enqueued or buffered.
#[derive(Debug, Default)]
pub struct SeenAudioIds {
    ids: HashSet<String>,
}

impl SeenAudioIds {
    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Agent audio that arrived before the turn's response text.
#[derive(Debug, Default)]
pub struct EarlyAudioBuffer {
    chunks: Vec<AudioChunk>,
}

impl EarlyAudioBuffer {
    pub fn push(&mut self, chunk: AudioChunk) {
        self.chunks.push(chunk);
    }

    /// Drain in arrival order.
    pub fn take(&mut self) -> Vec<AudioChunk> {
        std::mem::take(&mut self.chunks)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TranscriptTracking {
    pub last_transcript_id: Option<String>,
    pub last_response_id: Option<String>,
    pub processed_responses: HashSet<String>,
    /// Response text of the turn currently allowed to play; `None` means
    /// audio is held in the early buffer.
    pub current_response: Option<String>,
    pub conversation_id: Option<String>,
    pub banner_shown: bool,
    pub greeting_shown: bool,
}

impl TranscriptTracking {
    /// Record a user transcript. Returns false for a repeat of the last id.
    pub fn accept_transcript(&mut self, id: &str) -> bool {
        if self.last_transcript_id.as_deref() == Some(id) {
            return false;
        }
        self.last_transcript_id = Some(id.to_string());
        true
    }

    /// Record an agent response id. Returns false if it was already processed.
    pub fn accept_response(&mut self, id: &str) -> bool {
        if !self.processed_responses.insert(id.to_string()) {
            return false;
        }
        self.last_response_id = Some(id.to_string());
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
