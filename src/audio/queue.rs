//! Serialized, gap-free playback of agent audio chunks.
//!
//! The queue owns pending chunks and at most one sounding source. It is driven
//! by three things: `enqueue`, completion notifications from the output
//! context (`on_source_ended`), and the barge-in controls `pause`/`resume`/`stop`.
//!
//! Pausing stops the sounding source and puts its chunk back at the head of the
//! queue, so a resume replays that chunk from the start rather than seeking.

use std::collections::VecDeque;
use std::sync::Arc;

use super::output::{ContextState, OutputContext, SourceId};
use super::pcm::{self, AudioChunk};
use crate::tracking::TurnAbort;

struct ActiveSource {
    id: SourceId,
    chunk: AudioChunk,
}

pub struct PlaybackQueue {
    pending: VecDeque<AudioChunk>,
    current: Option<ActiveSource>,
    output: Option<Arc<dyn OutputContext>>,
    abort: TurnAbort,
    next_source: u64,
    playing: bool,
    paused: bool,
    agent_speaking: bool,
}

impl PlaybackQueue {
    pub fn new(abort: TurnAbort) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            output: None,
            abort,
            next_source: 0,
            playing: false,
            paused: false,
            agent_speaking: false,
        }
    }

    /// Append a chunk and start playback if nothing is sounding.
    pub fn enqueue(&mut self, chunk: AudioChunk, output: Option<Arc<dyn OutputContext>>) {
        let Some(output) = output else {
            log::warn!("No output context, dropping audio chunk {}", chunk.id);
            return;
        };
        self.output = Some(output);
        self.pending.push_back(chunk);
        if !self.playing && !self.paused {
            self.play_next();
        }
    }

    /// Advance to the next chunk. Undecodable chunks are skipped.
    fn play_next(&mut self) {
        loop {
            if self.paused {
                return;
            }
            if self.abort.is_set() {
                log::debug!("Agent turn aborted, discarding queued audio");
                self.stop();
                return;
            }
            let Some(chunk) = self.pending.pop_front() else {
                self.playing = false;
                self.agent_speaking = false;
                return;
            };
            let Some(output) = self.output.clone() else {
                log::warn!("Output context released, dropping {} queued chunks", self.pending.len() + 1);
                self.pending.clear();
                self.playing = false;
                self.agent_speaking = false;
                return;
            };

            if let Some(previous) = self.current.take() {
                output.stop(previous.id);
            }

            let samples = match pcm::decode_chunk(&chunk.payload) {
                Ok(samples) => samples,
                Err(e) => {
                    log::warn!("Skipping audio chunk {}: {}", chunk.id, e);
                    continue;
                }
            };

            match output.state() {
                ContextState::Closed => {
                    log::warn!("Skipping audio chunk {}: output context closed", chunk.id);
                    continue;
                }
                ContextState::Suspended => output.resume(),
                ContextState::Running => {}
            }

            let id = SourceId(self.next_source);
            self.next_source += 1;
            match output.start(id, samples) {
                Ok(()) => {
                    self.current = Some(ActiveSource { id, chunk });
                    self.playing = true;
                    self.agent_speaking = true;
                    return;
                }
                Err(e) => {
                    log::warn!("Failed to start audio chunk {}: {}", chunk.id, e);
                }
            }
        }
    }

    /// Completion callback from the output context. Returns false for stale ids.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        match &self.current {
            Some(active) if active.id == id => {
                self.current = None;
                self.playing = false;
                self.play_next();
                true
            }
            _ => false,
        }
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        if let Some(active) = self.current.take() {
            if let Some(output) = &self.output {
                output.stop(active.id);
            }
            // 从头重播被打断的片段
            self.pending.push_front(active.chunk);
        }
        self.playing = false;
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if !self.playing {
            self.play_next();
        }
    }

    /// Hard reset: silence, drop everything, release the output context.
    pub fn stop(&mut self) {
        if let Some(active) = self.current.take() {
            if let Some(output) = &self.output {
                output.stop(active.id);
            }
        }
        self.pending.clear();
        self.playing = false;
        self.paused = false;
        self.agent_speaking = false;
        if let Some(output) = self.output.take() {
            if output.state() == ContextState::Running {
                output.suspend();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    /// Chunks waiting behind the sounding one.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn current_chunk_id(&self) -> Option<&str> {
        self.current.as_ref().map(|a| a.chunk.id.as_str())
    }
}
