//! Energy-threshold voice activity detection driving barge-in.
//!
//! Sampled on a fixed tick. Speech is confirmed after `confirm_ticks`
//! consecutive loud ticks; if it is still going `grace` later the detector
//! reports a barge-in exactly once per burst.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::VadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech confirmed; agent playback should pause
    SpeechStarted,
    /// Speech outlasted the grace window; the agent turn should be aborted
    BargeIn,
    /// Energy dropped back below the threshold
    SpeechEnded,
}

#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    threshold: f32,
    confirm_ticks: u32,
    grace: Duration,
    loud_ticks: u32,
    speech_started: Option<Instant>,
    barged_in: bool,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            confirm_ticks: config.confirm_ticks.max(1),
            grace: Duration::from_millis(config.barge_in_grace_ms),
            loud_ticks: 0,
            speech_started: None,
            barged_in: false,
        }
    }

    pub fn tick(&mut self, level: f32, now: Instant) -> Option<VadEvent> {
        if level <= self.threshold {
            self.loud_ticks = 0;
            return match self.speech_started.take() {
                Some(_) => {
                    self.barged_in = false;
                    Some(VadEvent::SpeechEnded)
                }
                None => None,
            };
        }

        self.loud_ticks = self.loud_ticks.saturating_add(1);
        match self.speech_started {
            None if self.loud_ticks >= self.confirm_ticks => {
                self.speech_started = Some(now);
                Some(VadEvent::SpeechStarted)
            }
            Some(started) if !self.barged_in && now.duration_since(started) >= self.grace => {
                self.barged_in = true;
                Some(VadEvent::BargeIn)
            }
            _ => None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speech_started.is_some()
    }

    pub fn reset(&mut self) {
        self.loud_ticks = 0;
        self.speech_started = None;
        self.barged_in = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(50);

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(&VadConfig::default())
    }

    #[test]
    fn single_loud_tick_is_not_speech() {
        let mut vad = detector();
        let t0 = Instant::now();
        assert_eq!(vad.tick(0.5, t0), None);
        assert_eq!(vad.tick(0.0, t0 + TICK), None);
        assert!(!vad.is_speaking());
    }

    #[test]
    fn two_consecutive_loud_ticks_start_speech() {
        let mut vad = detector();
        let t0 = Instant::now();
        assert_eq!(vad.tick(0.5, t0), None);
        assert_eq!(vad.tick(0.5, t0 + TICK), Some(VadEvent::SpeechStarted));
        assert!(vad.is_speaking());
    }

    #[test]
    fn barge_in_fires_once_after_grace() {
        let mut vad = detector();
        let t0 = Instant::now();
        let mut events = Vec::new();
        for i in 0..20 {
            if let Some(ev) = vad.tick(0.5, t0 + TICK * i) {
                events.push((i, ev));
            }
        }
        // confirmed on tick 1, grace of 400ms elapses at tick 9
        assert_eq!(
            events,
            vec![(1, VadEvent::SpeechStarted), (9, VadEvent::BargeIn)]
        );
        assert_eq!(vad.tick(0.0, t0 + TICK * 20), Some(VadEvent::SpeechEnded));
    }

    #[test]
    fn short_burst_ends_without_barge_in() {
        let mut vad = detector();
        let t0 = Instant::now();
        vad.tick(0.5, t0);
        vad.tick(0.5, t0 + TICK);
        assert_eq!(vad.tick(0.5, t0 + TICK * 2), None);
        assert_eq!(vad.tick(0.01, t0 + TICK * 3), Some(VadEvent::SpeechEnded));
        assert_eq!(vad.tick(0.01, t0 + TICK * 4), None);
    }

    #[test]
    fn quiet_tick_resets_confirmation() {
        let mut vad = detector();
        let t0 = Instant::now();
        vad.tick(0.5, t0);
        vad.tick(0.0, t0 + TICK);
        assert_eq!(vad.tick(0.5, t0 + TICK * 2), None);
        assert_eq!(vad.tick(0.5, t0 + TICK * 3), Some(VadEvent::SpeechStarted));
    }
}
