//! audio - Playback queue, capture plumbing, and the signal math behind barge-in
//!
//! The session controller talks to hardware only through [`AudioDevices`] and
//! [`OutputContext`]; the ALSA implementation lives in `audio_system` behind the
//! `alsa-backend` feature.

#[cfg(feature = "alsa-backend")]
mod audio_system;
mod device;
pub mod fingerprint;
mod meter;
mod output;
pub mod pcm;
mod queue;
mod resample;
mod vad;

#[cfg(feature = "alsa-backend")]
pub use audio_system::AlsaDevices;
pub use device::{AudioDevices, Microphone, MicrophoneTracks};
pub use fingerprint::{FingerprintFn, sampled_fingerprint};
pub use meter::{InputMeter, rms};
pub use output::{ContextState, OutputContext, SourceId};
pub use pcm::{AudioChunk, MIN_AUDIO_PAYLOAD_LEN};
pub use queue::PlaybackQueue;
pub use resample::FrameResampler;
pub use vad::{VadEvent, VoiceActivityDetector};
