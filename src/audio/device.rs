use async_trait::async_trait;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use super::meter::InputMeter;
use super::output::{OutputContext, SourceId};
use crate::config::AudioConfig;
use crate::error::Result;

/// Releases the hardware behind a microphone stream.
pub trait MicrophoneTracks: Send + Sync {
    fn stop(&mut self);
}

/// An open microphone: the capture/analysis half of a voice session.
pub struct Microphone {
    /// Fixed-size mono frames at `sample_rate`
    pub frames: mpsc::Receiver<Vec<f32>>,
    pub sample_rate: u32,
    /// Energy of the most recent input, read by the VAD tick
    pub meter: InputMeter,
    tracks: Box<dyn MicrophoneTracks>,
    stopped: bool,
}

impl Microphone {
    pub fn new(
        frames: mpsc::Receiver<Vec<f32>>,
        sample_rate: u32,
        meter: InputMeter,
        tracks: Box<dyn MicrophoneTracks>,
    ) -> Self {
        Self {
            frames,
            sample_rate,
            meter,
            tracks,
            stopped: false,
        }
    }

    /// Stop the tracks. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.frames.close();
        self.tracks.stop();
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Platform audio: opens the two contexts a session owns.
#[async_trait]
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone. Permission or device failures are `VoiceError::Microphone`.
    async fn open_microphone(&self, config: &AudioConfig) -> Result<Microphone>;

    /// Open a dedicated playback context; completions are sent on `ended`.
    fn open_output(
        &self,
        config: &AudioConfig,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Arc<dyn OutputContext>>;
}

/// Join a device thread without stalling the async runtime.
///
/// Inside a runtime the join moves to the blocking pool and the returned task
/// can be awaited; outside one it happens inline.
#[cfg_attr(not(feature = "alsa-backend"), allow(dead_code))]
pub(crate) fn release_thread(
    name: &'static str,
    handle: JoinHandle<()>,
) -> Option<tokio::task::JoinHandle<()>> {
    let join = move || {
        if handle.join().is_err() {
            log::warn!("{} thread panicked", name);
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => Some(rt.spawn_blocking(join)),
        Err(_) => {
            join();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[tokio::test(flavor = "current_thread")]
    async fn release_does_not_wait_for_the_thread() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let _ = release_rx.recv();
        });

        // the thread is still blocked here; an inline join would hang the test
        let task = release_thread("test", handle).unwrap();
        assert!(!task.is_finished());

        release_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn release_outside_runtime_joins_inline() {
        let handle = std::thread::spawn(|| {});
        assert!(release_thread("test", handle).is_none());
    }
}
