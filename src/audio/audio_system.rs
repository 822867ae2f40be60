//! ALSA implementation of the session's two audio contexts.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with the async session loop.
//!
//! - Capture thread: ALSA S16 interleaved -> mono f32 -> meter + fixed frames -> `frames`
//! - Playback thread: commands -> one source at a time, written period by period so a
//!   stop lands within one period

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

use super::device::{AudioDevices, Microphone, MicrophoneTracks, release_thread};
use super::meter::InputMeter;
use super::output::{ContextState, OutputContext, SourceId};
use super::pcm::f32_to_i16;
use crate::config::AudioConfig;
use crate::error::{Result, VoiceError};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
struct AlsaParams {
    sample_rate: u32,
    channels: u32,
    /// Period size in frames
    period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
) -> std::result::Result<(PCM, AlsaParams), alsa::Error> {
    let pcm = PCM::new(device, direction, false)?;
    {
        let hwp = HwParams::any(&pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }
    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };
    log::info!(
        "ALSA {:?}: device={}, rate={}, channels={}, period_size={}",
        direction,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );
    Ok((pcm, params))
}

/// Opens ALSA devices named in [`AudioConfig`].
#[derive(Debug, Default)]
pub struct AlsaDevices;

impl AlsaDevices {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioDevices for AlsaDevices {
    async fn open_microphone(&self, config: &AudioConfig) -> Result<Microphone> {
        let running = Arc::new(AtomicBool::new(true));
        let meter = InputMeter::new();
        let (frames_tx, frames_rx) = mpsc::channel::<Vec<f32>>(32);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();

        let handle = {
            let running = running.clone();
            let meter = meter.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("voice-capture".into())
                .spawn(move || capture_thread(&config, frames_tx, meter, &running, ready_tx))?
        };

        let sample_rate = ready_rx
            .await
            .map_err(|_| VoiceError::Microphone("capture thread exited".into()))??;

        Ok(Microphone::new(
            frames_rx,
            sample_rate,
            meter,
            Box::new(CaptureTracks {
                running,
                handle: Some(handle),
            }),
        ))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Arc<dyn OutputContext>> {
        let (pcm, params) = open_pcm(
            &config.playback_device,
            Direction::Playback,
            config.playback_sample_rate,
            1,
        )
        .map_err(|e| {
            VoiceError::OutputDevice(format!("'{}': {}", config.playback_device, e))
        })?;
        if params.sample_rate != config.playback_sample_rate {
            log::warn!(
                "Playback device negotiated {} Hz instead of {} Hz",
                params.sample_rate,
                config.playback_sample_rate
            );
        }

        let state = Arc::new(Mutex::new(ContextState::Running));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<OutputCommand>();
        {
            let state = state.clone();
            thread::Builder::new()
                .name("voice-playback".into())
                .spawn(move || {
                    if let Err(e) = playback_thread(pcm, params, cmd_rx, ended) {
                        log::error!("Playback thread error: {}", e);
                    }
                    *state.lock().unwrap_or_else(|p| p.into_inner()) = ContextState::Closed;
                })?;
        }

        Ok(Arc::new(AlsaOutput {
            cmd_tx,
            state,
            sample_rate: config.playback_sample_rate,
        }))
    }
}

// ======================== Capture ========================

struct CaptureTracks {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MicrophoneTracks for CaptureTracks {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            // 线程在下一个 period 结束时退出
            release_thread("voice-capture", h);
        }
    }
}

fn capture_thread(
    config: &AudioConfig,
    frames_tx: mpsc::Sender<Vec<f32>>,
    meter: InputMeter,
    running: &AtomicBool,
    ready: oneshot::Sender<Result<u32>>,
) {
    let (pcm, params) = match open_pcm(
        &config.capture_device,
        Direction::Capture,
        config.capture_sample_rate,
        config.capture_channels,
    ) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(VoiceError::Microphone(format!(
                "'{}': {}",
                config.capture_device, e
            ))));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(VoiceError::Microphone(e.to_string())));
            return;
        }
    };
    if ready.send(Ok(params.sample_rate)).is_err() {
        return;
    }

    let channels = params.channels.max(1) as usize;
    let mut read_buf = vec![0i16; params.period_size * channels];
    let mut mono = Vec::with_capacity(params.period_size);
    let mut frame = Vec::with_capacity(config.frame_size * 2);

    log::info!(
        "Capture started: rate={}, ch={}, frame={}",
        params.sample_rate,
        channels,
        config.frame_size
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                // Downmix interleaved -> mono
                mono.clear();
                for i in 0..frames {
                    let sum: i32 = read_buf[i * channels..(i + 1) * channels]
                        .iter()
                        .map(|&s| i32::from(s))
                        .sum();
                    mono.push(sum as f32 / channels as f32 / 32768.0);
                }
                meter.observe(&mono);
                frame.extend_from_slice(&mono);

                while frame.len() >= config.frame_size {
                    let chunk: Vec<f32> = frame.drain(..config.frame_size).collect();
                    if frames_tx.blocking_send(chunk).is_err() {
                        log::debug!("Capture receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
}

// ======================== Playback ========================

enum OutputCommand {
    Start(SourceId, Vec<f32>),
    Stop(SourceId),
    Suspend,
    Resume,
    Close,
}

struct AlsaOutput {
    cmd_tx: mpsc::UnboundedSender<OutputCommand>,
    state: Arc<Mutex<ContextState>>,
    sample_rate: u32,
}

impl AlsaOutput {
    fn set_state(&self, next: ContextState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state != ContextState::Closed {
            *state = next;
        }
    }

    fn send(&self, cmd: OutputCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            log::debug!("Playback thread already gone");
        }
    }
}

impl OutputContext for AlsaOutput {
    fn state(&self) -> ContextState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, id: SourceId, samples: Vec<f32>) -> Result<()> {
        if self.state() == ContextState::Closed {
            return Err(VoiceError::OutputDevice("playback context closed".into()));
        }
        self.cmd_tx
            .send(OutputCommand::Start(id, samples))
            .map_err(|_| VoiceError::OutputDevice("playback thread gone".into()))
    }

    fn stop(&self, id: SourceId) {
        self.send(OutputCommand::Stop(id));
    }

    fn suspend(&self) {
        self.set_state(ContextState::Suspended);
        self.send(OutputCommand::Suspend);
    }

    fn resume(&self) {
        self.set_state(ContextState::Running);
        self.send(OutputCommand::Resume);
    }

    fn close(&self) {
        if self.state() == ContextState::Closed {
            return;
        }
        self.set_state(ContextState::Closed);
        self.send(OutputCommand::Close);
    }
}

struct Source {
    id: SourceId,
    samples: Vec<i16>,
    pos: usize,
}

fn playback_thread(
    pcm: PCM,
    params: AlsaParams,
    mut cmd_rx: mpsc::UnboundedReceiver<OutputCommand>,
    ended: mpsc::UnboundedSender<SourceId>,
) -> std::result::Result<(), alsa::Error> {
    let io = pcm.io_i16()?;
    let channels = params.channels.max(1) as usize;
    let period = params.period_size.max(1);
    let mut current: Option<Source> = None;
    let mut suspended = false;

    log::info!("Playback started: rate={}, ch={}", params.sample_rate, channels);

    loop {
        // 空闲时阻塞等待命令，播放中只轮询
        let cmd = if current.is_some() && !suspended {
            match cmd_rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(mpsc::error::TryRecvError::Empty) => None,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        } else {
            match cmd_rx.blocking_recv() {
                Some(cmd) => Some(cmd),
                None => break,
            }
        };

        if let Some(cmd) = cmd {
            match cmd {
                OutputCommand::Start(id, samples) => {
                    let mut interleaved = Vec::with_capacity(samples.len() * channels);
                    for s in samples {
                        let v = f32_to_i16(s);
                        interleaved.extend(std::iter::repeat_n(v, channels));
                    }
                    current = Some(Source {
                        id,
                        samples: interleaved,
                        pos: 0,
                    });
                }
                OutputCommand::Stop(id) => {
                    if current.as_ref().is_some_and(|s| s.id == id) {
                        current = None;
                        // 丢弃已写入硬件缓冲区的数据，实现立即静音
                        let _ = pcm.drop();
                        let _ = pcm.prepare();
                    }
                }
                OutputCommand::Suspend => {
                    suspended = true;
                    let _ = pcm.pause(true);
                }
                OutputCommand::Resume => {
                    if suspended {
                        suspended = false;
                        let _ = pcm.pause(false);
                    }
                }
                OutputCommand::Close => break,
            }
            continue;
        }

        let Some(source) = current.as_mut() else {
            continue;
        };
        let end = (source.pos + period * channels).min(source.samples.len());
        match io.writei(&source.samples[source.pos..end]) {
            Ok(n) => source.pos += n * channels,
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                pcm.prepare()?;
            }
        }
        if source.pos >= source.samples.len() {
            let id = source.id;
            current = None;
            let _ = ended.send(id);
        }
    }

    let _ = pcm.drain();
    log::info!("Playback stopped");
    Ok(())
}
