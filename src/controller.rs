//! Voice session controller.
//!
//! One [`VoiceController`] owns at most one [`VoiceSession`]: the microphone,
//! the playback context, the link to the backend and all per-turn tracking.
//! Everything is driven from a single `tokio::select!` loop in
//! [`VoiceController::run`]; the handlers it dispatches to are public so the
//! state machine can be driven step by step.

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::audio::pcm::encode_frame;
use crate::audio::{
    AudioChunk, AudioDevices, FingerprintFn, FrameResampler, MIN_AUDIO_PAYLOAD_LEN, Microphone,
    OutputContext, PlaybackQueue, SourceId, VadEvent, VoiceActivityDetector, sampled_fingerprint,
};
use crate::config::{AgentConfig, Config, SessionConfig};
use crate::error::VoiceError;
use crate::history::{ChatMessage, Role, SessionStore};
use crate::protocol::{
    AgentResponseEvent, AgentSettings, AudioEvent, ConversationInitiation, GenerationParams, Pong,
    ServerEvent, UserAudioChunk, UserTranscription,
};
use crate::signaling::{CallType, DealerInfo, Signaling, SignalingRequest};
use crate::state_machine::VoiceState;
use crate::tracking::{EarlyAudioBuffer, SeenAudioIds, TranscriptTracking, TurnAbort};
use crate::transcript::{Speaker, TranscriptSink, UiStatus};
use crate::transport::{Connector, Link, NetEvent};

/// Longest slice of the last user message quoted in a returning greeting
const GREETING_TOPIC_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Shutdown,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    UserStopped,
    /// A new session was requested while this one was active
    Superseded,
    Shutdown,
    MicrophoneUnavailable(String),
    OutputUnavailable(String),
    ReconnectExhausted,
    /// The link closed before a single audio frame was sent
    NoAudioDetected,
    Fatal(String),
}

impl EndReason {
    /// The transcript line shown for a terminal failure.
    pub fn message(&self) -> Option<String> {
        match self {
            EndReason::UserStopped | EndReason::Superseded | EndReason::Shutdown => None,
            EndReason::MicrophoneUnavailable(_) => Some(
                "Microphone access is needed for voice mode. Please allow it and try again."
                    .to_string(),
            ),
            EndReason::OutputUnavailable(_) => {
                Some("Audio playback is not available on this device.".to_string())
            }
            EndReason::ReconnectExhausted => Some(
                "Voice connection lost and could not reconnect. Please try again.".to_string(),
            ),
            EndReason::NoAudioDetected => Some(
                "No audio detected from your microphone. Please check it and try again."
                    .to_string(),
            ),
            EndReason::Fatal(e) => Some(format!("Voice mode stopped: {}", e)),
        }
    }
}

/// External collaborators the controller calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn AudioDevices>,
    pub signaling: Arc<dyn Signaling>,
    pub connector: Arc<dyn Connector>,
    pub sink: Arc<dyn TranscriptSink>,
    pub store: Arc<dyn SessionStore>,
}

struct VoiceSession {
    link: Option<Link>,
    mic: Microphone,
    resampler: Option<FrameResampler>,
    output: Option<Arc<dyn OutputContext>>,
    ended_rx: mpsc::UnboundedReceiver<SourceId>,
    queue: PlaybackQueue,
    abort: TurnAbort,
    seen: SeenAudioIds,
    early: EarlyAudioBuffer,
    tracking: TranscriptTracking,
    vad: VoiceActivityDetector,
    /// Gated until the backend acknowledges initiation
    outbound_enabled: bool,
    frames_sent: u64,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    last_ping: Instant,
    playback_deadline: Option<Instant>,
    history: Vec<ChatMessage>,
    vad_tick: Interval,
    keepalive_tick: Interval,
}

enum Wake {
    Command(Option<ControlCommand>),
    Net(NetEvent),
    Frame(Option<Vec<f32>>),
    SourceEnded(SourceId),
    VadTick,
    KeepaliveTick,
    ReconnectDue,
    PlaybackFallback,
}

pub struct VoiceController {
    config: Config,
    c: Collaborators,
    state: VoiceState,
    session: Option<VoiceSession>,
    fingerprint: FingerprintFn,
    visitor_id: String,
}

impl VoiceController {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config,
            c: collaborators,
            state: VoiceState::Idle,
            session: None,
            fingerprint: sampled_fingerprint,
            visitor_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Replace the fallback id function for audio without `audio_id`.
    pub fn with_fingerprint(mut self, fingerprint: FingerprintFn) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<ControlCommand>) {
        log::info!("Voice controller started. State: {:?}", self.state);
        loop {
            let wake = match self.session.as_mut() {
                None => Wake::Command(commands.recv().await),
                Some(session) => {
                    let VoiceSession {
                        link,
                        mic,
                        ended_rx,
                        vad_tick,
                        keepalive_tick,
                        reconnect_at,
                        playback_deadline,
                        ..
                    } = session;
                    tokio::select! {
                        cmd = commands.recv() => Wake::Command(cmd),
                        event = recv_link(link) => Wake::Net(event),
                        frame = mic.frames.recv() => Wake::Frame(frame),
                        Some(id) = ended_rx.recv() => Wake::SourceEnded(id),
                        _ = vad_tick.tick() => Wake::VadTick,
                        _ = keepalive_tick.tick() => Wake::KeepaliveTick,
                        _ = sleep_until_opt(*reconnect_at) => Wake::ReconnectDue,
                        _ = sleep_until_opt(*playback_deadline) => Wake::PlaybackFallback,
                    }
                }
            };

            match wake {
                Wake::Command(Some(ControlCommand::Start)) => self.start().await,
                Wake::Command(Some(ControlCommand::Stop)) => {
                    self.end(EndReason::UserStopped).await
                }
                Wake::Command(Some(ControlCommand::Shutdown)) | Wake::Command(None) => {
                    self.end(EndReason::Shutdown).await;
                    break;
                }
                Wake::Net(event) => self.handle_net_event(event).await,
                Wake::Frame(Some(frame)) => self.handle_capture_frame(frame),
                Wake::Frame(None) => {
                    self.end(EndReason::MicrophoneUnavailable("capture stopped".into()))
                        .await
                }
                Wake::SourceEnded(id) => self.playback_ended(id).await,
                Wake::VadTick => self.vad_tick().await,
                Wake::KeepaliveTick => self.keepalive_check().await,
                Wake::ReconnectDue => self.reconnect_now().await,
                Wake::PlaybackFallback => self.playback_fallback().await,
            }
        }
        log::info!("Voice controller stopped");
    }

    // ======================== Lifecycle ========================

    /// Acquire audio, then open the link. An active session is torn down first.
    pub async fn start(&mut self) {
        if self.session.is_some() {
            log::info!("Voice session already active, tearing it down first");
            self.end(EndReason::Superseded).await;
        }
        self.c.sink.set_status(UiStatus::Connecting).await;

        let audio = self.config.audio.clone();
        let mic = match self.c.devices.open_microphone(&audio).await {
            Ok(mic) => mic,
            Err(e) => {
                log::error!("Failed to open microphone: {}", e);
                self.finish(EndReason::MicrophoneUnavailable(e.to_string()))
                    .await;
                return;
            }
        };

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let output = match self.c.devices.open_output(&audio, ended_tx) {
            Ok(output) => output,
            Err(e) => {
                log::error!("Failed to open playback context: {}", e);
                drop(mic);
                self.finish(EndReason::OutputUnavailable(e.to_string())).await;
                return;
            }
        };

        let resampler = if mic.sample_rate != audio.target_sample_rate {
            match FrameResampler::new(mic.sample_rate, audio.target_sample_rate, audio.frame_size)
            {
                Ok(r) => Some(r),
                Err(e) => {
                    log::error!("{}", e);
                    output.close();
                    drop(mic);
                    self.finish(EndReason::Fatal(e.to_string())).await;
                    return;
                }
            }
        } else {
            None
        };

        let history = self.c.store.load_history();
        let mut tracking = TranscriptTracking::default();
        // 文字聊天已展示过默认问候语
        tracking.greeting_shown = history.iter().any(|m| {
            m.role == Role::Assistant && m.content == self.config.agent.default_greeting
        });

        let now = Instant::now();
        let tick = Duration::from_millis(self.config.vad.tick_ms);
        let mut vad_tick = interval_at(now + tick, tick);
        vad_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let check = self.config.session.keepalive_check();
        let mut keepalive_tick = interval_at(now + check, check);
        keepalive_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let abort = TurnAbort::default();
        log::info!(
            "Voice session starting: capture {} Hz -> {} Hz, playback {} Hz",
            mic.sample_rate,
            audio.target_sample_rate,
            output.sample_rate()
        );
        self.session = Some(VoiceSession {
            link: None,
            mic,
            resampler,
            output: Some(output),
            ended_rx,
            queue: PlaybackQueue::new(abort.clone()),
            abort,
            seen: SeenAudioIds::default(),
            early: EarlyAudioBuffer::default(),
            tracking,
            vad: VoiceActivityDetector::new(&self.config.vad),
            outbound_enabled: false,
            frames_sent: 0,
            reconnect_attempts: 0,
            reconnect_at: None,
            last_ping: now,
            playback_deadline: None,
            history,
            vad_tick,
            keepalive_tick,
        });
        self.state = VoiceState::Connecting;
        self.open_link().await;
    }

    /// Request a connection descriptor and open a fresh link.
    async fn open_link(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let request = SignalingRequest {
            call_type: CallType::Browser,
            chat_history: session.history.clone(),
            dealer: DealerInfo {
                id: self.config.network.dealer_id.clone(),
                name: self.config.network.dealer_name.clone(),
            },
            visitor_id: self.visitor_id.clone(),
        };

        match self.c.signaling.request_connection(&request).await {
            Ok(descriptor) => {
                let link = self.c.connector.connect(&descriptor.url);
                if let Some(session) = self.session.as_mut() {
                    session.link = Some(link);
                    session.outbound_enabled = false;
                }
            }
            Err(e) if e.is_retryable() => {
                log::warn!("Signaling failed: {}", e);
                self.begin_reconnect().await;
            }
            Err(e) => {
                log::error!("Signaling failed: {}", e);
                self.end(EndReason::Fatal(e.to_string())).await;
            }
        }
    }

    /// Idempotent teardown of the active session.
    pub async fn end(&mut self, reason: EndReason) {
        let Some(mut session) = self.session.take() else {
            log::debug!("No active voice session to end ({:?})", reason);
            return;
        };
        log::info!("Ending voice session: {:?}", reason);
        if let Some(msg) = reason.message() {
            self.c.sink.append_line(Speaker::System, &msg).await;
        }

        session.queue.stop();
        session.mic.stop();
        if let Some(output) = session.output.take() {
            output.close();
        }
        if let Some(link) = session.link.take() {
            link.close();
        }
        session.seen.clear();
        session.early.clear();
        session.tracking.reset();
        session.vad.reset();
        // 定时器随 session 一起释放
        drop(session);

        self.finish_without_message(reason).await;
    }

    /// Terminal path for failures before a session exists.
    async fn finish(&mut self, reason: EndReason) {
        if let Some(msg) = reason.message() {
            self.c.sink.append_line(Speaker::System, &msg).await;
        }
        self.finish_without_message(reason).await;
    }

    async fn finish_without_message(&mut self, reason: EndReason) {
        self.state = VoiceState::Ended;
        self.c.sink.set_status(UiStatus::Idle).await;
        if matches!(reason, EndReason::Superseded | EndReason::Shutdown) {
            return;
        }
        let sink = self.c.sink.clone();
        let delay = self.config.session.restore_input_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.restore_text_input().await;
        });
    }

    // ======================== Transport ========================

    pub async fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Opened => self.on_link_open().await,
            NetEvent::Text(text) => self.handle_server_text(&text).await,
            NetEvent::Closed { code, reason } => {
                log::info!("Link closed: code={:?}, reason={:?}", code, reason);
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.link = None;
                if session.frames_sent == 0 {
                    self.end(EndReason::NoAudioDetected).await;
                } else {
                    self.begin_reconnect().await;
                }
            }
            NetEvent::Error(e) => {
                log::warn!("Link error: {}", e);
                if let Some(session) = self.session.as_mut() {
                    session.link = None;
                }
                self.begin_reconnect().await;
            }
        }
    }

    async fn on_link_open(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(link) = session.link.as_ref() else {
            return;
        };

        let agent = &self.config.agent;
        let mut dynamic_variables = BTreeMap::new();
        dynamic_variables.insert("visitor_id".to_string(), self.visitor_id.clone());
        if let Some(id) = &session.tracking.conversation_id {
            dynamic_variables.insert("previous_conversation_id".to_string(), id.clone());
        }
        let init = ConversationInitiation::new(
            AgentSettings {
                prompt: agent.prompt.clone(),
                language: agent.language.clone(),
                agent_id: agent.agent_id.clone(),
            },
            GenerationParams {
                temperature: agent.temperature,
                max_tokens: agent.max_tokens,
            },
            dynamic_variables,
            first_message(agent, &session.history),
            &session.history,
        );

        let sent = serde_json::to_string(&init)
            .map_err(VoiceError::from)
            .and_then(|json| link.send_text(json));
        session.last_ping = Instant::now();
        match sent {
            Ok(()) => {
                log::info!("Session initiation sent, awaiting acknowledgement");
                self.state = VoiceState::Initiated;
            }
            Err(e) => {
                log::warn!("Failed to send session initiation: {}", e);
                self.begin_reconnect().await;
            }
        }
    }

    async fn handle_server_text(&mut self, text: &str) {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("Ignoring unparseable server message: {}", e);
                return;
            }
        };
        match event {
            ServerEvent::ConversationInitiationMetadata {
                conversation_initiation_metadata_event: meta,
            } => self.on_initiation_ack(meta.conversation_id).await,
            ServerEvent::Audio { audio_event } => self.on_audio(audio_event).await,
            ServerEvent::UserTranscript {
                user_transcription_event,
            } => self.on_user_transcript(user_transcription_event).await,
            ServerEvent::AgentResponse {
                agent_response_event,
            } => self.on_agent_response(agent_response_event).await,
            ServerEvent::Ping { ping_event } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.last_ping = Instant::now();
                if let (Some(event_id), Some(link)) = (ping_event.event_id, session.link.as_ref())
                {
                    if event_id.is_null() {
                        return;
                    }
                    let pong = serde_json::to_string(&Pong::new(event_id))
                        .map_err(VoiceError::from)
                        .and_then(|json| link.send_text(json));
                    if let Err(e) = pong {
                        log::warn!("Failed to send pong: {}", e);
                    }
                }
            }
            ServerEvent::Unknown => log::debug!("Unhandled server message: {}", text),
        }
    }

    async fn on_initiation_ack(&mut self, conversation_id: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        log::info!("Conversation initiated: {}", conversation_id);
        self.c.store.set_conversation_id(&conversation_id);
        session.tracking.conversation_id = Some(conversation_id);
        session.outbound_enabled = true;
        session.reconnect_attempts = 0;
        session.last_ping = Instant::now();

        self.state = if session.vad.is_speaking() {
            VoiceState::UserSpeaking
        } else if session.queue.is_agent_speaking() {
            VoiceState::AgentSpeaking
        } else {
            VoiceState::Listening
        };
        let show_banner = !session.tracking.banner_shown;
        session.tracking.banner_shown = true;

        self.c.sink.set_status(status_for(self.state)).await;
        if show_banner {
            let banner = self.config.agent.voice_banner.clone();
            self.c.sink.append_line(Speaker::System, &banner).await;
        }
    }

    async fn on_audio(&mut self, event: AudioEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if event.audio_base_64.len() < MIN_AUDIO_PAYLOAD_LEN {
            log::debug!(
                "Dropping undersized audio payload ({} chars)",
                event.audio_base_64.len()
            );
            return;
        }
        let id = event
            .audio_id
            .unwrap_or_else(|| (self.fingerprint)(&event.audio_base_64));
        if session.abort.is_set() {
            log::debug!("Dropping audio {} for aborted turn", id);
            return;
        }
        if !session.seen.insert(&id) {
            log::debug!("Dropping duplicate audio {}", id);
            return;
        }

        let chunk = AudioChunk::new(id, event.audio_base_64);
        if session.tracking.current_response.is_none() {
            log::debug!("Buffering early audio {}", chunk.id);
            session.early.push(chunk);
            return;
        }
        session.queue.enqueue(chunk, session.output.clone());
        self.after_enqueue().await;
    }

    async fn on_user_transcript(&mut self, event: UserTranscription) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let id = event
            .transcript_id
            .unwrap_or_else(|| format!("text:{}", event.user_transcript));
        if !session.tracking.accept_transcript(&id) {
            log::debug!("Dropping duplicate transcript {}", id);
            return;
        }
        // 新一轮开始，下一段回复的音频先缓冲
        session.tracking.current_response = None;

        let text = event.user_transcript.trim();
        if text.is_empty() {
            return;
        }
        let message = ChatMessage::user(text);
        session.history.push(message.clone());
        self.c.sink.append_line(Speaker::User, text).await;
        self.c.store.append(message);
    }

    async fn on_agent_response(&mut self, event: AgentResponseEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // A new agent turn supersedes any prior one.
        let early = session.early.take();
        session.queue.stop();
        session.seen.clear();
        session.abort.clear();
        session.playback_deadline = None;
        if self.state == VoiceState::AgentSpeaking {
            self.state = VoiceState::Listening;
        }

        if let Some(id) = &event.response_id {
            if !session.tracking.accept_response(id) {
                log::debug!("Dropping duplicate agent response {}", id);
                return;
            }
        }
        session.tracking.current_response = Some(event.agent_response.clone());

        if self.state == VoiceState::UserSpeaking {
            session.queue.pause();
        }
        if !early.is_empty() {
            log::debug!("Flushing {} early audio chunks", early.len());
        }
        for chunk in early {
            session.seen.insert(&chunk.id);
            session.queue.enqueue(chunk, session.output.clone());
        }

        let text = event.agent_response.trim().to_string();
        let is_greeting = text == self.config.agent.default_greeting;
        let suppress = is_greeting && session.tracking.greeting_shown;
        if is_greeting {
            session.tracking.greeting_shown = true;
        }
        if !text.is_empty() && !suppress {
            let message = ChatMessage::assistant(text.as_str());
            session.history.push(message.clone());
            self.c.sink.append_line(Speaker::Bot, &text).await;
            self.c.store.append(message);
        }
        self.after_enqueue().await;
    }

    /// Refresh the playback fallback and enter AGENT_SPEAKING once audio sounds.
    async fn after_enqueue(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.queue.is_agent_speaking() {
            return;
        }
        session.playback_deadline = Some(Instant::now() + self.config.session.playback_fallback());
        if self.state == VoiceState::Listening {
            self.state = VoiceState::AgentSpeaking;
            self.c.sink.set_status(UiStatus::Speaking).await;
        }
    }

    // ======================== Capture ========================

    /// Stream one capture frame to the backend once outbound audio is enabled.
    pub fn handle_capture_frame(&mut self, frame: Vec<f32>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.outbound_enabled {
            return;
        }
        let Some(link) = session.link.as_ref() else {
            return;
        };

        let samples = match session.resampler.as_mut() {
            Some(resampler) => match resampler.process(&frame) {
                Ok(samples) => samples,
                Err(e) => {
                    log::warn!("Dropping capture frame: {}", e);
                    return;
                }
            },
            None => frame,
        };
        if samples.is_empty() {
            return;
        }

        let chunk = UserAudioChunk {
            user_audio_chunk: encode_frame(&samples),
        };
        let sent = serde_json::to_string(&chunk)
            .map_err(VoiceError::from)
            .and_then(|json| link.send_text(json));
        match sent {
            Ok(()) => session.frames_sent += 1,
            Err(VoiceError::Closed) => log::debug!("Link closed, dropping capture frame"),
            Err(e) => log::warn!("Dropping capture frame: {}", e),
        }
    }

    // ======================== VAD ========================

    /// Sample the input meter once and apply the resulting speech transition.
    ///
    /// Playback is paused and aborted in every session state. While the link
    /// is down or not yet acknowledged the state is left alone;
    /// `on_initiation_ack` picks USER_SPEAKING up from the detector later.
    pub async fn vad_tick(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let level = session.mic.meter.level();
        let Some(event) = session.vad.tick(level, Instant::now()) else {
            return;
        };
        let conversing = self.state.is_conversing();

        match event {
            VadEvent::SpeechStarted => {
                log::info!("User speech detected, pausing agent playback");
                session.queue.pause();
                if conversing {
                    self.state = VoiceState::UserSpeaking;
                    self.c.sink.set_status(UiStatus::UserSpeaking).await;
                } else {
                    log::debug!("Speech started while {:?}", self.state);
                }
            }
            VadEvent::BargeIn => {
                log::info!("Barge-in: aborting agent turn");
                session.abort.set();
                session.queue.stop();
                session.early.clear();
                session.playback_deadline = None;
            }
            VadEvent::SpeechEnded => {
                if session.abort.is_set() {
                    log::debug!("Speech ended after barge-in, playback stays stopped");
                } else {
                    session.queue.resume();
                }
                let speaking = session.queue.is_agent_speaking();
                if speaking {
                    session.playback_deadline =
                        Some(Instant::now() + self.config.session.playback_fallback());
                }
                if self.state != VoiceState::UserSpeaking {
                    return;
                }
                self.state = if speaking {
                    VoiceState::AgentSpeaking
                } else {
                    VoiceState::Listening
                };
                self.c.sink.set_status(status_for(self.state)).await;
            }
        }
    }

    // ======================== Playback ========================

    /// Completion of a playback source.
    pub async fn playback_ended(&mut self, id: SourceId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.queue.on_source_ended(id) {
            log::debug!("Ignoring stale completion {:?}", id);
            return;
        }
        if session.queue.is_agent_speaking() {
            session.playback_deadline = Some(Instant::now() + self.config.session.playback_fallback());
            return;
        }
        session.playback_deadline = None;
        if self.state == VoiceState::AgentSpeaking {
            self.state = VoiceState::Listening;
            self.c.sink.set_status(UiStatus::Listening).await;
        }
    }

    async fn playback_fallback(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.playback_deadline = None;
        if self.state == VoiceState::AgentSpeaking {
            log::warn!("No playback completion received, forcing listening status");
            self.state = VoiceState::Listening;
            self.c.sink.set_status(UiStatus::Listening).await;
        }
    }

    // ======================== Keepalive / reconnect ========================

    /// Reconnect if the server has not pinged within the keepalive timeout.
    pub async fn keepalive_check(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let watching = matches!(self.state, VoiceState::Initiated) || self.state.is_conversing();
        if session.link.is_none() || !watching {
            return;
        }
        let silent = session.last_ping.elapsed();
        if silent <= self.config.session.keepalive_timeout() {
            return;
        }
        log::warn!("No keepalive for {:?}, reconnecting", silent);
        self.begin_reconnect().await;
    }

    async fn begin_reconnect(&mut self) {
        let max_attempts = self.config.session.max_reconnect_attempts;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(link) = session.link.take() {
            link.close();
        }
        session.outbound_enabled = false;

        if session.reconnect_attempts >= max_attempts {
            log::error!(
                "Giving up after {} reconnect attempts",
                session.reconnect_attempts
            );
            self.end(EndReason::ReconnectExhausted).await;
            return;
        }

        let jitter = random_jitter(self.config.session.reconnect_jitter_ms);
        let delay = reconnect_delay(&self.config.session, session.reconnect_attempts, jitter);
        session.reconnect_attempts += 1;
        session.reconnect_at = Some(Instant::now() + delay);
        log::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            session.reconnect_attempts,
            max_attempts
        );
        self.state = VoiceState::Reconnecting;
        self.c.sink.set_status(UiStatus::Reconnecting).await;
    }

    /// Run the scheduled reconnect attempt immediately.
    pub async fn reconnect_now(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.reconnect_at.take().is_none() {
            return;
        }
        self.state = VoiceState::Connecting;
        self.open_link().await;
    }

    // ======================== Inspection ========================

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn queue(&self) -> Option<&PlaybackQueue> {
        self.session.as_ref().map(|s| &s.queue)
    }

    pub fn early_audio_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.early.len())
    }

    pub fn seen_audio_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.seen.len())
    }

    pub fn is_turn_aborted(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.abort.is_set())
    }

    pub fn outbound_enabled(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.outbound_enabled)
    }

    pub fn frames_sent(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.frames_sent)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.reconnect_attempts)
    }

    pub fn reconnect_scheduled(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.reconnect_at.is_some())
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|s| s.tracking.conversation_id.as_deref())
    }
}

/// base + attempt × step + jitter, with jitter capped at the configured maximum.
pub fn reconnect_delay(config: &SessionConfig, attempt: u32, jitter_ms: u64) -> Duration {
    Duration::from_millis(
        config.reconnect_base_ms
            + u64::from(attempt) * config.reconnect_step_ms
            + jitter_ms.min(config.reconnect_jitter_ms),
    )
}

fn random_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_ms)
}

/// Greeting for the initiation message: personalised when the visitor has
/// already asked something in text chat.
fn first_message(agent: &AgentConfig, history: &[ChatMessage]) -> String {
    match history.iter().rev().find(|m| m.role == Role::User) {
        Some(last) => {
            let mut topic: String = last.content.chars().take(GREETING_TOPIC_CHARS).collect();
            if last.content.chars().count() > GREETING_TOPIC_CHARS {
                topic.push_str("...");
            }
            agent.returning_greeting.replace("{topic}", &topic)
        }
        None => agent.default_greeting.clone(),
    }
}

fn status_for(state: VoiceState) -> UiStatus {
    match state {
        VoiceState::Idle | VoiceState::Ended => UiStatus::Idle,
        VoiceState::Connecting | VoiceState::Initiated => UiStatus::Connecting,
        VoiceState::Listening => UiStatus::Listening,
        VoiceState::AgentSpeaking => UiStatus::Speaking,
        VoiceState::UserSpeaking => UiStatus::UserSpeaking,
        VoiceState::Reconnecting => UiStatus::Reconnecting,
    }
}

async fn recv_link(link: &mut Option<Link>) -> NetEvent {
    match link {
        Some(link) => link.recv().await.unwrap_or(NetEvent::Closed {
            code: None,
            reason: "link task ended".to_string(),
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
