#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use chatwidget_voice::audio::{
    AudioDevices, ContextState, InputMeter, Microphone, MicrophoneTracks, OutputContext, SourceId,
};
use chatwidget_voice::config::{AudioConfig, Config};
use chatwidget_voice::controller::{Collaborators, VoiceController};
use chatwidget_voice::error::{Result, VoiceError};
use chatwidget_voice::history::{ChatMessage, SessionStore};
use chatwidget_voice::signaling::{ConnectionDescriptor, Signaling, SignalingRequest};
use chatwidget_voice::transcript::{Speaker, TranscriptSink, UiStatus};
use chatwidget_voice::transport::{Connector, Link, NetCommand, NetEvent};

// ======================== Audio ========================

#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Start(SourceId, usize),
    Stop(SourceId),
    Suspend,
    Resume,
    Close,
}

pub struct FakeOutput {
    state: Mutex<ContextState>,
    calls: Mutex<Vec<OutputCall>>,
    _ended: mpsc::UnboundedSender<SourceId>,
}

impl FakeOutput {
    pub fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().unwrap().clone()
    }

    /// (source, sample count) of every started source, in order.
    pub fn started(&self) -> Vec<(SourceId, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OutputCall::Start(id, n) => Some((id, n)),
                _ => None,
            })
            .collect()
    }

    pub fn last_started(&self) -> Option<SourceId> {
        self.started().last().map(|(id, _)| *id)
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock().unwrap() == ContextState::Closed
    }
}

impl OutputContext for FakeOutput {
    fn state(&self) -> ContextState {
        *self.state.lock().unwrap()
    }
    fn sample_rate(&self) -> u32 {
        16_000
    }
    fn start(&self, id: SourceId, samples: Vec<f32>) -> Result<()> {
        if self.state() == ContextState::Closed {
            return Err(VoiceError::OutputDevice("closed".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(OutputCall::Start(id, samples.len()));
        Ok(())
    }
    fn stop(&self, id: SourceId) {
        self.calls.lock().unwrap().push(OutputCall::Stop(id));
    }
    fn suspend(&self) {
        *self.state.lock().unwrap() = ContextState::Suspended;
        self.calls.lock().unwrap().push(OutputCall::Suspend);
    }
    fn resume(&self) {
        *self.state.lock().unwrap() = ContextState::Running;
        self.calls.lock().unwrap().push(OutputCall::Resume);
    }
    fn close(&self) {
        *self.state.lock().unwrap() = ContextState::Closed;
        self.calls.lock().unwrap().push(OutputCall::Close);
    }
}

struct FakeTracks {
    stopped: Arc<AtomicBool>,
}

impl MicrophoneTracks for FakeTracks {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeDevices {
    pub sample_rate: u32,
    pub deny_microphone: bool,
    pub meter: InputMeter,
    pub tracks_stopped: Arc<AtomicBool>,
    frames: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    output: Mutex<Option<Arc<FakeOutput>>>,
}

impl FakeDevices {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            deny_microphone: false,
            meter: InputMeter::new(),
            tracks_stopped: Arc::new(AtomicBool::new(false)),
            frames: Mutex::new(None),
            output: Mutex::new(None),
        }
    }

    pub fn output(&self) -> Arc<FakeOutput> {
        self.output.lock().unwrap().clone().expect("output not opened")
    }

    pub fn frames(&self) -> Option<mpsc::Sender<Vec<f32>>> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn open_microphone(&self, _config: &AudioConfig) -> Result<Microphone> {
        if self.deny_microphone {
            return Err(VoiceError::Microphone("permission denied".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        *self.frames.lock().unwrap() = Some(tx);
        self.tracks_stopped.store(false, Ordering::SeqCst);
        Ok(Microphone::new(
            rx,
            self.sample_rate,
            self.meter.clone(),
            Box::new(FakeTracks {
                stopped: self.tracks_stopped.clone(),
            }),
        ))
    }

    fn open_output(
        &self,
        _config: &AudioConfig,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Arc<dyn OutputContext>> {
        let output = Arc::new(FakeOutput {
            state: Mutex::new(ContextState::Running),
            calls: Mutex::new(Vec::new()),
            _ended: ended,
        });
        *self.output.lock().unwrap() = Some(output.clone());
        Ok(output)
    }
}

// ======================== Network ========================

#[derive(Default)]
pub struct FakeSignaling {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn request_connection(&self, _request: &SignalingRequest) -> Result<ConnectionDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::Signaling("HTTP Error: 503".into()));
        }
        Ok(ConnectionDescriptor {
            url: "wss://voice.test/session".into(),
        })
    }
}

/// The far side of one link handed out by [`FakeConnector`].
pub struct RemoteEnd {
    pub events: mpsc::Sender<NetEvent>,
    pub commands: mpsc::Receiver<NetCommand>,
}

impl RemoteEnd {
    /// Outbound text frames sent so far, parsed as JSON.
    pub fn sent_json(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            if let NetCommand::SendText(text) = cmd {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    pub fn drain(&mut self) -> Vec<NetCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }
}

/// Hands out in-memory links; each one starts with `NetEvent::Opened` queued.
#[derive(Default)]
pub struct FakeConnector {
    remotes: Mutex<Vec<RemoteEnd>>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Take the far side of the most recent link.
    pub fn take_remote(&self) -> Option<RemoteEnd> {
        self.remotes.lock().unwrap().pop()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _url: &str) -> Link {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx_event, rx_event) = mpsc::channel(100);
        let (tx_cmd, rx_cmd) = mpsc::channel(100);
        tx_event.try_send(NetEvent::Opened).unwrap();
        self.remotes.lock().unwrap().push(RemoteEnd {
            events: tx_event,
            commands: rx_cmd,
        });
        Link::new(tx_cmd, rx_event)
    }
}

// ======================== UI / store ========================

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(Speaker, String)>>,
    statuses: Mutex<Vec<UiStatus>>,
    pub restored: AtomicUsize,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<(Speaker, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn lines_by(&self, speaker: Speaker) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == speaker)
            .map(|(_, t)| t)
            .collect()
    }

    pub fn statuses(&self) -> Vec<UiStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn append_line(&self, speaker: Speaker, text: &str) {
        self.lines.lock().unwrap().push((speaker, text.to_string()));
    }
    async fn set_status(&self, status: UiStatus) {
        self.statuses.lock().unwrap().push(status);
    }
    async fn restore_text_input(&self) {
        self.restored.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub messages: Mutex<Vec<ChatMessage>>,
    pub conversation_id: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn with_history(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            conversation_id: Mutex::new(None),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load_history(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }
    fn append(&self, message: ChatMessage) {
        self.messages.lock().unwrap().push(message);
    }
    fn set_conversation_id(&self, conversation_id: &str) {
        *self.conversation_id.lock().unwrap() = Some(conversation_id.to_string());
    }
}

// ======================== Harness ========================

pub struct Harness {
    pub controller: VoiceController,
    pub devices: Arc<FakeDevices>,
    pub signaling: Arc<FakeSignaling>,
    pub connector: Arc<FakeConnector>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryStore>,
}

pub fn harness_with(devices: FakeDevices, store: MemoryStore) -> Harness {
    let devices = Arc::new(devices);
    let signaling = Arc::new(FakeSignaling::default());
    let connector = Arc::new(FakeConnector::default());
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(store);
    let controller = VoiceController::new(
        Config::default(),
        Collaborators {
            devices: devices.clone(),
            signaling: signaling.clone(),
            connector: connector.clone(),
            sink: sink.clone(),
            store: store.clone(),
        },
    );
    Harness {
        controller,
        devices,
        signaling,
        connector,
        sink,
        store,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeDevices::new(16_000), MemoryStore::default())
}

/// base64 PCM16 of `samples` zero samples; the sample count tells chunks apart.
pub fn audio_payload(samples: usize) -> String {
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}

pub fn ack(conversation_id: &str) -> NetEvent {
    NetEvent::Text(
        serde_json::json!({
            "type": "conversation_initiation_metadata",
            "conversation_initiation_metadata_event": {"conversation_id": conversation_id}
        })
        .to_string(),
    )
}

pub fn agent_response(id: &str, text: &str) -> NetEvent {
    NetEvent::Text(
        serde_json::json!({
            "type": "agent_response",
            "agent_response_event": {"agent_response": text, "response_id": id}
        })
        .to_string(),
    )
}

pub fn audio(id: Option<&str>, samples: usize) -> NetEvent {
    let mut event = serde_json::json!({"audio_base_64": audio_payload(samples)});
    if let Some(id) = id {
        event["audio_id"] = Value::from(id);
    }
    NetEvent::Text(serde_json::json!({"type": "audio", "audio_event": event}).to_string())
}

pub fn user_transcript(id: &str, text: &str) -> NetEvent {
    NetEvent::Text(
        serde_json::json!({
            "type": "user_transcript",
            "user_transcription_event": {"user_transcript": text, "transcript_id": id}
        })
        .to_string(),
    )
}

pub fn ping(event_id: i64) -> NetEvent {
    NetEvent::Text(
        serde_json::json!({"type": "ping", "ping_event": {"event_id": event_id, "ping_ms": 20}})
            .to_string(),
    )
}

impl Harness {
    /// Start, open the link and acknowledge the session as `c1`.
    pub async fn start_conversing(&mut self) {
        self.controller.start().await;
        self.controller.handle_net_event(NetEvent::Opened).await;
        self.controller.handle_net_event(ack("c1")).await;
    }
}
