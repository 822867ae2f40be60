use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::UiConfig;
use crate::transcript::{Speaker, TranscriptSink, UiStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    StartVoice,
    StopVoice,
}

#[derive(Deserialize)]
struct UiCommand {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    action: Option<String>,
}

/// Parse one datagram from the widget UI. Unknown commands yield `None`.
pub fn parse_ui_command(msg: &str) -> Option<UiEvent> {
    let cmd: UiCommand = serde_json::from_str(msg).ok()?;
    if cmd.msg_type != "voice" {
        return None;
    }
    match cmd.action.as_deref() {
        Some("start") => Some(UiEvent::StartVoice),
        Some("stop") => Some(UiEvent::StopVoice),
        _ => None,
    }
}

pub struct UiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<UiEvent>,
}

// 组件 UI 进程和语音核心通过本地 UDP 通信，地址在配置中指定
impl UiBridge {
    pub async fn new(config: &UiConfig, tx: mpsc::Sender<UiEvent>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(&config.local_addr).await?;
        log::info!("UI bridge listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            target_addr: config.remote_addr.clone(),
            buffer_size: config.buffer_size,
            tx,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            match parse_ui_command(msg) {
                Some(event) => {
                    if self.tx.send(event).await.is_err() {
                        log::debug!("UI event receiver dropped");
                        break;
                    }
                }
                None => log::debug!("Ignoring UI message: {}", msg),
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket.send_to(msg.as_bytes(), &self.target_addr).await?;
        Ok(())
    }

    async fn send_or_log(&self, msg: String) {
        if let Err(e) = self.send_message(&msg).await {
            log::warn!("Failed to send to UI: {}", e);
        }
    }
}

#[async_trait]
impl TranscriptSink for UiBridge {
    async fn append_line(&self, speaker: Speaker, text: &str) {
        let role = match speaker {
            Speaker::User => "user",
            Speaker::Bot => "bot",
            Speaker::System => "system",
        };
        self.send_or_log(json!({"type": "transcript", "role": role, "text": text}).to_string())
            .await;
    }

    async fn set_status(&self, status: UiStatus) {
        self.send_or_log(json!({"type": "status", "state": status.as_str()}).to_string())
            .await;
    }

    async fn restore_text_input(&self) {
        self.send_or_log(json!({"type": "input", "mode": "text"}).to_string())
            .await;
    }
}
