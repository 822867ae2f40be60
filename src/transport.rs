//! Duplex connection to the conversational backend.
//!
//! A [`Link`] is one connection attempt: a command sender and an event
//! receiver wired to a [`NetLink`] task. Reconnecting means dropping the
//! link and asking the [`Connector`] for a new one; the task does not retry
//! on its own.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use url::Url;

use crate::error::{Result, VoiceError};

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Opened,
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetCommand {
    SendText(String),
    Close { code: u16 },
}

pub struct Link {
    tx: mpsc::Sender<NetCommand>,
    rx: mpsc::Receiver<NetEvent>,
}

impl Link {
    pub fn new(tx: mpsc::Sender<NetCommand>, rx: mpsc::Receiver<NetEvent>) -> Self {
        Self { tx, rx }
    }

    /// Queue a text frame without waiting.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.tx.try_send(NetCommand::SendText(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                VoiceError::Transport("outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => VoiceError::Closed,
        })
    }

    /// `None` once the link task has exited.
    pub async fn recv(&mut self) -> Option<NetEvent> {
        self.rx.recv().await
    }

    /// Close with a normal closure code. Closing a dead link is a no-op.
    pub fn close(self) {
        if self
            .tx
            .try_send(NetCommand::Close { code: CLOSE_NORMAL })
            .is_err()
        {
            log::debug!("Link already closed");
        }
    }
}

/// Opens links; the websocket implementation is [`WsConnector`].
pub trait Connector: Send + Sync {
    /// Start connecting. `NetEvent::Opened` arrives on the link once the
    /// transport is up.
    fn connect(&self, url: &str) -> Link;
}

#[derive(Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> Link {
        let (tx_event, rx_event) = mpsc::channel::<NetEvent>(100);
        let (tx_cmd, rx_cmd) = mpsc::channel::<NetCommand>(100);
        let net_link = NetLink::new(url.to_string(), tx_event, rx_cmd);
        tokio::spawn(async move {
            net_link.run().await;
        });
        Link::new(tx_cmd, rx_event)
    }
}

pub struct NetLink {
    url: String,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(url: String, tx: mpsc::Sender<NetEvent>, rx_cmd: mpsc::Receiver<NetCommand>) -> Self {
        Self { url, tx, rx_cmd }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.connect_and_loop().await {
            log::warn!("Connection error: {}", e);
            let _ = self.tx.send(NetEvent::Error(e.to_string())).await;
        }
    }

    // 连接并进入主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let url = Url::parse(&self.url)?;
        log::info!("Connecting to {}://{}...", url.scheme(), url.host_str().unwrap_or(""));
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        log::info!("Connected");

        let (mut write, mut read) = ws_stream.split();
        self.tx.send(NetEvent::Opened).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.tx.send(NetEvent::Text(text.to_string())).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            let (code, reason) = match frame {
                                Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_string()),
                                None => (None, String::new()),
                            };
                            self.tx.send(NetEvent::Closed { code, reason }).await?;
                            return Ok(());
                        }
                        // 二进制帧不在协议内
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            self.tx
                                .send(NetEvent::Closed { code: None, reason: String::new() })
                                .await?;
                            return Ok(());
                        }
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendText(text)) => {
                            write.send(Message::Text(text.into())).await?;
                        }
                        Some(NetCommand::Close { code }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: String::new().into(),
                            };
                            write.send(Message::Close(Some(frame))).await?;
                            return Ok(());
                        }
                        None => {
                            // Link 被丢弃
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_on_dropped_task_reports_closed() {
        let (tx_cmd, rx_cmd) = mpsc::channel(1);
        let (_tx_event, rx_event) = mpsc::channel(1);
        let link = Link::new(tx_cmd, rx_event);
        drop(rx_cmd);
        assert!(matches!(link.send_text("x".into()), Err(VoiceError::Closed)));
        link.close();
    }

    #[tokio::test]
    async fn full_queue_is_a_transport_error() {
        let (tx_cmd, mut rx_cmd) = mpsc::channel(1);
        let (_tx_event, rx_event) = mpsc::channel(1);
        let link = Link::new(tx_cmd, rx_event);
        link.send_text("a".into()).unwrap();
        assert!(matches!(
            link.send_text("b".into()),
            Err(VoiceError::Transport(_))
        ));
        assert_eq!(rx_cmd.recv().await, Some(NetCommand::SendText("a".into())));
    }

    #[tokio::test]
    async fn invalid_url_reports_error_event() {
        let (tx_event, mut rx_event) = mpsc::channel(4);
        let (_tx_cmd, rx_cmd) = mpsc::channel(4);
        NetLink::new("not a url".into(), tx_event, rx_cmd).run().await;
        assert!(matches!(rx_event.recv().await, Some(NetEvent::Error(_))));
    }
}
