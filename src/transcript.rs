//! The transcript display the voice core writes into.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Bot,
    /// Notices from the widget itself (banner, failure reasons)
    System,
}

/// Status indicator shown next to the voice button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiStatus {
    Connecting,
    Listening,
    Speaking,
    UserSpeaking,
    Reconnecting,
    Idle,
}

impl UiStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UiStatus::Connecting => "connecting",
            UiStatus::Listening => "listening",
            UiStatus::Speaking => "speaking",
            UiStatus::UserSpeaking => "user_speaking",
            UiStatus::Reconnecting => "reconnecting",
            UiStatus::Idle => "idle",
        }
    }
}

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append_line(&self, speaker: Speaker, text: &str);
    async fn set_status(&self, status: UiStatus);
    /// Bring back the text input once voice mode is over.
    async fn restore_text_input(&self);
}
