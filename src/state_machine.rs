/// 语音会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Connecting,
    /// Initiation sent, waiting for the backend to acknowledge
    Initiated,
    Listening,
    AgentSpeaking,
    UserSpeaking,
    Reconnecting,
    Ended,
}

impl VoiceState {
    /// States in which a session owns audio resources.
    pub fn is_active(self) -> bool {
        !matches!(self, VoiceState::Idle | VoiceState::Ended)
    }

    /// States in which the backend has acknowledged the session.
    pub fn is_conversing(self) -> bool {
        matches!(
            self,
            VoiceState::Listening | VoiceState::AgentSpeaking | VoiceState::UserSpeaking
        )
    }
}
