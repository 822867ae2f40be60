//! Error types for the voice core

use thiserror::Error;

/// Result alias used across the voice core
pub type Result<T> = std::result::Result<T, VoiceError>;

#[derive(Debug, Error)]
pub enum VoiceError {
    /// Microphone could not be opened (permission denied, no device)
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    /// Playback device could not be opened
    #[error("output device unavailable: {0}")]
    OutputDevice(String),

    /// Connection token request failed
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Duplex connection failed or dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport is not open
    #[error("transport closed")]
    Closed,

    /// Malformed or undersized audio payload
    #[error("decode error: {0}")]
    Decode(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A voice session is already running
    #[error("a voice session is already active")]
    SessionActive,
}

impl VoiceError {
    /// Transport-class failures are retried with backoff; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VoiceError::Signaling(_) | VoiceError::Transport(_) | VoiceError::Closed
        )
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(e: config::ConfigError) -> Self {
        VoiceError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(e: reqwest::Error) -> Self {
        VoiceError::Signaling(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(VoiceError::Transport("reset".into()).is_retryable());
        assert!(VoiceError::Signaling("502".into()).is_retryable());
        assert!(VoiceError::Closed.is_retryable());
        assert!(!VoiceError::Microphone("denied".into()).is_retryable());
        assert!(!VoiceError::Decode("short".into()).is_retryable());
    }
}
