use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, VoiceError};

/// 运行时配置，从 config.toml + CHATWIDGET__* 环境变量加载
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub session: SessionConfig,
    pub ui: UiConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    /// Endpoint that exchanges chat context for a signed duplex URL
    pub signaling_url: String,
    pub dealer_id: String,
    pub dealer_name: String,
    pub request_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            signaling_url: "http://127.0.0.1:8080/api/voice/session".to_string(),
            dealer_id: "default".to_string(),
            dealer_name: "Website".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub agent_id: String,
    pub prompt: String,
    pub language: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Greeting used when there is no prior chat history
    pub default_greeting: String,
    /// Greeting used when prior history exists; `{topic}` is replaced with the last user message
    pub returning_greeting: String,
    /// Notice appended once when the backend acknowledges the session
    pub voice_banner: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            prompt: "You are a friendly assistant for this website. Keep answers short and conversational.".to_string(),
            language: "en".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            default_greeting: "Hi! How can I help you today?".to_string(),
            returning_greeting: "Welcome back! Earlier you asked about \"{topic}\". How can I help?".to_string(),
            voice_banner: "Voice mode activated. Start speaking any time.".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    pub playback_device: String,
    /// Rate of outbound PCM sent to the backend
    pub target_sample_rate: u32,
    /// Desired capture rate; the hardware may negotiate another one
    pub capture_sample_rate: u32,
    pub capture_channels: u32,
    /// Mono samples per capture frame
    pub frame_size: usize,
    /// Rate of inbound agent PCM
    pub playback_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            target_sample_rate: 16_000,
            capture_sample_rate: 48_000,
            capture_channels: 1,
            frame_size: 4096,
            playback_sample_rate: 16_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct VadConfig {
    /// RMS level above which a window counts as speech
    pub energy_threshold: f32,
    pub tick_ms: u64,
    /// Consecutive loud windows required before speech is confirmed
    pub confirm_ticks: u32,
    /// Sustained speech beyond this aborts the agent turn
    pub barge_in_grace_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            tick_ms: 50,
            confirm_ticks: 2,
            barge_in_grace_ms: 400,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub keepalive_timeout_secs: u64,
    pub keepalive_check_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_step_ms: u64,
    pub reconnect_jitter_ms: u64,
    pub playback_fallback_secs: u64,
    pub restore_input_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_timeout_secs: 30,
            keepalive_check_secs: 10,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 1000,
            reconnect_step_ms: 1000,
            reconnect_jitter_ms: 500,
            playback_fallback_secs: 10,
            restore_input_delay_ms: 1500,
        }
    }
}

impl SessionConfig {
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }

    pub fn keepalive_check(&self) -> Duration {
        Duration::from_secs(self.keepalive_check_secs)
    }

    pub fn playback_fallback(&self) -> Duration {
        Duration::from_secs(self.playback_fallback_secs)
    }

    pub fn restore_input_delay(&self) -> Duration {
        Duration::from_millis(self.restore_input_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UiConfig {
    /// UDP address this process listens on for widget commands
    pub local_addr: String,
    /// UDP address of the widget UI process
    pub remote_addr: String,
    pub buffer_size: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            local_addr: "127.0.0.1:5676".to_string(),
            remote_addr: "127.0.0.1:5677".to_string(),
            buffer_size: 4096,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub history_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_path: "chatwidget_session.json".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：文件可选，环境变量覆盖文件
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("CHATWIDGET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vad.tick_ms == 0 {
            return Err(VoiceError::Config("vad.tick_ms must be > 0".into()));
        }
        if self.vad.confirm_ticks == 0 {
            return Err(VoiceError::Config("vad.confirm_ticks must be > 0".into()));
        }
        if self.audio.frame_size == 0 {
            return Err(VoiceError::Config("audio.frame_size must be > 0".into()));
        }
        if self.audio.target_sample_rate == 0
            || self.audio.playback_sample_rate == 0
            || self.audio.capture_sample_rate == 0
        {
            return Err(VoiceError::Config("sample rates must be > 0".into()));
        }
        if self.audio.capture_channels == 0 {
            return Err(VoiceError::Config("audio.capture_channels must be > 0".into()));
        }
        if self.session.keepalive_check_secs == 0 {
            return Err(VoiceError::Config(
                "session.keepalive_check_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.audio.target_sample_rate, 16_000);
        assert_eq!(config.vad.tick_ms, 50);
        assert_eq!(config.vad.confirm_ticks, 2);
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.session.keepalive_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[agent]\nagent_id = \"agent-42\"\nlanguage = \"de\"").unwrap();
        writeln!(file, "[vad]\nbarge_in_grace_ms = 250").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.agent.agent_id, "agent-42");
        assert_eq!(config.agent.language, "de");
        assert_eq!(config.vad.barge_in_grace_ms, 250);
        // untouched fields keep their defaults
        assert_eq!(config.vad.tick_ms, 50);
        assert_eq!(config.agent.max_tokens, 300);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let mut config = Config::default();
        config.vad.tick_ms = 0;
        assert!(matches!(config.validate(), Err(VoiceError::Config(_))));
    }

    #[test]
    fn zero_capture_format_is_rejected() {
        let mut config = Config::default();
        config.audio.capture_sample_rate = 0;
        assert!(matches!(config.validate(), Err(VoiceError::Config(_))));

        let mut config = Config::default();
        config.audio.capture_channels = 0;
        assert!(matches!(config.validate(), Err(VoiceError::Config(_))));
    }
}
