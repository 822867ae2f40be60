//! Duplex wire messages exchanged with the conversational backend.
//!
//! Every frame is a JSON text message discriminated by `type`; outbound audio
//! chunks are the one exception and carry only `user_audio_chunk`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::history::{ChatMessage, Role};

// ======================== Inbound ========================

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    Audio {
        audio_event: AudioEvent,
    },
    UserTranscript {
        user_transcription_event: UserTranscription,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    Ping {
        #[serde(default)]
        ping_event: PingEvent,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InitiationMetadata {
    pub conversation_id: String,
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AudioEvent {
    pub audio_base_64: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub audio_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UserTranscription {
    pub user_transcript: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub transcript_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AgentResponseEvent {
    pub agent_response: String,
    #[serde(default, deserialize_with = "opt_id")]
    pub response_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PingEvent {
    /// Echoed back verbatim in the pong
    #[serde(default)]
    pub event_id: Option<Value>,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

/// Ids arrive as strings or numbers depending on the backend version.
fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ======================== Outbound ========================

#[derive(Serialize, Debug, Clone)]
pub struct ConversationInitiation {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub agent: AgentSettings,
    pub generation_params: GenerationParams,
    pub dynamic_variables: BTreeMap<String, String>,
    pub first_message: String,
    pub context: ConversationContext,
}

#[derive(Serialize, Debug, Clone)]
pub struct AgentSettings {
    pub prompt: String,
    pub language: String,
    pub agent_id: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct ConversationContext {
    pub messages: Vec<ContextMessage>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub role: &'static str,
    pub content: String,
}

impl From<&ChatMessage> for ContextMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role,
            content: msg.content.clone(),
        }
    }
}

impl ConversationInitiation {
    pub fn new(
        agent: AgentSettings,
        generation_params: GenerationParams,
        dynamic_variables: BTreeMap<String, String>,
        first_message: String,
        history: &[ChatMessage],
    ) -> Self {
        Self {
            msg_type: "conversation_initiation_client_data",
            agent,
            generation_params,
            dynamic_variables,
            first_message,
            context: ConversationContext {
                messages: history.iter().map(ContextMessage::from).collect(),
            },
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct UserAudioChunk {
    /// base64 PCM16 mono at the target rate
    pub user_audio_chunk: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Pong {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub event_id: Value,
}

impl Pong {
    pub fn new(event_id: Value) -> Self {
        Self {
            msg_type: "pong",
            event_id,
        }
    }
}
