//! Connection-token exchange with the widget backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::{Result, VoiceError};
use crate::history::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Browser,
    Phone,
}

#[derive(Debug, Clone, Serialize)]
pub struct DealerInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalingRequest {
    pub call_type: CallType,
    pub chat_history: Vec<ChatMessage>,
    pub dealer: DealerInfo,
    pub visitor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub url: String,
}

#[async_trait]
pub trait Signaling: Send + Sync {
    async fn request_connection(&self, request: &SignalingRequest) -> Result<ConnectionDescriptor>;
}

#[derive(Debug, Deserialize)]
struct SignalingResponse {
    #[serde(default)]
    signed_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Extract the connection URL from a signaling response body.
fn parse_descriptor(body: &str) -> Result<ConnectionDescriptor> {
    let resp: SignalingResponse = serde_json::from_str(body)
        .map_err(|e| VoiceError::Signaling(format!("JSON parse error: {}", e)))?;
    resp.signed_url
        .or(resp.url)
        .filter(|u| !u.is_empty())
        .map(|url| ConnectionDescriptor { url })
        .ok_or_else(|| VoiceError::Signaling("response carries no connection url".into()))
}

pub struct HttpSignaling {
    client: Client,
    endpoint: String,
}

impl HttpSignaling {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.signaling_url.clone(),
        })
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn request_connection(&self, request: &SignalingRequest) -> Result<ConnectionDescriptor> {
        log::info!("Requesting voice connection via {}", self.endpoint);
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(VoiceError::Signaling(format!("HTTP Error: {}", resp.status())));
        }
        let body = resp.text().await?;
        parse_descriptor(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_signed_url() {
        let d = parse_descriptor(r#"{"signed_url":"wss://a/x","url":"wss://b/y"}"#).unwrap();
        assert_eq!(d.url, "wss://a/x");
        let d = parse_descriptor(r#"{"url":"wss://b/y"}"#).unwrap();
        assert_eq!(d.url, "wss://b/y");
    }

    #[test]
    fn missing_url_is_a_signaling_error() {
        assert!(matches!(
            parse_descriptor(r#"{"error":"quota"}"#),
            Err(VoiceError::Signaling(_))
        ));
        assert!(matches!(
            parse_descriptor("<html>"),
            Err(VoiceError::Signaling(_))
        ));
    }

    #[test]
    fn request_serializes_wire_shape() {
        let req = SignalingRequest {
            call_type: CallType::Browser,
            chat_history: vec![ChatMessage::user("hi")],
            dealer: DealerInfo {
                id: "d1".into(),
                name: "Shop".into(),
            },
            visitor_id: "v1".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "call_type": "browser",
                "chat_history": [{"role": "user", "content": "hi"}],
                "dealer": {"id": "d1", "name": "Shop"},
                "visitor_id": "v1"
            })
        );
    }
}
