//! Outbound voice-call alert channel.

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{Alert, AlertChannel, ChannelError, ChannelReceipt};

/// Where and how to place an outbound emergency call.
#[derive(Debug, Clone)]
pub struct VoiceCallTarget {
    pub endpoint: String,
    pub api_key: String,
    pub agent_id: String,
    pub from_phone: String,
    pub to_phone: String,
}

#[derive(Serialize)]
struct CallRequest<'a> {
    from_phone: &'a str,
    to_phone: &'a str,
    agent_id: &'a str,
    metadata: serde_json::Value,
    include_metadata_in_prompt: bool,
}

/// Starts a voice-agent call carrying the incident details.
pub struct VoiceCallChannel {
    id: String,
    client: Client,
    target: VoiceCallTarget,
}

impl VoiceCallChannel {
    pub fn new(id: &str, target: VoiceCallTarget) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            id: id.to_string(),
            client,
            target,
        })
    }
}

#[async_trait::async_trait]
impl AlertChannel for VoiceCallChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, alert: &Alert) -> Result<ChannelReceipt, ChannelError> {
        let body = CallRequest {
            from_phone: &self.target.from_phone,
            to_phone: &self.target.to_phone,
            agent_id: &self.target.agent_id,
            metadata: alert.metadata(),
            include_metadata_in_prompt: true,
        };

        let resp = self
            .client
            .post(&self.target.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.target.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let metadata = resp.json::<serde_json::Value>().await.ok();
        debug!(channel = %self.id, ?metadata, "outbound call accepted");
        Ok(ChannelReceipt { metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::SeverityLevel;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_call_request_carries_incident_metadata() {
        let seen: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::default();
        let sink = seen.clone();
        let router = Router::new().route(
            "/start_outbound_call",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *sink.lock().await = Some((auth, body));
                    Json(serde_json::json!({ "call_id": "c-1" }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let ch = VoiceCallChannel::new(
            "emergency-call",
            VoiceCallTarget {
                endpoint: format!("http://{}/start_outbound_call", addr),
                api_key: "key-1".to_string(),
                agent_id: "agent-7".to_string(),
                from_phone: "+15550001".to_string(),
                to_phone: "+15550002".to_string(),
            },
        )
        .unwrap();

        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            created_at: chrono::Local::now(),
            severity: SeverityLevel::High,
            detection_count: 30,
            confidence: 0.91,
            message: "m".to_string(),
            annotations: Vec::new(),
            media: None,
        };
        let receipt = ch.send(&alert).await.unwrap();
        assert_eq!(receipt.metadata.unwrap()["call_id"], "c-1");

        let (auth, body) = seen.lock().await.clone().unwrap();
        assert_eq!(auth, "key-1");
        assert_eq!(body["agent_id"], "agent-7");
        assert_eq!(body["to_phone"], "+15550002");
        assert_eq!(body["include_metadata_in_prompt"], true);
        assert_eq!(body["metadata"]["severity_level"], "HIGH");
        assert_eq!(body["metadata"]["detections"], 30);
        assert_eq!(body["metadata"]["confidence"], 0.91);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_an_error() {
        let ch = VoiceCallChannel::new(
            "emergency-call",
            VoiceCallTarget {
                endpoint: "http://127.0.0.1:1/start".to_string(),
                api_key: "k".to_string(),
                agent_id: "a".to_string(),
                from_phone: "1".to_string(),
                to_phone: "2".to_string(),
            },
        )
        .unwrap();
        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            created_at: chrono::Local::now(),
            severity: SeverityLevel::High,
            detection_count: 1,
            confidence: 0.9,
            message: String::new(),
            annotations: Vec::new(),
            media: None,
        };
        assert!(matches!(ch.send(&alert).await, Err(ChannelError::Http(_))));
    }
}
