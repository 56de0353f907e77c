//! Alert policy, payload rendering, outbound channels, and dispatch.

pub mod dispatcher;
pub mod message;
pub mod policy;
pub mod telegram;
pub mod voice;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::{ChannelConfig, TransportConfig};
use crate::detect::{DetectionRecord, SeverityLevel};

pub use self::dispatcher::{DispatchJob, DispatchSettings, DispatchStats, Dispatcher};
pub use self::policy::{AlertPolicy, ChannelCooldown, CooldownStatus, FireDecision, PolicyError};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to read media: {0}")]
    Media(#[from] std::io::Error),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Provider details returned by a successful send.
#[derive(Debug, Clone, Default)]
pub struct ChannelReceipt {
    pub metadata: Option<serde_json::Value>,
}

/// An outbound alert delivery mechanism.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel id as configured; matches the policy's cool-down entry.
    fn id(&self) -> &str;

    /// Deliver the alert. Must not panic on provider failures.
    async fn send(&self, alert: &Alert) -> Result<ChannelReceipt, ChannelError>;
}

/// Auxiliary detector output carried along with an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub detector: String,
    /// Records sorted by confidence, highest first.
    pub records: Vec<DetectionRecord>,
}

/// An enriched alert ready for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub created_at: DateTime<Local>,
    pub severity: SeverityLevel,
    pub detection_count: usize,
    pub confidence: f64,
    pub message: String,
    pub annotations: Vec<Annotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<PathBuf>,
}

impl Alert {
    /// Structured incident details handed to providers (e.g. a voice agent).
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "emergency": "violence_detected",
            "alert_id": self.id.to_string(),
            "date_of_incident": self.created_at.format("%Y-%m-%d").to_string(),
            "time_of_incident": self.created_at.format("%I:%M %p").to_string(),
            "severity_level": self.severity.to_string(),
            "detections": self.detection_count,
            "confidence": message::round2(self.confidence),
        })
    }
}

/// Alert channel that only writes to the log.
pub struct LogChannel {
    id: String,
}

impl LogChannel {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait::async_trait]
impl AlertChannel for LogChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, alert: &Alert) -> Result<ChannelReceipt, ChannelError> {
        info!(
            channel = %self.id,
            alert_id = %alert.id,
            severity = %alert.severity,
            detections = alert.detection_count,
            confidence = alert.confidence,
            "{}",
            alert.message
        );
        Ok(ChannelReceipt::default())
    }
}

/// Instantiate the configured channels.
pub fn build_channels(configs: &[ChannelConfig]) -> anyhow::Result<Vec<Arc<dyn AlertChannel>>> {
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::with_capacity(configs.len());
    for cfg in configs {
        let channel: Arc<dyn AlertChannel> = match &cfg.transport {
            TransportConfig::Telegram {
                bot_token,
                chat_id,
                api_base,
            } => Arc::new(telegram::TelegramChannel::new(
                &cfg.id,
                api_base,
                bot_token,
                chat_id,
            )?),
            TransportConfig::VoiceCall {
                endpoint,
                api_key,
                agent_id,
                from_phone,
                to_phone,
            } => Arc::new(voice::VoiceCallChannel::new(
                &cfg.id,
                voice::VoiceCallTarget {
                    endpoint: endpoint.clone(),
                    api_key: api_key.clone(),
                    agent_id: agent_id.clone(),
                    from_phone: from_phone.clone(),
                    to_phone: to_phone.clone(),
                },
            )?),
            TransportConfig::Log => Arc::new(LogChannel::new(&cfg.id)),
        };
        channels.push(channel);
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_metadata_fields() {
        let alert = Alert {
            id: Uuid::new_v4(),
            created_at: Local::now(),
            severity: SeverityLevel::High,
            detection_count: 26,
            confidence: 0.8512,
            message: String::new(),
            annotations: Vec::new(),
            media: None,
        };
        let meta = alert.metadata();
        assert_eq!(meta["severity_level"], "HIGH");
        assert_eq!(meta["detections"], 26);
        assert_eq!(meta["confidence"], 0.85);
        assert_eq!(meta["emergency"], "violence_detected");
    }

    #[tokio::test]
    async fn test_build_default_channels() {
        let cfg = Config::default();
        let channels = build_channels(&cfg.channels).unwrap();
        let ids: Vec<&str> = channels.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["notification", "emergency-call"]);
    }
}
