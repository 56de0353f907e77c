//! Telegram Bot API alert channel.

use std::time::Duration;

use anyhow::Result;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use super::{Alert, AlertChannel, ChannelError, ChannelReceipt};

/// Text + video notification through the Telegram Bot API.
pub struct TelegramChannel {
    id: String,
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(id: &str, api_base: &str, bot_token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            id: id.to_string(),
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn send_text(&self, text: &str) -> Result<serde_json::Value, ChannelError> {
        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await?;
        read_json(resp).await
    }

    async fn send_video(&self, bytes: Vec<u8>) -> Result<serde_json::Value, ChannelError> {
        let part = Part::bytes(bytes)
            .file_name("video.mp4")
            .mime_str("video/mp4")?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .part("video", part);
        let resp = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, ChannelError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChannelError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await.unwrap_or(serde_json::Value::Null))
}

#[async_trait::async_trait]
impl AlertChannel for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    /// The message goes out first; the clip follows when one was recorded.
    /// A missing or empty clip does not fail the alert.
    async fn send(&self, alert: &Alert) -> Result<ChannelReceipt, ChannelError> {
        let message = self.send_text(&alert.message).await?;
        let message_id = message
            .pointer("/result/message_id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let mut video_sent = false;
        if let Some(path) = &alert.media {
            match tokio::fs::read(path).await {
                Ok(bytes) if !bytes.is_empty() => {
                    self.send_video(bytes).await?;
                    video_sent = true;
                    debug!(channel = %self.id, path = %path.display(), "video clip sent");
                }
                Ok(_) => {
                    warn!(channel = %self.id, path = %path.display(), "video clip is empty, skipping");
                }
                Err(e) => {
                    warn!(channel = %self.id, path = %path.display(), error = %e, "video clip unreadable, skipping");
                }
            }
        }

        Ok(ChannelReceipt {
            metadata: Some(serde_json::json!({
                "message_id": message_id,
                "video_sent": video_sent,
            })),
        })
    }
}
