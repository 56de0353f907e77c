//! Recorded alert firings and the bounded incident history.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::detect::SeverityLevel;

/// What happened when one channel was asked to deliver an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider-side details returned on success (message id, call id, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ChannelOutcome {
    pub fn delivered(channel: impl Into<String>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            channel: channel.into(),
            delivered: true,
            error: None,
            metadata,
        }
    }

    pub fn failed(channel: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            delivered: false,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

/// A recorded alert firing. Reflects the attempt, not guaranteed delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: SeverityLevel,
    pub confidence: f64,
    pub detection_count: usize,
    pub message: String,
    pub channels: Vec<ChannelOutcome>,
}

impl Incident {
    /// Ids of every channel that was fired for this incident.
    pub fn channels_fired(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.channel.as_str()).collect()
    }

    pub fn failed_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| !c.delivered)
            .map(|c| c.channel.as_str())
            .collect()
    }
}

/// Bounded, append-only incident history. Oldest entries are evicted first.
///
/// Cheap to clone; all clones share the same log.
#[derive(Debug, Clone)]
pub struct IncidentLog {
    inner: Arc<RwLock<VecDeque<Incident>>>,
    capacity: usize,
}

impl IncidentLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub async fn append(&self, incident: Incident) {
        let mut log = self.inner.write().await;
        while log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(incident);
    }

    /// Copy of the log, oldest first.
    pub async fn snapshot(&self) -> Vec<Incident> {
        self.inner.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
