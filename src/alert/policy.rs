//! Per-channel gating and cool-down enforcement.
//!
//! Every channel has its own severity gate and its own cool-down timer; a
//! firing on one channel never delays another.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ChannelConfig;
use crate::detect::{SeverityAssessment, SeverityLevel};

/// Shortest interval accepted from runtime tuning.
pub const MIN_RUNTIME_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("interval for {channel} must be at least {min:?}")]
    IntervalTooShort { channel: String, min: Duration },
}

/// Cool-down state for one channel.
#[derive(Debug, Clone)]
pub struct ChannelCooldown {
    pub channel_id: String,
    pub min_severity: SeverityLevel,
    pub min_interval: Duration,
    pub last_fired_at: Option<Instant>,
}

impl ChannelCooldown {
    pub fn new(channel_id: impl Into<String>, min_severity: SeverityLevel, min_interval: Duration) -> Self {
        Self {
            channel_id: channel_id.into(),
            min_severity,
            min_interval,
            last_fired_at: None,
        }
    }

    fn gate_open(&self, level: SeverityLevel) -> bool {
        level != SeverityLevel::None && level >= self.min_severity
    }

    fn cooled_down(&self, now: Instant) -> bool {
        match self.last_fired_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }
}

/// Which channels fire for one assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireDecision {
    pub severity: SeverityLevel,
    pub channels: Vec<String>,
}

impl FireDecision {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn fires(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}

/// Reporting view of a channel's cool-down.
#[derive(Debug, Clone, Serialize)]
pub struct CooldownStatus {
    pub channel: String,
    pub min_severity: SeverityLevel,
    pub min_interval_sec: f64,
    /// Seconds since the last firing; `None` if it never fired.
    pub since_last_fired_sec: Option<f64>,
}

/// Translates assessments into channel firings.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    cooldowns: Vec<ChannelCooldown>,
}

impl AlertPolicy {
    pub fn new(cooldowns: Vec<ChannelCooldown>) -> Self {
        Self { cooldowns }
    }

    pub fn from_channels(channels: &[ChannelConfig]) -> Self {
        Self::new(
            channels
                .iter()
                .map(|c| ChannelCooldown::new(&c.id, c.min_severity, c.min_interval()))
                .collect(),
        )
    }

    /// Decide which channels fire at `now`.
    ///
    /// A channel fires when its severity gate is satisfied and its cool-down
    /// has elapsed. Its `last_fired_at` is stamped right here, before any
    /// delivery is attempted.
    pub fn evaluate(&mut self, assessment: &SeverityAssessment, now: Instant) -> FireDecision {
        let mut channels = Vec::new();

        for cd in &mut self.cooldowns {
            if !cd.gate_open(assessment.level) {
                continue;
            }
            if !cd.cooled_down(now) {
                debug!(
                    channel = %cd.channel_id,
                    level = %assessment.level,
                    "cool-down not elapsed"
                );
                continue;
            }
            cd.last_fired_at = Some(now);
            channels.push(cd.channel_id.clone());
        }

        FireDecision {
            severity: assessment.level,
            channels,
        }
    }

    /// Change a channel's minimum interval at runtime.
    pub fn set_interval(&mut self, channel: &str, interval: Duration) -> Result<(), PolicyError> {
        if interval < MIN_RUNTIME_INTERVAL {
            return Err(PolicyError::IntervalTooShort {
                channel: channel.to_string(),
                min: MIN_RUNTIME_INTERVAL,
            });
        }
        let cd = self
            .cooldowns
            .iter_mut()
            .find(|c| c.channel_id == channel)
            .ok_or_else(|| PolicyError::UnknownChannel(channel.to_string()))?;
        cd.min_interval = interval;
        Ok(())
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.cooldowns.iter().any(|c| c.channel_id == channel)
    }

    pub fn cooldowns(&self, now: Instant) -> Vec<CooldownStatus> {
        self.cooldowns
            .iter()
            .map(|c| CooldownStatus {
                channel: c.channel_id.clone(),
                min_severity: c.min_severity,
                min_interval_sec: c.min_interval.as_secs_f64(),
                since_last_fired_sec: c
                    .last_fired_at
                    .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            })
            .collect()
    }
}
