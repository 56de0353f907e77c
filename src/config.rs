//! TOML configuration for the vigilant monitor.
//!
//! A layered configuration model with sensible defaults, an environment
//! variable override for the config file path, and secrets that may be
//! supplied through the environment instead of the file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::detect::SeverityLevel;

/// Environment variable naming the config file to load.
pub const CONFIG_ENV: &str = "VIGILANT_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vigilant/vigilant.toml";

/// A configuration value that cannot be used to start the monitor.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("fusion.{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("fusion.detection_count_threshold must be at least 1")]
    ZeroDetectionCount,
    #[error("fusion.mild_threshold must be within [0, 1], got {0}")]
    MildThresholdOutOfRange(f64),
    #[error("fusion.mild_consecutive_threshold must be at least 1")]
    ZeroConsecutiveThreshold,
    #[error("fusion.primary_detector must not be empty")]
    EmptyPrimaryDetector,
    #[error("dispatch.{field} must be at least 1")]
    ZeroDispatchSetting { field: &'static str },
    #[error("channel id must not be empty")]
    EmptyChannelId,
    #[error("duplicate channel id: {0}")]
    DuplicateChannel(String),
    #[error("channel {channel}: min_interval_sec must be at least 1")]
    ZeroChannelInterval { channel: String },
    #[error("channel {channel}: min_severity must be mild or high")]
    UngatedChannel { channel: String },
    #[error("channel {channel}: missing {field} (set it in the file or via {env})")]
    MissingCredential {
        channel: String,
        field: &'static str,
        env: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the monitor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            dispatch: DispatchConfig::default(),
            alert: AlertConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            channels: default_channels(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration the process should run with.
    ///
    /// Sources are tried in order: the explicit path, the file named by
    /// `VIGILANT_CONFIG`, `/etc/vigilant/vigilant.toml`, compiled-in
    /// defaults. The first source that is present must load; a broken file
    /// is an error, never a silent fall back to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_from(
            explicit,
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            Path::new(SYSTEM_CONFIG_PATH),
        )
    }

    fn resolve_from(explicit: Option<&Path>, from_env: Option<PathBuf>, system: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = from_env {
            return Self::load(&path)
                .with_context(|| format!("{} points at an unusable config", CONFIG_ENV));
        }
        if system.exists() {
            return Self::load(system);
        }
        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Fill empty transport secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Same as [`Config::apply_env`] with an injectable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |slot: &mut String, key: &str| {
            if slot.is_empty() {
                if let Some(v) = lookup(key).filter(|v| !v.is_empty()) {
                    *slot = v;
                }
            }
        };

        for channel in &mut self.channels {
            match &mut channel.transport {
                TransportConfig::Telegram {
                    bot_token, chat_id, ..
                } => {
                    fill(bot_token, env::TELEGRAM_BOT_TOKEN);
                    fill(chat_id, env::TELEGRAM_CHAT_ID);
                }
                TransportConfig::VoiceCall {
                    api_key,
                    agent_id,
                    from_phone,
                    to_phone,
                    ..
                } => {
                    fill(api_key, env::VOICE_API_KEY);
                    fill(agent_id, env::VOICE_AGENT_ID);
                    fill(from_phone, env::VOICE_FROM_PHONE);
                    fill(to_phone, env::VOICE_TO_PHONE);
                }
                TransportConfig::Log => {}
            }
        }
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.fusion;
        if f.window_size_sec == 0 {
            return Err(ConfigError::ZeroDuration { field: "window_size_sec" });
        }
        if f.idle_timeout_sec == 0 {
            return Err(ConfigError::ZeroDuration { field: "idle_timeout_sec" });
        }
        if f.prune_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration { field: "prune_interval_ms" });
        }
        if f.detection_count_threshold == 0 {
            return Err(ConfigError::ZeroDetectionCount);
        }
        if !f.mild_threshold.is_finite() || !(0.0..=1.0).contains(&f.mild_threshold) {
            return Err(ConfigError::MildThresholdOutOfRange(f.mild_threshold));
        }
        if f.mild_consecutive_threshold == 0 {
            return Err(ConfigError::ZeroConsecutiveThreshold);
        }
        if f.primary_detector.trim().is_empty() {
            return Err(ConfigError::EmptyPrimaryDetector);
        }

        let d = &self.dispatch;
        for (field, value) in [
            ("queue_capacity", d.queue_capacity as u64),
            ("workers", d.workers as u64),
            ("send_timeout_sec", d.send_timeout_sec),
            ("incident_capacity", d.incident_capacity as u64),
            ("status_log_capacity", d.status_log_capacity as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDispatchSetting { field });
            }
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.id.trim().is_empty() {
                return Err(ConfigError::EmptyChannelId);
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(ConfigError::DuplicateChannel(channel.id.clone()));
            }
            if channel.min_interval_sec == 0 {
                return Err(ConfigError::ZeroChannelInterval {
                    channel: channel.id.clone(),
                });
            }
            if channel.min_severity == SeverityLevel::None {
                return Err(ConfigError::UngatedChannel {
                    channel: channel.id.clone(),
                });
            }
            channel.transport.check_credentials(&channel.id)?;
        }

        Ok(())
    }

    /// Copy of the configuration with transport secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |s: &mut String| {
            if !s.is_empty() {
                *s = "<redacted>".to_string();
            }
        };
        for channel in &mut copy.channels {
            match &mut channel.transport {
                TransportConfig::Telegram { bot_token, .. } => mask(bot_token),
                TransportConfig::VoiceCall { api_key, .. } => mask(api_key),
                TransportConfig::Log => {}
            }
        }
        copy
    }
}

/// Names of the environment variables consulted for transport secrets.
pub mod env {
    pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
    pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
    pub const VOICE_API_KEY: &str = "VOICE_API_KEY";
    pub const VOICE_AGENT_ID: &str = "VOICE_AGENT_ID";
    pub const VOICE_FROM_PHONE: &str = "VOICE_FROM_PHONE";
    pub const VOICE_TO_PHONE: &str = "VOICE_TO_PHONE";
}

// ---------------------------------------------------------------------------
// Fusion
// ---------------------------------------------------------------------------

/// Sliding-window severity fusion parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Length of the sliding detection window (seconds).
    pub window_size_sec: u64,
    /// Window is cleared when no detection arrived for this long (seconds).
    pub idle_timeout_sec: u64,
    /// Minimum spacing between opportunistic prunes on the record path (ms).
    pub prune_interval_ms: u64,
    /// Minimum detections in the window before any severity is reported.
    pub detection_count_threshold: usize,
    /// Max confidence at or above which the window is immediately HIGH.
    pub mild_threshold: f64,
    /// Consecutive MILD assessments that force an escalation to HIGH.
    pub mild_consecutive_threshold: u32,
    /// Detector whose records drive the severity math.
    pub primary_detector: String,
    /// Classifications of the primary detector that count as evidence.
    /// Empty means every classification counts.
    pub primary_classes: Vec<String>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window_size_sec: 5,
            idle_timeout_sec: 5,
            prune_interval_ms: 1000,
            detection_count_threshold: 20,
            mild_threshold: 0.8,
            mild_consecutive_threshold: 5,
            primary_detector: "primary".to_string(),
            primary_classes: Vec::new(),
        }
    }
}

impl FusionConfig {
    pub fn window_size(&self) -> Duration {
        Duration::from_secs(self.window_size_sec)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Alert dispatch worker pool and history sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pending alert jobs held before new ones are dropped.
    pub queue_capacity: usize,
    /// Worker tasks draining the queue.
    pub workers: usize,
    /// Upper bound on a single channel send (seconds).
    pub send_timeout_sec: u64,
    /// Time in-flight dispatches get to finish on shutdown (seconds).
    pub shutdown_grace_sec: u64,
    /// Incidents retained in memory.
    pub incident_capacity: usize,
    /// Alert log lines retained in the status snapshot.
    pub status_log_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            workers: 2,
            send_timeout_sec: 30,
            shutdown_grace_sec: 5,
            incident_capacity: 10,
            status_log_capacity: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Alert rendering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Headline of every alert message.
    pub title: String,
    /// Section heading per auxiliary detector in the alert body.
    pub sections: BTreeMap<String, String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let mut sections = BTreeMap::new();
        sections.insert("object".to_string(), "Lethal Objects Detected".to_string());
        sections.insert("classifier".to_string(), "Violence Classification".to_string());
        Self {
            title: "Violent Activity Detected!".to_string(),
            sections,
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address for the status/report HTTP listener.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// One outbound alert channel with its gate and cool-down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    /// Lowest severity that opens this channel's gate.
    pub min_severity: SeverityLevel,
    /// Minimum spacing between two firings of this channel (seconds).
    pub min_interval_sec: u64,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl ChannelConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_sec)
    }
}

/// How a channel delivers its alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Text message plus optional video clip through the Telegram Bot API.
    Telegram {
        #[serde(default)]
        bot_token: String,
        #[serde(default)]
        chat_id: String,
        #[serde(default = "default_telegram_api")]
        api_base: String,
    },
    /// Outbound voice call through an agent-calling HTTP API.
    VoiceCall {
        #[serde(default = "default_voice_endpoint")]
        endpoint: String,
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        agent_id: String,
        #[serde(default)]
        from_phone: String,
        #[serde(default)]
        to_phone: String,
    },
    /// Alert is written to the log only.
    #[default]
    Log,
}

impl TransportConfig {
    fn check_credentials(&self, channel: &str) -> Result<(), ConfigError> {
        let missing = |field: &'static str, var: &'static str| ConfigError::MissingCredential {
            channel: channel.to_string(),
            field,
            env: var,
        };
        match self {
            TransportConfig::Telegram {
                bot_token, chat_id, ..
            } => {
                if bot_token.is_empty() {
                    return Err(missing("bot_token", env::TELEGRAM_BOT_TOKEN));
                }
                if chat_id.is_empty() {
                    return Err(missing("chat_id", env::TELEGRAM_CHAT_ID));
                }
            }
            TransportConfig::VoiceCall {
                api_key,
                agent_id,
                from_phone,
                to_phone,
                ..
            } => {
                for (value, field, var) in [
                    (api_key, "api_key", env::VOICE_API_KEY),
                    (agent_id, "agent_id", env::VOICE_AGENT_ID),
                    (from_phone, "from_phone", env::VOICE_FROM_PHONE),
                    (to_phone, "to_phone", env::VOICE_TO_PHONE),
                ] {
                    if value.is_empty() {
                        return Err(missing(field, var));
                    }
                }
            }
            TransportConfig::Log => {}
        }
        Ok(())
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_voice_endpoint() -> String {
    "https://api-west.millis.ai/start_outbound_call".to_string()
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            id: "notification".to_string(),
            min_severity: SeverityLevel::Mild,
            min_interval_sec: 10,
            transport: TransportConfig::Log,
        },
        ChannelConfig {
            id: "emergency-call".to_string(),
            min_severity: SeverityLevel::High,
            min_interval_sec: 30,
            transport: TransportConfig::Log,
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
