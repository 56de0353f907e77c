//! Sliding-window severity tracker with consecutive-MILD escalation.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::FusionConfig;
use crate::detect::{Detection, SeverityAssessment, SeverityLevel};

/// Tunables for a [`SeverityTracker`].
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub window_size: Duration,
    pub idle_timeout: Duration,
    pub prune_interval: Duration,
    pub detection_count_threshold: usize,
    pub mild_threshold: f64,
    pub mild_consecutive_threshold: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from(&FusionConfig::default())
    }
}

impl From<&FusionConfig> for TrackerSettings {
    fn from(cfg: &FusionConfig) -> Self {
        Self {
            window_size: cfg.window_size(),
            idle_timeout: cfg.idle_timeout(),
            prune_interval: cfg.prune_interval(),
            detection_count_threshold: cfg.detection_count_threshold,
            mild_threshold: cfg.mild_threshold,
            mild_consecutive_threshold: cfg.mild_consecutive_threshold,
        }
    }
}

/// Owns the detection window and the escalation counter.
///
/// Entries are kept in arrival order. Every entry still in the window after
/// a prune at `now` satisfies `now - timestamp <= window_size`.
#[derive(Debug)]
pub struct SeverityTracker {
    settings: TrackerSettings,
    window: VecDeque<Detection>,
    last_prune: Option<Instant>,
    last_detection: Option<Instant>,
    consecutive_mild: u32,
}

impl SeverityTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            window: VecDeque::new(),
            last_prune: None,
            last_detection: None,
            consecutive_mild: 0,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Record a detection with only a confidence attached.
    pub fn record(&mut self, timestamp: Instant, confidence: f64) {
        self.admit(Detection {
            timestamp,
            confidence,
            classification: String::new(),
            region: None,
        });
    }

    /// Append a detection to the window.
    ///
    /// A detection arriving after the window sat idle for longer than
    /// `idle_timeout` replaces the stale contents instead of joining them.
    /// Age-based pruning runs at most once per `prune_interval`.
    pub fn admit(&mut self, detection: Detection) {
        let now = detection.timestamp;

        if let Some(last) = self.last_detection {
            if now.saturating_duration_since(last) > self.settings.idle_timeout
                && !self.window.is_empty()
            {
                debug!(dropped = self.window.len(), "detection window idle, clearing");
                self.window.clear();
            }
        }

        self.window.push_back(detection);
        self.last_detection = Some(now);

        let due = self
            .last_prune
            .map_or(true, |t| now.saturating_duration_since(t) >= self.settings.prune_interval);
        if due {
            self.prune(now);
            self.last_prune = Some(now);
        }
    }

    /// Assess the window against the current monotonic clock.
    pub fn assess(&mut self) -> SeverityAssessment {
        self.assess_at(Instant::now())
    }

    /// Prune, then derive the severity at `now` and advance the escalation
    /// counter.
    pub fn assess_at(&mut self, now: Instant) -> SeverityAssessment {
        self.prune(now);

        let count = self.window.len();
        let max_confidence = self
            .window
            .iter()
            .map(|d| d.confidence)
            .fold(0.0_f64, f64::max);

        let mut level = if count < self.settings.detection_count_threshold {
            SeverityLevel::None
        } else if max_confidence >= self.settings.mild_threshold {
            SeverityLevel::High
        } else {
            SeverityLevel::Mild
        };

        match level {
            SeverityLevel::Mild => {
                self.consecutive_mild += 1;
                if self.consecutive_mild >= self.settings.mild_consecutive_threshold {
                    debug!(
                        consecutive = self.consecutive_mild,
                        "sustained MILD activity, escalating to HIGH"
                    );
                    level = SeverityLevel::High;
                    self.consecutive_mild = 0;
                }
            }
            SeverityLevel::High | SeverityLevel::None => self.consecutive_mild = 0,
        }

        SeverityAssessment {
            level,
            count,
            max_confidence,
        }
    }

    /// Drop all evidence and the escalation progress.
    pub fn reset(&mut self) {
        self.window.clear();
        self.consecutive_mild = 0;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn consecutive_mild(&self) -> u32 {
        self.consecutive_mild
    }

    /// Window contents, oldest first.
    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.window.iter()
    }

    fn prune(&mut self, now: Instant) {
        let window_size = self.settings.window_size;
        while self
            .window
            .front()
            .is_some_and(|d| now.saturating_duration_since(d.timestamp) > window_size)
        {
            self.window.pop_front();
        }

        if let Some(last) = self.last_detection {
            if now.saturating_duration_since(last) > self.settings.idle_timeout {
                self.window.clear();
            }
        }
    }
}
