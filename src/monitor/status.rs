//! Live status published by the fusion loop for dashboards and reports.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::message::round2;
use crate::detect::{SeverityAssessment, SeverityLevel};

/// Point-in-time copy of the monitor's status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub level: SeverityLevel,
    pub max_confidence: f64,
    pub count: usize,
    pub last_update: Option<DateTime<Utc>>,
    /// Banner describing the alert fired on the latest tick, empty otherwise.
    pub alert: String,
    pub recent_log_lines: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct StatusBoard {
    level: SeverityLevel,
    max_confidence: f64,
    count: usize,
    last_update: Option<DateTime<Utc>>,
    alert: String,
    lines: VecDeque<String>,
    capacity: usize,
}

impl StatusBoard {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            level: SeverityLevel::None,
            max_confidence: 0.0,
            count: 0,
            last_update: None,
            alert: String::new(),
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn publish(&mut self, assessment: &SeverityAssessment, at: DateTime<Utc>) {
        self.level = assessment.level;
        self.max_confidence = round2(assessment.max_confidence);
        self.count = assessment.count;
        self.last_update = Some(at);
    }

    pub(crate) fn set_alert(&mut self, banner: String) {
        self.alert = banner;
    }

    pub(crate) fn push_line(&mut self, line: String) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            level: self.level,
            max_confidence: self.max_confidence,
            count: self.count,
            last_update: self.last_update,
            alert: self.alert.clone(),
            recent_log_lines: self.lines.iter().cloned().collect(),
        }
    }
}
